//! In-process memory store.
//!
//! Insertion-ordered rows held entirely in memory. The store is a
//! value: every mutator returns a new store, so handles can be shared
//! across agent turns without synchronization. Search scores vectors
//! when an embedding service is attached and falls back to lexical
//! term overlap otherwise.

use std::sync::Arc;

use crate::embeddings::EmbeddingService;
use crate::error::{MemoryError, Result};
use crate::memory::{Memory, MemoryFilter, MemoryStats};
use crate::store::{lexical_rank, MemoryStore, ScoredMemory};
use crate::vector::cosine_similarity;

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Configuration for [`InMemoryStore`]
#[derive(Debug, Clone, Default)]
pub struct InMemoryConfig {
    /// Size cap; oldest rows are evicted past it
    pub max_memories: Option<usize>,
}

// ============================================================================
// STORE
// ============================================================================

/// Value-typed in-process store
#[derive(Clone, Default)]
pub struct InMemoryStore {
    // Insertion order; replacement by id keeps the original slot
    memories: Vec<Memory>,
    embedder: Option<Arc<dyn EmbeddingService>>,
    config: InMemoryConfig,
}

impl std::fmt::Debug for InMemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryStore")
            .field("memories", &self.memories.len())
            .field("embedder", &self.embedder.is_some())
            .field("config", &self.config)
            .finish()
    }
}

impl InMemoryStore {
    /// Empty store without a size cap or embedding service
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty store with the given configuration
    pub fn with_config(config: InMemoryConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    /// Attach an embedding service used for semantic search
    pub fn with_embedding_service(mut self, embedder: Arc<dyn EmbeddingService>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    /// Iterate rows in insertion order
    pub(crate) fn rows(&self) -> &[Memory] {
        &self.memories
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.memories.iter().position(|m| m.id == id)
    }

    fn evict_to_cap(memories: &mut Vec<Memory>, cap: Option<usize>) {
        let Some(cap) = cap else { return };
        while memories.len() > cap {
            let oldest = memories
                .iter()
                .enumerate()
                .min_by_key(|(_, m)| m.timestamp)
                .map(|(i, _)| i);
            match oldest {
                Some(index) => {
                    let evicted = memories.remove(index);
                    tracing::debug!(id = %evicted.id, "evicted oldest memory at size cap");
                }
                None => break,
            }
        }
    }

    /// Filtered rows, newest first, stable on equal timestamps
    fn filtered_desc(&self, filter: &MemoryFilter) -> Vec<Memory> {
        let mut rows: Vec<Memory> = self
            .memories
            .iter()
            .filter(|m| filter.matches(m))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        rows
    }
}

impl MemoryStore for InMemoryStore {
    fn store(&self, memory: Memory) -> Result<Self> {
        let mut next = self.clone();
        match next.position(&memory.id) {
            Some(index) => next.memories[index] = memory,
            None => next.memories.push(memory),
        }
        Self::evict_to_cap(&mut next.memories, next.config.max_memories);
        Ok(next)
    }

    fn get(&self, id: &str) -> Result<Option<Memory>> {
        Ok(self.memories.iter().find(|m| m.id == id).cloned())
    }

    fn recall(&self, filter: &MemoryFilter, limit: Option<usize>) -> Result<Vec<Memory>> {
        let mut rows = self.filtered_desc(filter);
        if let Some(limit) = limit {
            rows.truncate(limit);
        }
        Ok(rows)
    }

    fn search(&self, query: &str, limit: usize) -> Result<Vec<ScoredMemory>> {
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }

        // Semantic path: any embedded candidate plus a service present
        let any_embedded = self.memories.iter().any(Memory::is_embedded);
        if let (true, Some(embedder)) = (any_embedded, self.embedder.as_ref()) {
            match embedder.embed(query) {
                Ok(query_embedding) if query_embedding.iter().all(|x| x.is_finite()) => {
                    let scored = score_embedded(&self.memories, &query_embedding, limit);
                    if !scored.is_empty() {
                        return Ok(scored);
                    }
                    tracing::warn!("no scoreable embeddings; falling back to lexical search");
                }
                Ok(_) => {
                    tracing::warn!("query embedding not finite; falling back to lexical search");
                }
                Err(error) => {
                    tracing::warn!(%error, "query embedding failed; falling back to lexical search");
                }
            }
        }

        Ok(lexical_rank(query, &self.memories, limit))
    }

    fn delete(&self, id: &str) -> Result<Self> {
        let mut next = self.clone();
        next.memories.retain(|m| m.id != id);
        Ok(next)
    }

    fn delete_matching(&self, filter: &MemoryFilter) -> Result<Self> {
        let mut next = self.clone();
        next.memories.retain(|m| !filter.matches(m));
        Ok(next)
    }

    fn update(&self, id: &str, apply: &dyn Fn(Memory) -> Memory) -> Result<Self> {
        let mut next = self.clone();
        let index = next
            .position(id)
            .ok_or_else(|| MemoryError::not_found(format!("memory {id}")))?;

        let updated = apply(next.memories[index].clone());
        if updated.id != id {
            return Err(MemoryError::validation(
                "id",
                "a memory's id cannot be changed by update",
            ));
        }
        next.memories[index] = updated;
        Ok(next)
    }

    fn count(&self, filter: &MemoryFilter) -> Result<usize> {
        Ok(self.memories.iter().filter(|m| filter.matches(m)).count())
    }

    fn clear(&self) -> Result<Self> {
        let mut next = self.clone();
        next.memories.clear();
        Ok(next)
    }

    fn stats(&self) -> Result<MemoryStats> {
        Ok(MemoryStats::from_memories(&self.memories))
    }
}

/// Cosine-score candidates whose embeddings match the query dimension
/// and are fully finite; ties keep insertion order.
fn score_embedded(memories: &[Memory], query: &[f32], limit: usize) -> Vec<ScoredMemory> {
    let mut scored: Vec<ScoredMemory> = memories
        .iter()
        .filter_map(|memory| {
            let embedding = memory.embedding.as_ref()?;
            if embedding.len() != query.len() || !embedding.iter().all(|x| x.is_finite()) {
                return None;
            }
            Some(ScoredMemory {
                memory: memory.clone(),
                score: f64::from(cosine_similarity(query, embedding)),
            })
        })
        .collect();

    scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(limit);
    scored
}

// ============================================================================
// TESTS
// ============================================================================
