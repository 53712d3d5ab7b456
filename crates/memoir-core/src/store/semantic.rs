//! Embedding-aware wrapper store.
//!
//! Wraps an [`InMemoryStore`] and guarantees an embedding service is
//! always available: content is embedded on write so vector search
//! never falls back for lack of vectors. The external contract is the
//! inner store's; every mutator re-wraps so callers keep the wrapper
//! type across updates.

use std::sync::Arc;

use crate::embeddings::EmbeddingService;
use crate::error::Result;
use crate::memory::{Memory, MemoryFilter, MemoryStats};
use crate::store::{InMemoryConfig, InMemoryStore, MemoryStore, ScoredMemory};

// ============================================================================
// STORE
// ============================================================================

/// In-process store that embeds every memory it writes
#[derive(Clone)]
pub struct SemanticStore {
    inner: InMemoryStore,
    embedder: Arc<dyn EmbeddingService>,
}

impl std::fmt::Debug for SemanticStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SemanticStore")
            .field("inner", &self.inner)
            .field("dimensions", &self.embedder.dimensions())
            .finish()
    }
}

impl SemanticStore {
    /// Empty store backed by `embedder`
    pub fn new(embedder: Arc<dyn EmbeddingService>) -> Self {
        Self::with_config(embedder, InMemoryConfig::default())
    }

    /// Empty store with an inner-store configuration
    pub fn with_config(embedder: Arc<dyn EmbeddingService>, config: InMemoryConfig) -> Self {
        Self {
            inner: InMemoryStore::with_config(config).with_embedding_service(embedder.clone()),
            embedder,
        }
    }

    fn wrap(&self, inner: InMemoryStore) -> Self {
        Self {
            inner,
            embedder: self.embedder.clone(),
        }
    }

    /// Embed content unless an embedding is already attached.
    /// An embedding failure degrades to storing the row unembedded.
    fn ensure_embedded(&self, memory: Memory) -> Memory {
        if memory.is_embedded() {
            return memory;
        }
        match self.embedder.embed(&memory.content) {
            Ok(embedding) => memory.with_embedding(embedding),
            Err(error) => {
                tracing::warn!(id = %memory.id, %error, "embedding failed; storing without vector");
                memory
            }
        }
    }
}

impl MemoryStore for SemanticStore {
    fn store(&self, memory: Memory) -> Result<Self> {
        let embedded = self.ensure_embedded(memory);
        Ok(self.wrap(self.inner.store(embedded)?))
    }

    fn get(&self, id: &str) -> Result<Option<Memory>> {
        self.inner.get(id)
    }

    fn recall(&self, filter: &MemoryFilter, limit: Option<usize>) -> Result<Vec<Memory>> {
        self.inner.recall(filter, limit)
    }

    fn search(&self, query: &str, limit: usize) -> Result<Vec<ScoredMemory>> {
        self.inner.search(query, limit)
    }

    fn delete(&self, id: &str) -> Result<Self> {
        Ok(self.wrap(self.inner.delete(id)?))
    }

    fn delete_matching(&self, filter: &MemoryFilter) -> Result<Self> {
        Ok(self.wrap(self.inner.delete_matching(filter)?))
    }

    fn update(&self, id: &str, apply: &dyn Fn(Memory) -> Memory) -> Result<Self> {
        Ok(self.wrap(self.inner.update(id, apply)?))
    }

    fn count(&self, filter: &MemoryFilter) -> Result<usize> {
        self.inner.count(filter)
    }

    fn clear(&self) -> Result<Self> {
        Ok(self.wrap(self.inner.clear()?))
    }

    fn stats(&self) -> Result<MemoryStats> {
        self.inner.stats()
    }
}

// ============================================================================
// TESTS
// ============================================================================
