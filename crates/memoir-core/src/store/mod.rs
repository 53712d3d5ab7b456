//! Memory store backends.
//!
//! Four implementations of one contract: a pure in-process store, an
//! embedding-aware wrapper around it, an embedded SQLite store with
//! FTS5, and a pooled PostgreSQL store (feature `postgres`). Stores
//! are values - every mutating operation returns a new store and the
//! receiver is never changed. For the SQL backends the returned value
//! shares the underlying connection handle, which keeps the contract
//! uniform while the rows live outside the process.

mod in_memory;
mod params;
mod semantic;
mod sqlite;

#[cfg(feature = "postgres")]
mod postgres;

pub use in_memory::{InMemoryConfig, InMemoryStore};
pub use params::{SqlNull, SqlParam};
pub use semantic::SemanticStore;
pub use sqlite::SqliteStore;

#[cfg(feature = "postgres")]
pub use postgres::{
    embedding_to_string, json_to_metadata, metadata_to_json, string_to_embedding, PostgresConfig,
    PostgresStore,
};

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::memory::{Memory, MemoryFilter, MemoryStats};

// ============================================================================
// SEARCH RESULTS
// ============================================================================

/// A memory with its search score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoredMemory {
    /// The matched memory
    pub memory: Memory,
    /// Relevance score; higher is better
    pub score: f64,
}

// ============================================================================
// STORE CONTRACT
// ============================================================================

/// The contract every backend implements.
///
/// Mutators return a new store value; two threads may freely share a
/// store for reading, while writers coordinate by exchanging values.
pub trait MemoryStore: Clone {
    /// Insert or replace a memory by id
    fn store(&self, memory: Memory) -> Result<Self>;

    /// Fetch one memory by id
    fn get(&self, id: &str) -> Result<Option<Memory>>;

    /// Memories matching `filter`, newest first, truncated to `limit`
    fn recall(&self, filter: &MemoryFilter, limit: Option<usize>) -> Result<Vec<Memory>>;

    /// Relevance-ranked search; blank queries return nothing
    fn search(&self, query: &str, limit: usize) -> Result<Vec<ScoredMemory>>;

    /// Remove one memory by id (no-op when absent)
    fn delete(&self, id: &str) -> Result<Self>;

    /// Remove every memory matching `filter`
    fn delete_matching(&self, filter: &MemoryFilter) -> Result<Self>;

    /// Apply `apply` to an existing memory
    ///
    /// Fails with `NotFound` when the id is absent and with a
    /// validation error when `apply` changes the id.
    fn update(&self, id: &str, apply: &dyn Fn(Memory) -> Memory) -> Result<Self>;

    /// Number of memories matching `filter`
    fn count(&self, filter: &MemoryFilter) -> Result<usize>;

    /// Whether a memory with `id` exists
    fn exists(&self, id: &str) -> Result<bool> {
        Ok(self.get(id)?.is_some())
    }

    /// Remove every memory
    fn clear(&self) -> Result<Self>;

    /// Aggregated statistics
    fn stats(&self) -> Result<MemoryStats>;

    /// Atomically replace a group of memories with one consolidated
    /// memory. The default is a delete-then-insert fold; SQL backends
    /// override it with a single transaction.
    fn replace_group(&self, remove_ids: &[String], insert: Memory) -> Result<Self> {
        let mut next = self.clone();
        for id in remove_ids {
            next = next.delete(id)?;
        }
        next.store(insert)
    }

    // ========== Derived queries ==========

    /// The `limit` newest memories
    fn recent(&self, limit: usize) -> Result<Vec<Memory>> {
        self.recall(&MemoryFilter::All, Some(limit))
    }

    /// Memories with importance at or above `threshold`, newest first
    fn important(&self, threshold: f64) -> Result<Vec<Memory>> {
        self.recall(&MemoryFilter::MinImportance(threshold), None)
    }

    /// Every memory about one entity, newest first
    fn entity_memories(&self, entity_id: &str) -> Result<Vec<Memory>> {
        self.recall(&MemoryFilter::ByEntity(entity_id.to_string()), None)
    }

    /// One conversation in chronological order
    fn conversation(&self, conversation_id: &str) -> Result<Vec<Memory>> {
        let mut rows = self.recall(
            &MemoryFilter::ByConversation(conversation_id.to_string()),
            None,
        )?;
        // Stable re-sort keeps arrival order between equal timestamps
        rows.sort_by_key(|m| m.timestamp);
        Ok(rows)
    }
}

// ============================================================================
// LEXICAL SCORING
// ============================================================================

/// Term-overlap score of `content` against a whitespace-split query.
///
/// Score = distinct query terms found in the content (case-insensitive)
/// divided by the number of distinct query terms. Returns 0.0 for a
/// blank query.
pub(crate) fn lexical_score(query: &str, content: &str) -> f64 {
    let terms: BTreeSet<String> = query
        .split_whitespace()
        .map(|t| t.to_lowercase())
        .collect();
    if terms.is_empty() {
        return 0.0;
    }

    let haystack = content.to_lowercase();
    let matched = terms.iter().filter(|t| haystack.contains(t.as_str())).count();
    matched as f64 / terms.len() as f64
}

/// Rank candidates by [`lexical_score`], dropping zero scores.
/// Ties keep candidate order (stable sort).
pub(crate) fn lexical_rank(query: &str, candidates: &[Memory], limit: usize) -> Vec<ScoredMemory> {
    let mut scored: Vec<ScoredMemory> = candidates
        .iter()
        .filter_map(|memory| {
            let score = lexical_score(query, &memory.content);
            (score > 0.0).then(|| ScoredMemory {
                memory: memory.clone(),
                score,
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
