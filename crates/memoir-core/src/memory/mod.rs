//! Memory module - core types and data structures
//!
//! The memory record, its type taxonomy and factories, the filter
//! algebra shared by every backend, and the derived statistics view.

mod filter;
mod record;

pub use filter::{validate_metadata_key, MemoryFilter};
pub(crate) use filter::sorted_or_type_names;
pub use record::{
    entity_id_from_name, Memory, MemoryType, META_CHUNK_INDEX, META_CONVERSATION_ID,
    META_ENTITY_ID, META_ENTITY_NAME, META_ENTITY_TYPE, META_ROLE, META_SOURCE, META_SUCCESS,
    META_USER_ID,
};

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// MEMORY STATISTICS
// ============================================================================

/// Aggregated statistics over one store
#[non_exhaustive]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryStats {
    /// Total number of memories
    pub total_memories: usize,
    /// Count per serialized memory type name
    pub by_type: BTreeMap<String, usize>,
    /// Number of distinct entities mentioned
    pub entity_count: usize,
    /// Number of distinct conversations recorded
    pub conversation_count: usize,
    /// Memories carrying an embedding
    pub embedded_count: usize,
    /// Timestamp of the oldest memory
    pub oldest_memory: Option<DateTime<Utc>>,
    /// Timestamp of the newest memory
    pub newest_memory: Option<DateTime<Utc>>,
}

impl MemoryStats {
    /// Derive statistics from a row iterator
    pub fn from_memories<'a>(memories: impl IntoIterator<Item = &'a Memory>) -> Self {
        let mut stats = MemoryStats::default();
        let mut entities: BTreeSet<&str> = BTreeSet::new();
        let mut conversations: BTreeSet<&str> = BTreeSet::new();

        for memory in memories {
            stats.total_memories += 1;
            *stats
                .by_type
                .entry(memory.memory_type.name().to_string())
                .or_insert(0) += 1;
            if memory.is_embedded() {
                stats.embedded_count += 1;
            }
            if let Some(entity_id) = memory.metadata.get(META_ENTITY_ID) {
                entities.insert(entity_id);
            }
            if let Some(conversation_id) = memory.metadata.get(META_CONVERSATION_ID) {
                conversations.insert(conversation_id);
            }
            stats.oldest_memory = Some(match stats.oldest_memory {
                Some(oldest) => oldest.min(memory.timestamp),
                None => memory.timestamp,
            });
            stats.newest_memory = Some(match stats.newest_memory {
                Some(newest) => newest.max(memory.timestamp),
                None => memory.timestamp,
            });
        }

        stats.entity_count = entities.len();
        stats.conversation_count = conversations.len();
        stats
    }
}

// ============================================================================
// TESTS
// ============================================================================
