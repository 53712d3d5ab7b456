//! Deterministic test doubles and fixture builders.

use memoir_core::error::Result;
use memoir_core::{ChatMessage, EmbeddingService, Memory, MemoryManager, MemoryStore};

/// Embedding service that returns one pinned vector for every input.
///
/// Lets a test choose the query geometry exactly instead of relying
/// on hash-derived vectors.
#[derive(Debug, Clone)]
pub struct PinnedEmbedding {
    vector: Vec<f32>,
}

impl PinnedEmbedding {
    pub fn new(vector: Vec<f32>) -> Self {
        Self { vector }
    }
}

impl EmbeddingService for PinnedEmbedding {
    fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Ok(self.vector.clone())
    }

    fn dimensions(&self) -> usize {
        self.vector.len()
    }
}

/// Store a batch of memories, threading the returned store values
pub fn store_all<S: MemoryStore>(store: S, memories: Vec<Memory>) -> S {
    memories
        .into_iter()
        .fold(store, |s, m| s.store(m).expect("store"))
}

/// Record a short scripted exchange through the manager
pub fn record_exchange<S: MemoryStore>(
    manager: MemoryManager<S>,
    conversation_id: &str,
) -> MemoryManager<S> {
    manager
        .record_conversation(
            &[
                ChatMessage::user("what metal are anvils made of?"),
                ChatMessage::assistant("typically forged steel"),
                ChatMessage::user("order two of them"),
            ],
            conversation_id,
        )
        .expect("record conversation")
}
