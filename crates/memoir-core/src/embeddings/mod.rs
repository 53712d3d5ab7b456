//! Embedding service abstraction.
//!
//! Stores that score vectors receive an [`EmbeddingService`] as an
//! injected capability. Provider-backed implementations (ONNX, HTTP)
//! live outside this crate; the in-tree [`HashEmbedding`] is a
//! deterministic content-hash embedder used by tests and offline runs.

use crate::error::{MemoryError, Result};
use crate::vector::l2_normalize;

// ============================================================================
// SERVICE TRAIT
// ============================================================================

/// Capability for turning text into fixed-length vectors
pub trait EmbeddingService: Send + Sync {
    /// Embed a single text
    fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed multiple texts
    ///
    /// The default implementation embeds one at a time; batch-capable
    /// providers should override.
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        texts.iter().map(|t| self.embed(t)).collect()
    }

    /// Output vector dimension
    fn dimensions(&self) -> usize;
}

// ============================================================================
// DETERMINISTIC MOCK
// ============================================================================

/// Default dimension for [`HashEmbedding`] vectors
pub const HASH_EMBEDDING_DIMENSIONS: usize = 64;

/// Deterministic content-hash embedder.
///
/// Equal inputs yield equal unit-length vectors across processes and
/// platforms. The output carries no semantic signal beyond equality,
/// which is exactly what deterministic tests need.
#[derive(Debug, Clone)]
pub struct HashEmbedding {
    dimensions: usize,
}

impl Default for HashEmbedding {
    fn default() -> Self {
        Self::new(HASH_EMBEDDING_DIMENSIONS)
    }
}

impl HashEmbedding {
    /// Create an embedder producing vectors of `dimensions` components
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }
}

// FNV-1a 64-bit, fixed offset/prime so output is process-independent
fn fnv1a(text: &str) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in text.as_bytes() {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

// splitmix64 step: expands one seed into a stream of well-mixed words
fn splitmix64(state: &mut u64) -> u64 {
    *state = state.wrapping_add(0x9e37_79b9_7f4a_7c15);
    let mut z = *state;
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}

impl EmbeddingService for HashEmbedding {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if text.trim().is_empty() {
            return Err(MemoryError::validation("text", "cannot be empty"));
        }

        let mut state = fnv1a(text);
        let raw: Vec<f32> = (0..self.dimensions)
            .map(|_| {
                let word = splitmix64(&mut state);
                // Map the top 24 bits into [-1.0, 1.0)
                ((word >> 40) as f32 / 8_388_608.0) - 1.0
            })
            .collect();

        Ok(l2_normalize(&raw))
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

// ============================================================================
// TESTS
// ============================================================================
