//! # Memoir Core
//!
//! Memory subsystem for LLM-backed agents: record, filter, search,
//! consolidate, and persist agent memories.
//!
//! - **Memory model**: typed records (conversation, entity, knowledge,
//!   user fact, task, custom) with string metadata, importance, and
//!   optional embeddings
//! - **Filter algebra**: a closed predicate set evaluated in-process
//!   and compiled to injection-safe SQL by the relational backends
//! - **Backends**: value-typed in-process store, embedding-aware
//!   wrapper, embedded SQLite with FTS5, pooled PostgreSQL with JSONB
//!   and a pgvector column (feature `postgres`)
//! - **Search**: exact cosine scoring with NaN/Inf hygiene and a
//!   lexical term-overlap fallback
//! - **Consolidation**: deterministic LLM-driven collapse of old
//!   memory groups into summaries with provenance metadata
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use memoir_core::prelude::*;
//!
//! # fn main() -> memoir_core::Result<()> {
//! let manager = MemoryManager::new(InMemoryStore::new())
//!     .record_user_fact("prefers concise answers", Some("u1"), None)?
//!     .record_task("index the docs", "finished in 4s", true, None)?;
//!
//! let context = manager.get_relevant_context("docs", 500)?;
//! assert!(context.contains("## Tasks"));
//! # Ok(())
//! # }
//! ```
//!
//! ## Feature Flags
//!
//! - `bundled-sqlite` (default): compile SQLite from source
//! - `postgres`: networked PostgreSQL store with a pgvector column

// Only warn about missing docs for the crate-level overview;
// internal struct fields and enum variants don't need documentation
#![warn(rustdoc::missing_crate_level_docs)]

// ============================================================================
// MODULES
// ============================================================================

pub mod embeddings;
pub mod error;
pub mod llm;
pub mod manager;
pub mod memory;
pub mod store;
pub mod vector;

// ============================================================================
// PUBLIC API RE-EXPORTS
// ============================================================================

// Errors
pub use error::{MemoryError, Result};

// Memory model
pub use memory::{
    entity_id_from_name, validate_metadata_key, Memory, MemoryFilter, MemoryStats, MemoryType,
};

// Stores
pub use store::{
    InMemoryConfig, InMemoryStore, MemoryStore, ScoredMemory, SemanticStore, SqlNull, SqlParam,
    SqliteStore,
};

#[cfg(feature = "postgres")]
pub use store::{PostgresConfig, PostgresStore};

// Embeddings
pub use embeddings::{EmbeddingService, HashEmbedding, HASH_EMBEDDING_DIMENSIONS};

// Vector math kernel
pub use vector::{cosine_similarity, euclidean_distance, l2_normalize, top_k_by_similarity};

// LLM capability
pub use llm::{ChatClient, ChatMessage, Completion, CompletionOptions, Role};

// Manager
pub use manager::{ConsolidationConfig, MemoryConfig, MemoryManager};

// ============================================================================
// VERSION INFO
// ============================================================================

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// ============================================================================
// PRELUDE
// ============================================================================

/// Convenient imports for common usage
pub mod prelude {
    pub use crate::{
        ChatClient, ChatMessage, ConsolidationConfig, EmbeddingService, HashEmbedding,
        InMemoryStore, Memory, MemoryConfig, MemoryError, MemoryFilter, MemoryManager,
        MemoryStats, MemoryStore, MemoryType, Result, ScoredMemory, SemanticStore, SqliteStore,
    };

    #[cfg(feature = "postgres")]
    pub use crate::{PostgresConfig, PostgresStore};
}
