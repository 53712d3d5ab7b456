//! Memory record - the fundamental unit stored by every backend.
//!
//! Each memory carries free-text content, a type tag, string metadata,
//! a timestamp, and optional importance and embedding. Records are
//! values: every mutator returns a fresh `Memory`, and the id never
//! changes after creation.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

// ============================================================================
// WELL-KNOWN METADATA KEYS
// ============================================================================

/// Conversation the memory belongs to
pub const META_CONVERSATION_ID: &str = "conversation_id";
/// Speaker role within a conversation
pub const META_ROLE: &str = "role";
/// Stable entity identifier
pub const META_ENTITY_ID: &str = "entity_id";
/// Human-readable entity name
pub const META_ENTITY_NAME: &str = "entity_name";
/// Entity classification (person, place, ...)
pub const META_ENTITY_TYPE: &str = "entity_type";
/// User the fact belongs to
pub const META_USER_ID: &str = "user_id";
/// Document or origin of a knowledge memory
pub const META_SOURCE: &str = "source";
/// Chunk position within a source document
pub const META_CHUNK_INDEX: &str = "chunk_index";
/// Task outcome flag ("true"/"false")
pub const META_SUCCESS: &str = "success";

// ============================================================================
// MEMORY TYPES
// ============================================================================

/// Classification of a memory
///
/// The five well-known types drive factory metadata, retrieval
/// sections, and consolidation grouping; `Custom` types pass through
/// storage untouched and are never consolidated.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MemoryType {
    /// A message exchanged in a conversation
    Conversation,
    /// A fact about a tracked entity
    Entity,
    /// Ingested knowledge (documents, chunks)
    Knowledge,
    /// A fact about the user
    UserFact,
    /// A completed task and its outcome
    Task,
    /// User-defined label
    Custom(String),
}

impl MemoryType {
    /// Serialized name, used in SQL and JSON
    pub fn name(&self) -> &str {
        match self {
            MemoryType::Conversation => "conversation",
            MemoryType::Entity => "entity",
            MemoryType::Knowledge => "knowledge",
            MemoryType::UserFact => "user_fact",
            MemoryType::Task => "task",
            MemoryType::Custom(name) => name,
        }
    }

    /// Parse from a serialized name; unknown names become `Custom`
    pub fn parse_name(s: &str) -> Self {
        match s {
            "conversation" => MemoryType::Conversation,
            "entity" => MemoryType::Entity,
            "knowledge" => MemoryType::Knowledge,
            "user_fact" => MemoryType::UserFact,
            "task" => MemoryType::Task,
            other => MemoryType::Custom(other.to_string()),
        }
    }
}

impl std::fmt::Display for MemoryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl Serialize for MemoryType {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

impl<'de> Deserialize<'de> for MemoryType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        if name.is_empty() {
            return Err(D::Error::custom("memory type name cannot be empty"));
        }
        Ok(MemoryType::parse_name(&name))
    }
}

// ============================================================================
// MEMORY
// ============================================================================

/// A single stored memory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Memory {
    /// Unique identifier (UUID v4); never changes after creation
    pub id: String,
    /// The remembered text
    pub content: String,
    /// Classification
    pub memory_type: MemoryType,
    /// String metadata; keys iterate in sorted order
    pub metadata: BTreeMap<String, String>,
    /// When the memory was recorded
    pub timestamp: DateTime<Utc>,
    /// Relevance weight in [0, 1]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub importance: Option<f64>,
    /// Semantic embedding vector
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

impl Memory {
    /// Create a memory with a fresh id and the current time
    pub fn new(content: impl Into<String>, memory_type: MemoryType) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            content: content.into(),
            memory_type,
            metadata: BTreeMap::new(),
            timestamp: Utc::now(),
            importance: None,
            embedding: None,
        }
    }

    // ========== Factories ==========

    /// A conversation message memory
    pub fn from_conversation(
        content: impl Into<String>,
        role: impl Into<String>,
        conversation_id: Option<&str>,
    ) -> Self {
        let mut memory =
            Self::new(content, MemoryType::Conversation).with_metadata(META_ROLE, role.into());
        if let Some(cid) = conversation_id {
            memory = memory.with_metadata(META_CONVERSATION_ID, cid);
        }
        memory
    }

    /// A fact about a tracked entity
    pub fn for_entity(
        entity_id: impl Into<String>,
        entity_name: impl Into<String>,
        content: impl Into<String>,
        entity_type: impl Into<String>,
    ) -> Self {
        Self::new(content, MemoryType::Entity)
            .with_metadata(META_ENTITY_ID, entity_id.into())
            .with_metadata(META_ENTITY_NAME, entity_name.into())
            .with_metadata(META_ENTITY_TYPE, entity_type.into())
    }

    /// An ingested knowledge memory
    pub fn from_knowledge(
        content: impl Into<String>,
        source: impl Into<String>,
        chunk_index: Option<usize>,
    ) -> Self {
        let mut memory =
            Self::new(content, MemoryType::Knowledge).with_metadata(META_SOURCE, source.into());
        if let Some(index) = chunk_index {
            memory = memory.with_metadata(META_CHUNK_INDEX, index.to_string());
        }
        memory
    }

    /// A fact about the user
    pub fn user_fact(content: impl Into<String>, user_id: Option<&str>) -> Self {
        let mut memory = Self::new(content, MemoryType::UserFact);
        if let Some(uid) = user_id {
            memory = memory.with_metadata(META_USER_ID, uid);
        }
        memory
    }

    /// A completed task with its outcome
    pub fn from_task(description: &str, outcome: &str, success: bool) -> Self {
        Self::new(
            format!("Task: {description}\nOutcome: {outcome}"),
            MemoryType::Task,
        )
        .with_metadata(META_SUCCESS, if success { "true" } else { "false" })
    }

    // ========== Functional updates ==========

    /// Set one metadata entry (last write wins)
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Merge a metadata map (last write wins per key)
    pub fn with_metadata_map(mut self, entries: &BTreeMap<String, String>) -> Self {
        for (key, value) in entries {
            self.metadata.insert(key.clone(), value.clone());
        }
        self
    }

    /// Set importance, clamped to [0, 1]; NaN becomes 0.0
    pub fn with_importance(mut self, importance: f64) -> Self {
        let clamped = if importance.is_nan() {
            0.0
        } else {
            importance.clamp(0.0, 1.0)
        };
        self.importance = Some(clamped);
        self
    }

    /// Attach or replace the embedding vector
    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    /// Override the timestamp (recording backdated facts, tests)
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    // ========== Readers ==========

    /// Whether an embedding is attached
    pub fn is_embedded(&self) -> bool {
        self.embedding.is_some()
    }

    /// Conversation id, when recorded from a conversation
    pub fn conversation_id(&self) -> Option<&str> {
        self.metadata.get(META_CONVERSATION_ID).map(String::as_str)
    }

    /// Source, when recorded from a document
    pub fn source(&self) -> Option<&str> {
        self.metadata.get(META_SOURCE).map(String::as_str)
    }
}

/// Derive a stable entity id from a human name
/// (lowercased, whitespace runs collapsed to `_`)
pub fn entity_id_from_name(name: &str) -> String {
    name.trim()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
}

// ============================================================================
// TESTS
// ============================================================================
