//! Memory manager - the high-level façade agents talk to.
//!
//! Wraps any [`MemoryStore`] with record operations for messages,
//! entities, user facts, knowledge, and tasks, plus formatted context
//! retrieval and LLM-assisted consolidation. Like the stores it
//! wraps, the manager is a value: every recording operation returns a
//! new manager around the updated store.

mod consolidate;

pub use consolidate::{
    META_CONSOLIDATED_AT, META_CONSOLIDATED_FROM, META_CONSOLIDATION_METHOD, META_ORIGINAL_IDS,
};

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use crate::error::{MemoryError, Result};
use crate::llm::{ChatClient, ChatMessage};
use crate::memory::{
    Memory, MemoryFilter, MemoryStats, MemoryType, META_ENTITY_NAME, META_ROLE, META_USER_ID,
};
use crate::store::MemoryStore;

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Settings for the consolidation pass
#[derive(Debug, Clone, PartialEq)]
pub struct ConsolidationConfig {
    /// Largest number of memories consolidated per group; older rows
    /// go first, newer rows wait for a later pass
    pub max_memories_per_group: usize,
    /// Propagate any group failure instead of skipping the group
    pub strict_mode: bool,
}

impl Default for ConsolidationConfig {
    fn default() -> Self {
        Self {
            max_memories_per_group: 50,
            strict_mode: false,
        }
    }
}

/// Manager configuration
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryConfig {
    /// Record conversation messages automatically (consumed by the
    /// agent loop driving this manager)
    pub auto_record_messages: bool,
    /// Extract entities from messages automatically (consumed by the
    /// agent loop driving this manager)
    pub auto_extract_entities: bool,
    /// Importance assigned when a record call does not specify one
    pub default_importance: f64,
    /// Token budget for retrieved context
    pub context_token_budget: usize,
    /// Whether consolidation runs at all
    pub consolidation_enabled: bool,
    /// Consolidation settings
    pub consolidation: ConsolidationConfig,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            auto_record_messages: true,
            auto_extract_entities: false,
            default_importance: 0.5,
            context_token_budget: 2000,
            consolidation_enabled: true,
            consolidation: ConsolidationConfig::default(),
        }
    }
}

impl MemoryConfig {
    /// The original five-field configuration shape; consolidation
    /// settings take their defaults
    pub fn legacy(
        auto_record_messages: bool,
        auto_extract_entities: bool,
        default_importance: f64,
        context_token_budget: usize,
        consolidation_enabled: bool,
    ) -> Self {
        Self {
            auto_record_messages,
            auto_extract_entities,
            default_importance,
            context_token_budget,
            consolidation_enabled,
            consolidation: ConsolidationConfig::default(),
        }
    }

    /// Override the consolidation settings
    pub fn with_consolidation(mut self, consolidation: ConsolidationConfig) -> Self {
        self.consolidation = consolidation;
        self
    }

    /// Override the default importance
    pub fn with_default_importance(mut self, default_importance: f64) -> Self {
        self.default_importance = default_importance;
        self
    }
}

// ============================================================================
// MANAGER
// ============================================================================

/// How many search hits feed relevant-context formatting
const RELEVANT_CONTEXT_CANDIDATES: usize = 20;

/// Characters budgeted per token when truncating context
const CHARS_PER_TOKEN: usize = 4;

/// High-level memory façade over any store backend
#[derive(Clone)]
pub struct MemoryManager<S: MemoryStore> {
    store: S,
    config: MemoryConfig,
    chat: Option<Arc<dyn ChatClient>>,
}

impl<S: MemoryStore> std::fmt::Debug for MemoryManager<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryManager")
            .field("config", &self.config)
            .field("chat", &self.chat.is_some())
            .finish_non_exhaustive()
    }
}

impl<S: MemoryStore> MemoryManager<S> {
    /// Manager with default configuration
    pub fn new(store: S) -> Self {
        Self::with_config(store, MemoryConfig::default())
    }

    /// Manager with explicit configuration
    pub fn with_config(store: S, config: MemoryConfig) -> Self {
        Self {
            store,
            config,
            chat: None,
        }
    }

    /// Attach the LLM client used by consolidation
    pub fn with_chat_client(mut self, chat: Arc<dyn ChatClient>) -> Self {
        self.chat = Some(chat);
        self
    }

    /// The wrapped store
    pub fn store(&self) -> &S {
        &self.store
    }

    /// The active configuration
    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    fn updated(&self, store: S) -> Self {
        Self {
            store,
            config: self.config.clone(),
            chat: self.chat.clone(),
        }
    }

    fn importance_or_default(&self, importance: Option<f64>) -> f64 {
        importance.unwrap_or(self.config.default_importance)
    }

    // ========================================================================
    // RECORDING
    // ========================================================================

    /// Record one conversation message
    pub fn record_message(
        &self,
        message: &ChatMessage,
        conversation_id: &str,
        importance: Option<f64>,
    ) -> Result<Self> {
        let memory = Memory::from_conversation(
            message.content.clone(),
            message.role.name(),
            Some(conversation_id),
        )
        .with_importance(self.importance_or_default(importance));
        Ok(self.updated(self.store.store(memory)?))
    }

    /// Record a whole conversation, preserving message order
    pub fn record_conversation(
        &self,
        messages: &[ChatMessage],
        conversation_id: &str,
    ) -> Result<Self> {
        // Strictly increasing timestamps keep replay order stable in
        // backends that order only by time
        let base = Utc::now();
        let mut next = self.clone();
        for (offset, message) in messages.iter().enumerate() {
            let memory = Memory::from_conversation(
                message.content.clone(),
                message.role.name(),
                Some(conversation_id),
            )
            .with_importance(self.config.default_importance)
            .with_timestamp(base + Duration::milliseconds(offset as i64));
            next = next.updated(next.store.store(memory)?);
        }
        Ok(next)
    }

    /// Record a fact about an entity
    pub fn record_entity_fact(
        &self,
        entity_id: &str,
        entity_name: &str,
        content: &str,
        entity_type: &str,
        importance: Option<f64>,
    ) -> Result<Self> {
        let memory = Memory::for_entity(entity_id, entity_name, content, entity_type)
            .with_importance(self.importance_or_default(importance));
        Ok(self.updated(self.store.store(memory)?))
    }

    /// Record a fact about the user
    pub fn record_user_fact(
        &self,
        content: &str,
        user_id: Option<&str>,
        importance: Option<f64>,
    ) -> Result<Self> {
        let memory = Memory::user_fact(content, user_id)
            .with_importance(self.importance_or_default(importance));
        Ok(self.updated(self.store.store(memory)?))
    }

    /// Record ingested knowledge with extra metadata
    pub fn record_knowledge(
        &self,
        content: &str,
        source: &str,
        extra_metadata: &BTreeMap<String, String>,
    ) -> Result<Self> {
        let memory = Memory::from_knowledge(content, source, None)
            .with_metadata_map(extra_metadata)
            .with_importance(self.config.default_importance);
        Ok(self.updated(self.store.store(memory)?))
    }

    /// Record a completed task
    pub fn record_task(
        &self,
        description: &str,
        outcome: &str,
        success: bool,
        importance: Option<f64>,
    ) -> Result<Self> {
        let memory = Memory::from_task(description, outcome, success)
            .with_importance(self.importance_or_default(importance));
        Ok(self.updated(self.store.store(memory)?))
    }

    // ========================================================================
    // CONTEXT RETRIEVAL
    // ========================================================================

    /// The last `limit` messages of a conversation as transcript lines
    pub fn get_conversation_context(
        &self,
        conversation_id: &str,
        limit: usize,
    ) -> Result<String> {
        let messages = self.store.conversation(conversation_id)?;
        let skip = messages.len().saturating_sub(limit);

        let lines: Vec<String> = messages
            .iter()
            .skip(skip)
            .map(|memory| {
                let role = memory
                    .metadata
                    .get(META_ROLE)
                    .map(String::as_str)
                    .unwrap_or("unknown");
                format!("[{role}] {}", memory.content)
            })
            .collect();
        Ok(lines.join("\n"))
    }

    /// Known facts about one entity, newest first
    pub fn get_entity_context(&self, entity_id: &str) -> Result<String> {
        let memories = self.store.entity_memories(entity_id)?;
        if memories.is_empty() {
            return Ok(String::new());
        }

        let display_name = memories
            .iter()
            .find_map(|m| m.metadata.get(META_ENTITY_NAME))
            .cloned()
            .unwrap_or_else(|| entity_id.to_string());

        let mut out = format!("Known facts about {display_name}:");
        for memory in &memories {
            out.push_str("\n- ");
            out.push_str(&memory.content);
        }
        Ok(out)
    }

    /// Known facts about the user, newest first
    pub fn get_user_context(&self, user_id: Option<&str>) -> Result<String> {
        let filter = match user_id {
            Some(uid) => MemoryFilter::ByType(MemoryType::UserFact).and(MemoryFilter::ByMetadata(
                META_USER_ID.to_string(),
                uid.to_string(),
            )),
            None => MemoryFilter::ByType(MemoryType::UserFact),
        };
        let memories = self.store.recall(&filter, None)?;
        if memories.is_empty() {
            return Ok(String::new());
        }

        let mut out = String::from("Known facts about the user:");
        for memory in &memories {
            out.push_str("\n- ");
            out.push_str(&memory.content);
        }
        Ok(out)
    }

    /// Search-ranked context across memory types, formatted into
    /// headered sections and truncated to roughly `max_tokens`
    /// (4 characters per token)
    pub fn get_relevant_context(&self, query: &str, max_tokens: usize) -> Result<String> {
        let results = self.store.search(query, RELEVANT_CONTEXT_CANDIDATES)?;
        if results.is_empty() {
            return Ok(String::new());
        }

        let mut knowledge = Vec::new();
        let mut entities = Vec::new();
        let mut user_facts = Vec::new();
        let mut tasks = Vec::new();
        let mut custom: BTreeMap<String, Vec<String>> = BTreeMap::new();

        for scored in &results {
            let line = format!("- {}", scored.memory.content);
            match &scored.memory.memory_type {
                MemoryType::Knowledge => knowledge.push(line),
                MemoryType::Entity => entities.push(line),
                MemoryType::UserFact => user_facts.push(line),
                MemoryType::Task => tasks.push(line),
                MemoryType::Custom(name) => custom.entry(name.clone()).or_default().push(line),
                // Conversation history has its own retrieval path
                MemoryType::Conversation => {}
            }
        }

        let mut sections: Vec<(String, Vec<String>)> = vec![
            ("Knowledge".to_string(), knowledge),
            ("Entities".to_string(), entities),
            ("User Facts".to_string(), user_facts),
            ("Tasks".to_string(), tasks),
        ];
        for (name, lines) in custom {
            sections.push((name, lines));
        }

        let rendered: Vec<String> = sections
            .into_iter()
            .filter(|(_, lines)| !lines.is_empty())
            .map(|(header, lines)| format!("## {header}\n{}", lines.join("\n")))
            .collect();
        if rendered.is_empty() {
            return Ok(String::new());
        }

        Ok(truncate_chars(
            &rendered.join("\n\n"),
            max_tokens * CHARS_PER_TOKEN,
        ))
    }

    /// Aggregated statistics over the wrapped store
    pub fn stats(&self) -> Result<MemoryStats> {
        self.store.stats()
    }

    // ========================================================================
    // CONSOLIDATION
    // ========================================================================

    /// Collapse groups of related memories older than `older_than`
    /// into single LLM-written summaries. Groups smaller than
    /// `min_count` are untouched. Requires a chat client.
    pub fn consolidate_memories(
        &self,
        older_than: DateTime<Utc>,
        min_count: usize,
    ) -> Result<Self> {
        if !self.config.consolidation_enabled {
            return Ok(self.clone());
        }
        let Some(chat) = self.chat.as_ref() else {
            return Err(MemoryError::processing(
                "consolidate",
                "consolidation requires a chat client; attach one with with_chat_client",
            ));
        };

        let next_store = consolidate::run(
            &self.store,
            chat.as_ref(),
            &self.config.consolidation,
            older_than,
            min_count,
        )?;
        Ok(self.updated(next_store))
    }
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        text.chars().take(max_chars).collect()
    }
}

// ============================================================================
// TESTS
// ============================================================================
