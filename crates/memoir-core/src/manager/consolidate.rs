//! LLM-assisted memory consolidation.
//!
//! Memories older than a cutoff are grouped by (type, grouping key),
//! each qualifying group is summarized by one LLM call, and the group
//! is replaced by the summary with provenance metadata. The pass runs
//! plan-then-apply: every LLM call happens before any write, so
//! strict mode fails without touching the store.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::llm::{ChatClient, ChatMessage, CompletionOptions};
use crate::manager::ConsolidationConfig;
use crate::memory::{
    Memory, MemoryFilter, MemoryType, META_CONVERSATION_ID, META_ENTITY_ID, META_ENTITY_NAME,
    META_ENTITY_TYPE, META_SOURCE, META_USER_ID,
};
use crate::store::MemoryStore;

// ============================================================================
// BOOKKEEPING KEYS
// ============================================================================

/// Number of memories collapsed into the summary
pub const META_CONSOLIDATED_FROM: &str = "consolidated_from";
/// How the summary was produced
pub const META_CONSOLIDATION_METHOD: &str = "consolidation_method";
/// When the summary was produced (RFC 3339)
pub const META_CONSOLIDATED_AT: &str = "consolidated_at";
/// Comma-joined ids of the replaced memories
pub const META_ORIGINAL_IDS: &str = "original_ids";

const METHOD_LLM_SUMMARY: &str = "llm_summary";

// Grouping-key sentinels for rows missing their key
const KEY_UNKNOWN: &str = "unknown";
const KEY_ANONYMOUS: &str = "anonymous";
const KEY_ALL_TASKS: &str = "all";

// ============================================================================
// PASS
// ============================================================================

struct PlannedGroup {
    remove_ids: Vec<String>,
    consolidated: Memory,
}

/// Run one consolidation pass and return the updated store
pub(crate) fn run<S: MemoryStore>(
    store: &S,
    chat: &dyn ChatClient,
    config: &ConsolidationConfig,
    older_than: DateTime<Utc>,
    min_count: usize,
) -> Result<S> {
    let candidates: Vec<Memory> = store
        .recall(&MemoryFilter::All, None)?
        .into_iter()
        .filter(|m| m.timestamp < older_than)
        .collect();

    // BTreeMap keys give the deterministic (type name, group key) walk
    let mut groups: BTreeMap<(String, String), Vec<Memory>> = BTreeMap::new();
    for memory in candidates {
        let Some(key) = grouping_key(&memory) else {
            continue;
        };
        groups
            .entry((memory.memory_type.name().to_string(), key))
            .or_default()
            .push(memory);
    }

    // Phase 1: every LLM call happens here, before any write
    let mut planned: Vec<PlannedGroup> = Vec::new();
    for ((type_name, group_key), mut group) in groups {
        if group.len() < min_count {
            continue;
        }
        group.sort_by_key(|m| m.timestamp);
        group.truncate(config.max_memories_per_group);

        match plan_group(chat, &type_name, &group) {
            Ok(plan) => planned.push(plan),
            Err(error) if !config.strict_mode => {
                tracing::warn!(%type_name, %group_key, %error, "skipping consolidation group");
            }
            Err(error) => return Err(error),
        }
    }

    // Phase 2: apply each replacement group-atomically
    let mut next = store.clone();
    for plan in planned {
        match next.replace_group(&plan.remove_ids, plan.consolidated) {
            Ok(updated) => next = updated,
            Err(error) if !config.strict_mode => {
                tracing::warn!(%error, "consolidation group not applied; originals kept");
            }
            Err(error) => return Err(error),
        }
    }
    Ok(next)
}

/// Grouping key per type; `Custom` memories are never consolidated
fn grouping_key(memory: &Memory) -> Option<String> {
    let meta = |key: &str, fallback: &str| {
        memory
            .metadata
            .get(key)
            .cloned()
            .unwrap_or_else(|| fallback.to_string())
    };

    match &memory.memory_type {
        MemoryType::Conversation => Some(meta(META_CONVERSATION_ID, KEY_UNKNOWN)),
        MemoryType::Entity => Some(meta(META_ENTITY_ID, KEY_UNKNOWN)),
        MemoryType::UserFact => Some(meta(META_USER_ID, KEY_ANONYMOUS)),
        MemoryType::Knowledge => Some(meta(META_SOURCE, KEY_UNKNOWN)),
        MemoryType::Task => Some(KEY_ALL_TASKS.to_string()),
        MemoryType::Custom(_) => None,
    }
}

/// Metadata keys carried from a group onto its summary
fn carry_forward_keys(memory_type: &MemoryType) -> &'static [&'static str] {
    match memory_type {
        MemoryType::Conversation => &[META_CONVERSATION_ID],
        MemoryType::Entity => &[META_ENTITY_ID, META_ENTITY_NAME, META_ENTITY_TYPE],
        MemoryType::UserFact => &[META_USER_ID],
        MemoryType::Knowledge => &[META_SOURCE],
        MemoryType::Task | MemoryType::Custom(_) => &[],
    }
}

/// Summarize one group (sorted oldest first) into a replacement plan
fn plan_group(chat: &dyn ChatClient, type_name: &str, group: &[Memory]) -> Result<PlannedGroup> {
    let conversation = consolidation_prompt(type_name, group);
    let completion = chat.complete(&conversation, &CompletionOptions::default())?;

    let newest = group
        .iter()
        .map(|m| m.timestamp)
        .max()
        .unwrap_or_else(Utc::now);
    let max_importance = group.iter().filter_map(|m| m.importance).reduce(f64::max);
    let ids: Vec<String> = group.iter().map(|m| m.id.clone()).collect();
    let group_type = group[0].memory_type.clone();

    let mut consolidated = Memory::new(completion.content, group_type.clone())
        .with_timestamp(newest)
        .with_metadata(META_CONSOLIDATED_FROM, group.len().to_string())
        .with_metadata(META_CONSOLIDATION_METHOD, METHOD_LLM_SUMMARY)
        .with_metadata(META_CONSOLIDATED_AT, Utc::now().to_rfc3339())
        .with_metadata(META_ORIGINAL_IDS, ids.join(","));

    for key in carry_forward_keys(&group_type) {
        if let Some(value) = group.iter().find_map(|m| m.metadata.get(*key)) {
            consolidated = consolidated.with_metadata(*key, value.clone());
        }
    }
    if let Some(importance) = max_importance {
        consolidated = consolidated.with_importance(importance);
    }

    Ok(PlannedGroup {
        remove_ids: ids,
        consolidated,
    })
}

/// Deterministic summary prompt naming the memory type so the model
/// can pick a domain-appropriate shape
fn consolidation_prompt(type_name: &str, group: &[Memory]) -> Vec<ChatMessage> {
    let shape = match MemoryType::parse_name(type_name) {
        MemoryType::Conversation => "conversation summary",
        MemoryType::Entity => "entity profile",
        MemoryType::UserFact => "user profile entry",
        MemoryType::Knowledge => "knowledge digest",
        MemoryType::Task => "task history summary",
        MemoryType::Custom(_) => "summary",
    };

    let mut body = format!(
        "The following are {count} {type_name} memories, oldest first. \
         Consolidate them into a single {shape} that preserves every durable fact.\n",
        count = group.len(),
    );
    for (index, memory) in group.iter().enumerate() {
        body.push_str(&format!("\n{}. {}", index + 1, memory.content));
    }

    vec![
        ChatMessage::system("You consolidate an agent's memories into concise, faithful summaries."),
        ChatMessage::user(body),
    ]
}

// ============================================================================
// TESTS
// ============================================================================
