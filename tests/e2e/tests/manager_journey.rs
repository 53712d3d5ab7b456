//! A complete manager workflow against the embedded store: record,
//! retrieve formatted context, inspect stats, and respect budgets.

use memoir_core::{
    entity_id_from_name, MemoryFilter, MemoryManager, MemoryStore, MemoryType, SqliteStore,
};
use memoir_e2e_tests::mocks::record_exchange;

#[test]
fn record_and_retrieve_through_sqlite() {
    let dir = tempfile::tempdir().unwrap();
    let store = SqliteStore::open(dir.path().join("journey.db")).unwrap();

    let manager = record_exchange(MemoryManager::new(store), "conv-1");
    let entity_id = entity_id_from_name("Acme Corp");
    let manager = manager
        .record_entity_fact(&entity_id, "Acme Corp", "sells forged steel anvils", "organization", Some(0.8))
        .unwrap()
        .record_user_fact("prefers bulk discounts", Some("u1"), None)
        .unwrap()
        .record_task("quote anvil order", "sent quote for two anvils", true, None)
        .unwrap();

    // Conversation context is chronological and role-tagged
    let transcript = manager.get_conversation_context("conv-1", 10).unwrap();
    let lines: Vec<&str> = transcript.lines().collect();
    assert_eq!(lines.len(), 3);
    assert!(lines[0].starts_with("[user]"));
    assert!(lines[1].starts_with("[assistant]"));
    assert!(transcript.ends_with("order two of them"));

    // Entity context names the entity
    let entity_context = manager.get_entity_context(&entity_id).unwrap();
    assert!(entity_context.starts_with("Known facts about Acme Corp:"));
    assert!(entity_context.contains("forged steel anvils"));

    // Relevant context sections appear in fixed order under budget
    let relevant = manager.get_relevant_context("anvils", 500).unwrap();
    assert!(relevant.contains("## Entities"));
    assert!(relevant.contains("## Tasks"));
    assert!(!relevant.contains("## Knowledge"));

    // Stats aggregate across types
    let stats = manager.stats().unwrap();
    assert_eq!(stats.total_memories, 6);
    assert_eq!(stats.conversation_count, 1);
    assert_eq!(stats.entity_count, 1);
    assert_eq!(stats.by_type.get("conversation"), Some(&3));
}

#[test]
fn context_budget_truncates_output() {
    let store = SqliteStore::open_in_memory().unwrap();
    let manager = MemoryManager::new(store)
        .record_user_fact(
            "a very long user fact that keeps going and going well past any tiny budget",
            None,
            None,
        )
        .unwrap();

    let context = manager.get_relevant_context("budget going fact", 4).unwrap();
    // 4 tokens * 4 chars per token
    assert!(context.chars().count() <= 16);
    assert!(!context.is_empty());
}

#[test]
fn recall_filters_compose_across_the_manager_store() {
    let manager = record_exchange(
        MemoryManager::new(SqliteStore::open_in_memory().unwrap()),
        "conv-9",
    );

    let store = manager.store();
    let filter = MemoryFilter::ByConversation("conv-9".to_string())
        .and(MemoryFilter::ByMetadata("role".to_string(), "user".to_string()));
    assert_eq!(store.count(&filter).unwrap(), 2);

    let none = MemoryFilter::ByType(MemoryType::Knowledge);
    assert_eq!(store.count(&none).unwrap(), 0);
}
