//! Contract laws every backend must uphold, exercised against the
//! in-process, semantic, and SQLite stores.

use std::sync::Arc;

use memoir_core::{
    HashEmbedding, InMemoryStore, Memory, MemoryFilter, MemoryStore, MemoryType, SemanticStore,
    SqliteStore,
};

fn check_store_get_roundtrip<S: MemoryStore>(store: S) {
    let memory = Memory::new("roundtrip content", MemoryType::Knowledge).with_importance(0.4);
    let id = memory.id.clone();

    let store = store.store(memory.clone()).unwrap();
    let fetched = store.get(&id).unwrap().expect("stored memory is present");
    assert_eq!(fetched.id, memory.id);
    assert_eq!(fetched.content, memory.content);
    assert_eq!(fetched.importance, Some(0.4));
}

fn check_delete_then_get_none<S: MemoryStore>(store: S) {
    let memory = Memory::new("to be deleted", MemoryType::Task);
    let id = memory.id.clone();

    let store = store.store(memory).unwrap().delete(&id).unwrap();
    assert_eq!(store.get(&id).unwrap(), None);
}

fn check_clear_empties<S: MemoryStore>(store: S) {
    let store = store
        .store(Memory::new("one", MemoryType::Task))
        .unwrap()
        .store(Memory::new("two", MemoryType::Knowledge))
        .unwrap()
        .clear()
        .unwrap();
    assert_eq!(store.count(&MemoryFilter::All).unwrap(), 0);
}

fn check_blank_search_empty<S: MemoryStore>(store: S) {
    let store = store
        .store(Memory::new("anything searchable", MemoryType::Knowledge))
        .unwrap();
    assert!(store.search("", 10).unwrap().is_empty());
    assert!(store.search(" \t ", 10).unwrap().is_empty());
}

fn check_update_preserves_identity<S: MemoryStore>(store: S) {
    let memory = Memory::new("original text", MemoryType::UserFact);
    let id = memory.id.clone();
    let store = store.store(memory).unwrap();

    let updated = store
        .update(&id, &|m| m.with_metadata("reviewed", "yes"))
        .unwrap();
    assert_eq!(
        updated
            .get(&id)
            .unwrap()
            .unwrap()
            .metadata
            .get("reviewed")
            .unwrap(),
        "yes"
    );

    assert!(store
        .update(&id, &|mut m| {
            m.id = "different".to_string();
            m
        })
        .is_err());
}

#[test]
fn laws_hold_for_in_memory_store() {
    check_store_get_roundtrip(InMemoryStore::new());
    check_delete_then_get_none(InMemoryStore::new());
    check_clear_empties(InMemoryStore::new());
    check_blank_search_empty(InMemoryStore::new());
    check_update_preserves_identity(InMemoryStore::new());
}

#[test]
fn laws_hold_for_semantic_store() {
    let embedder = || Arc::new(HashEmbedding::new(32));
    check_store_get_roundtrip(SemanticStore::new(embedder()));
    check_delete_then_get_none(SemanticStore::new(embedder()));
    check_clear_empties(SemanticStore::new(embedder()));
    check_blank_search_empty(SemanticStore::new(embedder()));
    check_update_preserves_identity(SemanticStore::new(embedder()));
}

#[test]
fn laws_hold_for_sqlite_store() {
    let open = || SqliteStore::open_in_memory().unwrap();
    check_store_get_roundtrip(open());
    check_delete_then_get_none(open());
    check_clear_empties(open());
    check_blank_search_empty(open());
    check_update_preserves_identity(open());
}

#[test]
fn custom_filter_delete_matches_in_process_evaluation() {
    // The embedded store's fallback path must agree with the
    // in-process evaluator for arbitrary predicates
    let rows = vec![
        Memory::new("alpha", MemoryType::Knowledge).with_importance(0.9),
        Memory::new("beta", MemoryType::Knowledge).with_importance(0.1),
        Memory::new("gamma", MemoryType::Task),
    ];
    let filter = MemoryFilter::custom(|m| m.importance.unwrap_or(0.0) > 0.5);

    let sqlite = rows
        .iter()
        .cloned()
        .fold(SqliteStore::open_in_memory().unwrap(), |s, m| {
            s.store(m).unwrap()
        })
        .delete_matching(&filter)
        .unwrap();
    let in_memory = rows
        .iter()
        .cloned()
        .fold(InMemoryStore::new(), |s, m| s.store(m).unwrap())
        .delete_matching(&filter)
        .unwrap();

    let mut sqlite_contents: Vec<String> = sqlite
        .recall(&MemoryFilter::All, None)
        .unwrap()
        .into_iter()
        .map(|m| m.content)
        .collect();
    let mut in_memory_contents: Vec<String> = in_memory
        .recall(&MemoryFilter::All, None)
        .unwrap()
        .into_iter()
        .map(|m| m.content)
        .collect();
    sqlite_contents.sort();
    in_memory_contents.sort();

    assert_eq!(sqlite_contents, in_memory_contents);
    assert_eq!(sqlite_contents, vec!["beta".to_string(), "gamma".to_string()]);
}
