//! FTS index coherence across compound deletes on the embedded store.

use memoir_core::{Memory, MemoryFilter, MemoryStore, MemoryType, SqliteStore};
use memoir_e2e_tests::mocks::store_all;

#[test]
fn fts_rows_disappear_with_their_memories() {
    let store = store_all(
        SqliteStore::open_in_memory().unwrap(),
        vec![
            Memory::from_conversation("searchable unique phrase alpha", "user", Some("c1")),
            Memory::from_knowledge("keep this memory", "doc.md", None),
        ],
    );

    // Both rows visible through FTS before the delete
    assert_eq!(store.search("alpha", 10).unwrap().len(), 1);
    assert_eq!(store.search("keep", 10).unwrap().len(), 1);

    let store = store
        .delete_matching(&MemoryFilter::ByType(MemoryType::Conversation))
        .unwrap();

    assert!(store.search("alpha", 10).unwrap().is_empty());
    assert_eq!(store.count(&MemoryFilter::All).unwrap(), 1);
    let survivors = store.recall(&MemoryFilter::All, None).unwrap();
    assert_eq!(survivors[0].content, "keep this memory");
    assert_eq!(survivors[0].memory_type, MemoryType::Knowledge);
}

#[test]
fn fts_rows_disappear_through_the_fallback_path_too() {
    let store = store_all(
        SqliteStore::open_in_memory().unwrap(),
        vec![
            Memory::new("ephemeral clue tangerine", MemoryType::Conversation),
            Memory::new("persistent note", MemoryType::Knowledge),
        ],
    );

    // Custom predicates cannot compile, forcing row-by-row deletion
    let filter = MemoryFilter::custom(|m| m.memory_type == MemoryType::Conversation);
    let store = store.delete_matching(&filter).unwrap();

    assert!(store.search("tangerine", 10).unwrap().is_empty());
    assert_eq!(store.search("persistent", 10).unwrap().len(), 1);
    assert_eq!(store.count(&MemoryFilter::All).unwrap(), 1);
}

#[test]
fn fts_follows_replacement_content() {
    let memory = Memory::new("original searchable walrus", MemoryType::Knowledge);
    let id = memory.id.clone();
    let store = SqliteStore::open_in_memory().unwrap().store(memory).unwrap();

    assert_eq!(store.search("walrus", 10).unwrap().len(), 1);

    let store = store
        .update(&id, &|m| Memory {
            content: "revised searchable narwhal".to_string(),
            ..m
        })
        .unwrap();

    assert!(store.search("walrus", 10).unwrap().is_empty());
    assert_eq!(store.search("narwhal", 10).unwrap().len(), 1);
}

#[test]
fn on_disk_fts_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("memoir.db");

    {
        let store = SqliteStore::open(&path).unwrap();
        store
            .store(Memory::new("durable phrase quokka", MemoryType::Knowledge))
            .unwrap();
    }

    let reopened = SqliteStore::open(&path).unwrap();
    assert_eq!(reopened.search("quokka", 10).unwrap().len(), 1);
}
