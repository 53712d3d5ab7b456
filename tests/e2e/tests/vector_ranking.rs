//! Vector search ranking with a poisoned row.
//!
//! One candidate carries a NaN component; it must drop out of the
//! ranking without disturbing the order of the healthy rows.

use std::sync::Arc;

use chrono::{Duration, Utc};
use memoir_core::{InMemoryStore, Memory, MemoryStore, MemoryType};
use memoir_e2e_tests::mocks::{store_all, PinnedEmbedding};

#[test]
fn poisoned_row_is_excluded_from_ranking() {
    // Query pinned to [1, 0, 0]; candidates A, B, C(NaN), D
    let store = InMemoryStore::new()
        .with_embedding_service(Arc::new(PinnedEmbedding::new(vec![1.0, 0.0, 0.0])));

    let base = Utc::now();
    let rows = vec![
        Memory::new("A", MemoryType::Knowledge)
            .with_embedding(vec![1.0, 0.0, 0.0])
            .with_timestamp(base - Duration::minutes(4)),
        Memory::new("B", MemoryType::Knowledge)
            .with_embedding(vec![0.0, 1.0, 0.0])
            .with_timestamp(base - Duration::minutes(3)),
        Memory::new("C", MemoryType::Knowledge)
            .with_embedding(vec![f32::NAN, 0.0, 0.0])
            .with_timestamp(base - Duration::minutes(2)),
        Memory::new("D", MemoryType::Knowledge)
            .with_embedding(vec![-1.0, 0.0, 0.0])
            .with_timestamp(base - Duration::minutes(1)),
    ];
    let store = store_all(store, rows);

    let results = store.search("query", 3).unwrap();
    let contents: Vec<&str> = results.iter().map(|r| r.memory.content.as_str()).collect();
    assert_eq!(contents, vec!["A", "B", "D"]);

    // Scores follow the cosine geometry
    assert!((results[0].score - 1.0).abs() < 1e-6);
    assert!(results[1].score.abs() < 1e-6);
    assert!((results[2].score + 1.0).abs() < 1e-6);
}

#[test]
fn dimension_mismatch_rows_drop_out_of_ranking() {
    let store = InMemoryStore::new()
        .with_embedding_service(Arc::new(PinnedEmbedding::new(vec![1.0, 0.0])));

    let rows = vec![
        Memory::new("fits", MemoryType::Knowledge).with_embedding(vec![1.0, 0.0]),
        Memory::new("too wide", MemoryType::Knowledge).with_embedding(vec![1.0, 0.0, 0.0]),
        Memory::new("too narrow", MemoryType::Knowledge).with_embedding(vec![1.0]),
    ];
    let store = store_all(store, rows);

    let results = store.search("query", 10).unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].memory.content, "fits");
}

#[test]
fn unembedded_store_falls_back_to_lexical() {
    // No embeddings at all: search still works through term overlap
    let store = store_all(
        InMemoryStore::new()
            .with_embedding_service(Arc::new(PinnedEmbedding::new(vec![1.0, 0.0]))),
        vec![
            Memory::new("steel anvils for sale", MemoryType::Knowledge),
            Memory::new("wool blankets for sale", MemoryType::Knowledge),
        ],
    );

    let results = store.search("steel anvils", 5).unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].memory.content, "steel anvils for sale");
    assert_eq!(results[0].score, 1.0);
}
