//! Property-Based Tests for Mnemo Core
//!
//! Uses `proptest` to check store invariants under random inputs:
//! capacity bounds, importance clamping, recency decay, filter
//! correctness and snapshot round-trips.

use chrono::{Duration, TimeZone, Utc};
use proptest::prelude::*;

use mnemo_core::memory::{MemoryRecord, MemoryStore};
use mnemo_core::reflection::{ReflectionRecord, ReflectionStore};
use mnemo_core::retrieval::RetrievalQuery;
use mnemo_core::retrieval::scoring::CompositeScorer;
use mnemo_core::types::{Embedding, Timestamp};

const SOURCES: [&str; 3] = ["observation", "social_interaction", "goal_activity"];

fn base() -> Timestamp {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).single().expect("valid date")
}

// ---------------------------------------------------------------------------
// Strategy helpers
// ---------------------------------------------------------------------------

/// (minute offset, importance, source index, embedding)
fn arb_memory_parts() -> impl Strategy<Value = (i64, f32, usize, Vec<f32>)> {
    (
        0..100_000i64,
        -5.0..15.0f32,
        0..SOURCES.len(),
        prop::collection::vec(-1.0..1.0f32, 4),
    )
}

fn build(i: usize, (minutes, importance, source, embedding): (i64, f32, usize, Vec<f32>)) -> MemoryRecord {
    MemoryRecord::builder(format!("memory {i} at {minutes}"))
        .timestamp(base() + Duration::minutes(minutes))
        .importance(importance)
        .source(SOURCES[source])
        .embedding(Embedding(embedding))
        .build()
}

fn arb_memories(max: usize) -> impl Strategy<Value = Vec<MemoryRecord>> {
    prop::collection::vec(arb_memory_parts(), 0..max)
        .prop_map(|parts| parts.into_iter().enumerate().map(|(i, p)| build(i, p)).collect())
}

// ---------------------------------------------------------------------------
// Properties
// ---------------------------------------------------------------------------

proptest! {
    #[test]
    fn store_never_exceeds_capacity(capacity in 1..20usize, memories in arb_memories(60)) {
        let mut store = MemoryStore::new(capacity);
        for memory in memories {
            store.add(memory).expect("add");
            prop_assert!(store.len() <= capacity);
        }
    }

    #[test]
    fn survivors_are_the_newest(capacity in 1..10usize, memories in arb_memories(30)) {
        let mut store = MemoryStore::new(capacity);
        let mut evicted = Vec::new();
        for memory in memories {
            if let Some(gone) = store.add(memory).expect("add") {
                evicted.push(gone);
            }
        }
        let oldest_live = store.iter().map(|m| m.timestamp).min();
        if let Some(oldest_live) = oldest_live {
            for gone in &evicted {
                prop_assert!(!store.contains(&gone.id));
                prop_assert!(gone.timestamp <= oldest_live);
            }
        }
    }

    #[test]
    fn importance_is_always_clamped(raw in -1000.0..1000.0f32) {
        let memory = MemoryRecord::builder("x").importance(raw).build();
        prop_assert!((1.0..=10.0).contains(&memory.importance));
        let reflection = ReflectionRecord::builder("y").importance(raw).build();
        prop_assert!((1.0..=10.0).contains(&reflection.importance));
    }

    #[test]
    fn recency_never_increases(parts in arb_memory_parts(), later in 0..10_000i64, more in 0..10_000i64) {
        let scorer = CompositeScorer::default();
        let memory = build(0, parts);
        let query = Embedding(vec![0.5, -0.5, 0.5, -0.5]);
        let now1 = memory.timestamp + Duration::minutes(later);
        let now2 = now1 + Duration::minutes(more);
        let s1 = scorer.score(&memory, now1, Some(&query));
        let s2 = scorer.score(&memory, now2, Some(&query));
        prop_assert!(s2 <= s1);
    }

    #[test]
    fn zero_query_has_zero_relevance(parts in arb_memory_parts()) {
        let scorer = CompositeScorer::default();
        let memory = build(0, parts);
        let breakdown = scorer.breakdown(&memory, memory.timestamp, Some(&Embedding::zeros(4)));
        prop_assert_eq!(breakdown.relevance, 0.0);
        let breakdown = scorer.breakdown(&memory, memory.timestamp, None);
        prop_assert_eq!(breakdown.relevance, 0.0);
    }

    #[test]
    fn filters_only_return_matches(
        memories in arb_memories(40),
        threshold in 0.0..10.0f32,
        source in 0..SOURCES.len(),
        k in 0..50usize,
    ) {
        let mut store = MemoryStore::new(100);
        for memory in memories {
            store.add(memory).expect("add");
        }
        let now = base() + Duration::days(100);

        let by_importance = RetrievalQuery::new(k).importance_threshold(threshold);
        let hits = store.retrieve_at(&by_importance, now);
        prop_assert!(hits.len() <= k);
        for hit in &hits {
            prop_assert!(hit.record.importance >= threshold);
        }

        let by_source = RetrievalQuery::new(k).sources([SOURCES[source]]);
        for hit in store.retrieve_at(&by_source, now) {
            prop_assert_eq!(hit.record.source.as_str(), SOURCES[source]);
        }
    }

    #[test]
    fn results_are_sorted_by_score(memories in arb_memories(40), query in prop::collection::vec(-1.0..1.0f32, 4)) {
        let mut store = MemoryStore::new(100);
        for memory in memories {
            store.add(memory).expect("add");
        }
        let hits = store.retrieve_at(&RetrievalQuery::new(100).embedding(Embedding(query)), base() + Duration::days(100));
        for pair in hits.windows(2) {
            prop_assert!(pair[0].score >= pair[1].score);
            if pair[0].score == pair[1].score {
                prop_assert!(pair[0].record.id < pair[1].record.id);
            }
        }
    }

    #[test]
    fn reflection_store_never_exceeds_capacity(capacity in 1..10usize, count in 0..40usize) {
        let mut store = ReflectionStore::new(capacity);
        for i in 0..count {
            let minutes = i64::try_from((i * 7919) % 1000).expect("small");
            store
                .add(
                    ReflectionRecord::builder(format!("reflection {i}"))
                        .timestamp(base() + Duration::minutes(minutes))
                        .build(),
                )
                .expect("add");
            prop_assert!(store.len() <= capacity);
        }
    }

    #[test]
    fn snapshot_round_trip_keeps_ids(capacity in 1..30usize, memories in arb_memories(30)) {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("memories.json");
        let mut store = MemoryStore::new(capacity);
        for memory in memories {
            store.add(memory).expect("add");
        }
        store.save(&path).expect("save");

        let mut restored = MemoryStore::new(capacity);
        restored.load(&path).expect("load");
        let before: Vec<_> = store.iter().map(|m| (&m.id, &m.text, m.importance, &m.source, &m.keywords)).collect();
        let after: Vec<_> = restored.iter().map(|m| (&m.id, &m.text, m.importance, &m.source, &m.keywords)).collect();
        prop_assert_eq!(before, after);
    }
}
