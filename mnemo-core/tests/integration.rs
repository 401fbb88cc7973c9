//! Integration Tests — End-to-End Memory Flows
//!
//! These tests drive the public API only: add/retrieve/evict lifecycles,
//! snapshot round-trips and failure modes, weak reflection references, and
//! the perceive → remember → reflect → plan loop with a scripted oracle.

use chrono::{Duration, TimeZone, Utc};

use mnemo_core::config::{AccessMarking, MnemoConfig, PersistenceConfig};
use mnemo_core::consolidation::{ReasoningOracle, Reflector, SynthesisKind, SynthesisRequest};
use mnemo_core::embedding::{EmbeddingProvider, HashingEmbeddingProvider, embed_or_zero};
use mnemo_core::error::{MnemoError, Result};
use mnemo_core::memory::{MemoryRecord, MemoryStore};
use mnemo_core::observation::{EnvironmentState, InternalState, Observer, perceive_environment};
use mnemo_core::reflection::{ReflectionRecord, ReflectionStore, ReflectionType};
use mnemo_core::retrieval::RetrievalQuery;
use mnemo_core::retrieval::context::memories_for_planning;
use mnemo_core::types::{Embedding, TimeRange, Timestamp};
use mnemo_core::{MemoryBank, SharedMemoryBank};

fn t0() -> Timestamp {
    Utc.with_ymd_and_hms(2024, 3, 10, 8, 0, 0).single().expect("valid date")
}

fn record(text: &str, hours: i64, importance: f32) -> MemoryRecord {
    MemoryRecord::builder(text)
        .timestamp(t0() + Duration::hours(hours))
        .importance(importance)
        .build()
}

fn one_hot(dims: usize, hot: usize) -> Embedding {
    let mut v = vec![0.0; dims];
    v[hot] = 1.0;
    Embedding(v)
}

/// Answers every synthesis with a fixed sentence and scores everything 7.
struct ScriptedOracle;

impl ReasoningOracle for ScriptedOracle {
    fn synthesize(&self, request: &SynthesisRequest) -> Result<String> {
        Ok(match request.kind {
            SynthesisKind::Reflection => format!("{} was a busy time", request.context),
            SynthesisKind::Insight => format!("{} keeps recurring", request.context),
        })
    }

    fn score_importance(&self, _text: &str, _agent_context: &str) -> Result<f32> {
        Ok(7.0)
    }
}

// ---------------------------------------------------------------------------
// Retrieval
// ---------------------------------------------------------------------------

#[test]
fn exact_embedding_match_wins_retrieval() {
    let mut store = MemoryStore::new(10);
    let records: Vec<MemoryRecord> = [5.0, 9.0, 3.0]
        .into_iter()
        .enumerate()
        .map(|(i, importance)| {
            MemoryRecord::builder(format!("event {i}"))
                .timestamp(t0() + Duration::minutes(i as i64))
                .importance(importance)
                .embedding(one_hot(3, i))
                .build()
        })
        .collect();
    for r in &records {
        store.add(r.clone()).expect("add");
    }

    let now = t0() + Duration::minutes(5);
    let query = RetrievalQuery::new(1).embedding(records[1].embedding.clone().expect("embedding"));
    let hits = store.retrieve_at(&query, now);
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].record.id, records[1].id);
    assert!((hits[0].breakdown.relevance - 0.5).abs() < 1e-9);
}

#[test]
fn filters_compose_and_access_is_marked() {
    let mut store = MemoryStore::new(10);
    store.add(record("Sold bread at the market", 0, 4.0)).expect("add");
    store.add(record("Argued with the miller", 1, 8.0)).expect("add");
    store
        .add(
            MemoryRecord::builder("Chatted with Bram")
                .timestamp(t0() + Duration::hours(2))
                .importance(8.0)
                .source("social_interaction")
                .build(),
        )
        .expect("add");

    let now = t0() + Duration::hours(3);
    let query = RetrievalQuery::new(10)
        .importance_threshold(5.0)
        .sources(["observation"])
        .time_range(TimeRange::new(t0(), now));
    let texts: Vec<String> = store
        .retrieve_at(&query, now)
        .into_iter()
        .map(|h| h.record.text.clone())
        .collect();
    assert_eq!(texts, vec!["Argued with the miller"]);

    let miller = store
        .iter()
        .find(|m| m.text == "Argued with the miller")
        .expect("present");
    assert_eq!(miller.access_count, 1);
    assert_eq!(miller.last_accessed, Some(now));
}

#[test]
fn returned_only_marking_leaves_losers_untouched() {
    let mut store = MemoryStore::new(10).with_access_marking(AccessMarking::ReturnedOnly);
    store.add(record("low", 0, 2.0)).expect("add");
    store.add(record("high", 0, 9.0)).expect("add");

    let now = t0() + Duration::hours(1);
    let _ = store.retrieve_at(&RetrievalQuery::new(1), now);
    let counts: Vec<(String, u32)> = store.iter().map(|m| (m.text.clone(), m.access_count)).collect();
    assert_eq!(counts, vec![("low".into(), 0), ("high".into(), 1)]);
}

#[test]
fn mismatched_dimensions_score_zero_relevance() {
    let mut store = MemoryStore::new(10);
    store
        .add(
            MemoryRecord::builder("old vocabulary")
                .timestamp(t0())
                .embedding(one_hot(4, 0))
                .build(),
        )
        .expect("add");
    let hits = store.retrieve_at(&RetrievalQuery::new(1).embedding(one_hot(8, 0)), t0());
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].breakdown.relevance, 0.0);
}

// ---------------------------------------------------------------------------
// Eviction and weak references
// ---------------------------------------------------------------------------

#[test]
fn oldest_record_is_evicted_from_every_index() {
    let mut store = MemoryStore::new(2);
    let a = MemoryRecord::builder("alpha harvest")
        .timestamp(t0())
        .importance(9.0)
        .source("observation")
        .build();
    let b = record("bravo harvest", 1, 5.0);
    let c = record("charlie harvest", 2, 5.0);

    store.add(a.clone()).expect("add");
    store.add(b.clone()).expect("add");
    let evicted = store.add(c.clone()).expect("add").expect("evicted");

    assert_eq!(evicted.id, a.id);
    assert_eq!(store.len(), 2);
    assert!(store.contains(&b.id) && store.contains(&c.id));
    assert!(!store.contains(&a.id));
    assert!(store.importance_bucket(9).is_empty());
    assert!(store.keyword_bucket("alpha").is_empty());
    assert_eq!(store.keyword_bucket("harvest").len(), 2);
    assert!(store.get_important_memories(9.0).is_empty());
}

#[test]
fn reflection_sources_are_weak() {
    let mut store = MemoryStore::new(1);
    let first = record("first", 0, 5.0);
    store.add(first.clone()).expect("add");

    let reflection = ReflectionRecord::builder("Things started")
        .timestamp(t0() + Duration::hours(1))
        .source_records([&first])
        .build();

    store.add(record("second", 2, 5.0)).expect("add");
    assert!(reflection.resolve_sources(&store).is_empty());
    assert_eq!(reflection.unresolved_sources(&store), vec![&first.id]);
}

#[test]
fn reflection_store_evicts_across_types() {
    let mut reflections = ReflectionStore::new(2);
    for (i, kind) in [ReflectionType::Weekly, ReflectionType::Daily, ReflectionType::Insight]
        .into_iter()
        .enumerate()
    {
        reflections
            .add(
                ReflectionRecord::builder(format!("reflection {i}"))
                    .timestamp(t0() + Duration::hours(i as i64))
                    .reflection_type(kind)
                    .build(),
            )
            .expect("add");
    }
    assert_eq!(reflections.len(), 2);
    assert!(reflections.get_by_type(ReflectionType::Weekly).is_empty());
    assert_eq!(reflections.get_by_type(ReflectionType::Insight).len(), 1);
}

// ---------------------------------------------------------------------------
// Persistence
// ---------------------------------------------------------------------------

#[test]
fn snapshot_round_trip_preserves_records() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("memories.json");

    let mut store = MemoryStore::new(10);
    for i in 0..5 {
        store
            .add(
                MemoryRecord::builder(format!("market day number {i}"))
                    .timestamp(t0() + Duration::hours(i))
                    .importance(2.0 + i as f32)
                    .embedding(one_hot(5, i as usize))
                    .build(),
            )
            .expect("add");
    }
    let _ = store.retrieve_at(&RetrievalQuery::new(2), t0() + Duration::hours(6));
    store.save(&path).expect("save");

    let mut restored = MemoryStore::new(10);
    assert_eq!(restored.load(&path).expect("load"), 5);
    let before: Vec<&MemoryRecord> = store.iter().collect();
    let after: Vec<&MemoryRecord> = restored.iter().collect();
    assert_eq!(before, after);
}

#[test]
fn reload_over_capacity_evicts_oldest_first() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("memories.json");

    let mut big = MemoryStore::new(10);
    for i in 0..6 {
        big.add(record(&format!("entry {i}"), i, 5.0)).expect("add");
    }
    big.save(&path).expect("save");

    let mut small = MemoryStore::new(3);
    assert_eq!(small.load(&path).expect("load"), 3);
    assert_eq!(small.max_memories(), 10);
    let texts: Vec<&str> = small.iter().map(|m| m.text.as_str()).collect();
    assert_eq!(texts, vec!["entry 3", "entry 4", "entry 5"]);
}

#[test]
fn reload_adopts_saved_capacity() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("memories.json");

    let mut saved = MemoryStore::new(50);
    saved.add(record("kept capacity", 0, 5.0)).expect("add");
    saved.save(&path).expect("save");

    let mut restored = MemoryStore::default();
    restored.load(&path).expect("load");
    assert_eq!(restored.max_memories(), 50);

    let reflections_path = dir.path().join("reflections.json");
    std::fs::write(
        &reflections_path,
        r#"{
            "max_capacity": 2,
            "records": [
                {"id": "reflection_a", "reflection_text": "first", "timestamp": "2024-03-10T08:00:00Z",
                 "importance": 8.0, "reflection_type": "daily"},
                {"id": "reflection_b", "reflection_text": "second", "timestamp": "2024-03-10T09:00:00Z",
                 "importance": 8.0, "reflection_type": "daily"},
                {"id": "reflection_c", "reflection_text": "third", "timestamp": "2024-03-10T10:00:00Z",
                 "importance": 8.0, "reflection_type": "insight"}
            ]
        }"#,
    )
    .expect("write");
    let mut reflections = ReflectionStore::new(10);
    assert_eq!(reflections.load(&reflections_path, None).expect("load"), 2);
    assert_eq!(reflections.max_reflections(), 2);
    let texts: Vec<&str> = reflections.iter().map(|r| r.reflection_text.as_str()).collect();
    assert_eq!(texts, vec!["second", "third"]);
}

#[test]
fn out_of_range_importance_is_clamped_on_load() {
    let dir = tempfile::tempdir().expect("tempdir");
    let memories_path = dir.path().join("memories.json");
    std::fs::write(
        &memories_path,
        r#"{
            "max_capacity": 10,
            "records": [
                {"id": "m1", "text": "too loud", "timestamp": "2024-03-10T08:00:00Z",
                 "importance": 42.0, "source": "observation"},
                {"id": "m2", "text": "too quiet", "timestamp": "2024-03-10T09:00:00Z",
                 "importance": -3.0, "source": "observation"}
            ]
        }"#,
    )
    .expect("write");
    let mut memories = MemoryStore::new(10);
    memories.load(&memories_path).expect("load");
    let importances: Vec<f32> = memories.iter().map(|m| m.importance).collect();
    assert_eq!(importances, vec![10.0, 1.0]);
    assert_eq!(memories.importance_bucket(10).len(), 1);

    let reflections_path = dir.path().join("reflections.json");
    std::fs::write(
        &reflections_path,
        r#"{
            "max_capacity": 10,
            "records": [
                {"id": "reflection_x", "reflection_text": "overblown", "timestamp": "2024-03-10T08:00:00Z",
                 "importance": 99.0, "reflection_type": "insight"}
            ]
        }"#,
    )
    .expect("write");
    let mut reflections = ReflectionStore::new(10);
    reflections.load(&reflections_path, None).expect("load");
    assert_eq!(reflections.iter().next().map(|r| r.importance), Some(10.0));
}

#[test]
fn failed_loads_leave_the_store_unchanged() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut store = MemoryStore::new(10);
    store.add(record("keep me", 0, 5.0)).expect("add");

    let missing = store.load(dir.path().join("absent.json")).expect_err("missing");
    assert!(missing.is_not_found());

    let garbage = dir.path().join("garbage.json");
    std::fs::write(&garbage, r#"{"records": [{"text": 3}]}"#).expect("write");
    let malformed = store.load(&garbage).expect_err("malformed");
    assert!(matches!(malformed, MnemoError::MalformedSnapshot { .. }));

    assert_eq!(store.len(), 1);
    assert_eq!(store.iter().next().map(|m| m.text.as_str()), Some("keep me"));
}

#[test]
fn legacy_snapshot_keys_are_accepted() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("legacy.json");
    std::fs::write(
        &path,
        r#"{
            "memories": [{
                "id": "2024-03-10T08:00:00.000000Z_0000000000000001",
                "text": "An old memory",
                "timestamp": "2024-03-10T08:00:00Z",
                "importance": 6.0,
                "source": "observation",
                "embedding": null,
                "associated_event": null,
                "keywords": ["old", "memory"],
                "access_count": 2,
                "last_accessed": null
            }],
            "max_memories": 100,
            "saved_at": "2024-03-11T08:00:00Z"
        }"#,
    )
    .expect("write");

    let mut store = MemoryStore::new(100);
    assert_eq!(store.load(&path).expect("load"), 1);
    let memory = store.iter().next().expect("memory");
    assert_eq!(memory.access_count, 2);
    assert_eq!(memory.keywords, vec!["old", "memory"]);
}

#[test]
fn reflection_reload_drops_unknown_sources() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("reflections.json");

    let kept = record("kept", 0, 5.0);
    let lost = record("lost", 1, 5.0);
    let mut reflections = ReflectionStore::new(10);
    reflections
        .add(
            ReflectionRecord::builder("A mixed day")
                .timestamp(t0() + Duration::hours(2))
                .source_records([&kept, &lost])
                .build(),
        )
        .expect("add");
    reflections.update_long_term_goals(vec!["Learn to forge".into()]);
    reflections.save(&path).expect("save");

    let mut memories = MemoryStore::new(10);
    memories.add(kept.clone()).expect("add");

    let mut restored = ReflectionStore::new(10);
    restored.load(&path, Some(&memories)).expect("load");
    let reflection = restored.iter().next().expect("reflection");
    assert_eq!(reflection.source_memories, vec![kept.id.clone()]);
    assert_eq!(restored.long_term_goals(), ["Learn to forge".to_string()]);
}

#[test]
fn persistence_config_controls_backups() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("memories.json");
    let config = PersistenceConfig {
        backup_count: 1,
        ..PersistenceConfig::default()
    };

    let mut store = MemoryStore::new(10);
    store.add(record("first", 0, 5.0)).expect("add");
    store.save_with(&path, &config).expect("save");
    store.add(record("second", 1, 5.0)).expect("add");
    store.save_with(&path, &config).expect("save");

    let mut previous = MemoryStore::new(10);
    previous
        .load(mnemo_core::persistence::backup_path(&path, 1))
        .expect("load backup");
    assert_eq!(previous.len(), 1);
}

// ---------------------------------------------------------------------------
// Agent loop
// ---------------------------------------------------------------------------

#[test]
fn perceive_reflect_plan_loop() {
    let provider = HashingEmbeddingProvider::new(128);
    let oracle = ScriptedOracle;
    let config = MnemoConfig::from_toml("[memory]\nmax_memories = 50\n").expect("config");
    let mut bank = MemoryBank::from_config(&config);
    bank.reflections.update_long_term_goals(vec!["Open a bakery".into()]);

    let observer = Observer::new("Ada", &provider, &oracle);
    let env = EnvironmentState {
        location: Some("the village square".into()),
        time: Some("noon".into()),
        objects: vec!["a flour cart".into()],
        ..EnvironmentState::default()
    };
    let now = t0();
    let lines = perceive_environment(Some(&env), None, &InternalState::default());
    let stored = observer.perceive(&mut bank, &lines, now).expect("perceive");
    assert_eq!(stored.len(), 2);
    bank.remember(observer.goal("bought an oven", "purchase", 8.0, now))
        .expect("remember");

    let reflector = Reflector::new(&oracle, "Ada");
    let later = now + Duration::hours(3);
    let daily = reflector
        .daily_reflection(&mut bank, later)
        .expect("daily")
        .expect("reflection");
    assert_eq!(daily.source_memories.len(), 3);
    let goal = reflector
        .goal_progress_reflection(&mut bank, later)
        .expect("goal")
        .expect("reflection");
    assert_eq!(goal.reflection_type, ReflectionType::Goal);

    let goals = bank.reflections.long_term_goals().to_vec();
    let plan = memories_for_planning(&mut bank.memories, &provider, "what to do tomorrow", &goals, later);
    assert!(plan.iter().any(|m| m.source == "goal_activity"));
    assert!(plan.iter().any(|m| m.source == "reflection"));
    assert!(plan.windows(2).all(|w| w[0].importance >= w[1].importance));

    let summary = bank.reflections.get_reflection_summary_at(7, later);
    assert!(summary.contains("Open a bakery"));
}

#[test]
fn shared_bank_save_and_load() {
    let dir = tempfile::tempdir().expect("tempdir");
    let prefix = dir.path().join("ada");
    let provider = HashingEmbeddingProvider::new(32);

    let shared = SharedMemoryBank::new(MemoryBank::new(20, 20));
    shared
        .remember(
            MemoryRecord::builder("The bridge washed out")
                .timestamp(t0())
                .importance(9.0)
                .embedding(embed_or_zero(&provider, "The bridge washed out"))
                .build(),
        )
        .expect("remember");
    shared.save(&prefix).expect("save");

    let restored = SharedMemoryBank::new(MemoryBank::new(20, 20));
    let report = restored.load(&prefix).expect("load");
    assert_eq!(report.memories_loaded, Some(1));

    let query = RetrievalQuery::new(1).embedding(provider.embed("bridge").expect("embed"));
    let hits = restored.retrieve_at(&query, t0() + Duration::hours(1));
    assert_eq!(hits[0].text, "The bridge washed out");
}
