//! Reflection Store — bounded, type-partitioned collection of reflections
//! plus the agent's slowly-changing identity state.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt;
use std::path::Path;

use chrono::{Duration, Utc};
use serde::Serialize;
use tracing::debug;

use crate::config::{MnemoConfig, PersistenceConfig};
use crate::error::{MnemoError, Result};
use crate::eviction::{EvictionQueue, over_capacity};
use crate::keywords::tokenize;
use crate::memory::MemoryStore;
use crate::persistence;
use crate::reflection::{ReflectionRecord, ReflectionType};
use crate::types::{ReflectionId, Timestamp};

/// Default capacity of a reflection store.
pub const DEFAULT_MAX_REFLECTIONS: usize = 1_000;

/// Entries listed per category in [`ReflectionStore::get_reflection_summary`].
const SUMMARY_RECENT_PER_TYPE: usize = 3;

/// Aggregate statistics over a reflection store.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReflectionStats {
    /// Number of live reflections.
    pub total_reflections: usize,
    /// Mean importance.
    pub average_importance: f64,
    /// Reflection count per type.
    pub type_breakdown: BTreeMap<ReflectionType, usize>,
    /// Number of core principles.
    pub core_principles_count: usize,
    /// Number of long-term goals.
    pub long_term_goals_count: usize,
    /// Oldest timestamp.
    pub oldest_reflection: Option<Timestamp>,
    /// Newest timestamp.
    pub newest_reflection: Option<Timestamp>,
    /// Whole days between oldest and newest.
    pub time_span_days: i64,
}

/// Bounded collection of [`ReflectionRecord`]s, partitioned by type.
///
/// Entries are keyed by insertion sequence, so iteration is in insertion
/// order and eviction can remove from the middle in O(log n).
#[derive(Debug, Clone)]
pub struct ReflectionStore {
    entries: BTreeMap<u64, ReflectionRecord>,
    next_seq: u64,
    max_reflections: usize,
    by_id: HashMap<ReflectionId, u64>,
    by_type: BTreeMap<ReflectionType, BTreeSet<u64>>,
    eviction: EvictionQueue<u64>,
    core_principles: Vec<String>,
    long_term_goals: Vec<String>,
}

impl Default for ReflectionStore {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_REFLECTIONS)
    }
}

impl ReflectionStore {
    /// Create an empty store holding at most `max_reflections` reflections.
    #[must_use]
    pub fn new(max_reflections: usize) -> Self {
        Self {
            entries: BTreeMap::new(),
            next_seq: 0,
            max_reflections: max_reflections.max(1),
            by_id: HashMap::new(),
            by_type: BTreeMap::new(),
            eviction: EvictionQueue::new(),
            core_principles: Vec::new(),
            long_term_goals: Vec::new(),
        }
    }

    /// Create an empty store from configuration.
    #[must_use]
    pub fn from_config(config: &MnemoConfig) -> Self {
        Self::new(config.reflection.max_reflections)
    }

    /// Number of live reflections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no reflections are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Configured capacity.
    #[must_use]
    pub fn max_reflections(&self) -> usize {
        self.max_reflections
    }

    /// Look up a reflection by id.
    #[must_use]
    pub fn get(&self, id: &ReflectionId) -> Option<&ReflectionRecord> {
        self.by_id.get(id).and_then(|seq| self.entries.get(seq))
    }

    /// Whether a reflection with this id is live.
    #[must_use]
    pub fn contains(&self, id: &ReflectionId) -> bool {
        self.by_id.contains_key(id)
    }

    /// All reflections in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &ReflectionRecord> + '_ {
        self.entries.values()
    }

    /// The agent's core principles.
    #[must_use]
    pub fn core_principles(&self) -> &[String] {
        &self.core_principles
    }

    /// The agent's long-term goals.
    #[must_use]
    pub fn long_term_goals(&self) -> &[String] {
        &self.long_term_goals
    }

    /// Add a reflection, evicting the oldest one (across all types) if
    /// capacity is exceeded. Returns the evicted reflection, if any.
    ///
    /// # Errors
    ///
    /// Returns [`MnemoError::DuplicateId`] if the id is already live.
    pub fn add(&mut self, reflection: ReflectionRecord) -> Result<Option<ReflectionRecord>> {
        if self.by_id.contains_key(&reflection.id) {
            return Err(MnemoError::DuplicateId(reflection.id.to_string()));
        }

        let seq = self.next_seq;
        self.next_seq += 1;

        debug!(
            id = %reflection.id,
            reflection_type = %reflection.reflection_type,
            importance = reflection.importance,
            "Added reflection"
        );

        self.by_id.insert(reflection.id.clone(), seq);
        self.by_type
            .entry(reflection.reflection_type)
            .or_default()
            .insert(seq);
        self.eviction.push(reflection.timestamp, seq, seq);
        self.entries.insert(seq, reflection);

        let evicted = if over_capacity(self.entries.len(), self.max_reflections) {
            self.evict_oldest()
        } else {
            None
        };
        debug_assert!(self.entries.len() <= self.max_reflections);
        Ok(evicted)
    }

    /// Evict the reflection with the oldest timestamp. Returns it, if any.
    pub fn evict_oldest(&mut self) -> Option<ReflectionRecord> {
        let seq = self.eviction.pop_oldest()?;
        let reflection = self.entries.remove(&seq)?;
        self.by_id.remove(&reflection.id);
        if let Some(partition) = self.by_type.get_mut(&reflection.reflection_type) {
            partition.remove(&seq);
            if partition.is_empty() {
                self.by_type.remove(&reflection.reflection_type);
            }
        }
        debug!(id = %reflection.id, "Evicted oldest reflection");
        Some(reflection)
    }

    /// Change the capacity, evicting oldest-first until the store fits.
    ///
    /// A capacity of zero is raised to one. Returns the evicted reflections.
    pub fn set_max_reflections(&mut self, max_reflections: usize) -> Vec<ReflectionRecord> {
        self.max_reflections = max_reflections.max(1);
        let mut evicted = Vec::new();
        while over_capacity(self.entries.len(), self.max_reflections) {
            match self.evict_oldest() {
                Some(reflection) => evicted.push(reflection),
                None => break,
            }
        }
        evicted
    }

    /// Remove every reflection. Identity state is kept.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.by_id.clear();
        self.by_type.clear();
        self.eviction.clear();
    }

    /// Record a reference to `id` at the current time.
    pub fn mark_referenced(&mut self, id: &ReflectionId) -> bool {
        self.mark_referenced_at(id, Utc::now())
    }

    /// Record a reference to `id` at `now`. Returns whether the id was live.
    pub fn mark_referenced_at(&mut self, id: &ReflectionId, now: Timestamp) -> bool {
        let Some(seq) = self.by_id.get(id) else {
            return false;
        };
        match self.entries.get_mut(seq) {
            Some(reflection) => {
                reflection.mark_referenced_at(now);
                true
            }
            None => false,
        }
    }

    // ------------------------------------------------------------------
    // Views
    // ------------------------------------------------------------------

    /// Reflections from the last `days` days.
    #[must_use]
    pub fn get_recent(&self, days: u32) -> Vec<&ReflectionRecord> {
        self.get_recent_at(days, Utc::now())
    }

    /// Reflections from the `days` days before `now`.
    #[must_use]
    pub fn get_recent_at(&self, days: u32, now: Timestamp) -> Vec<&ReflectionRecord> {
        let cutoff = now - Duration::days(i64::from(days));
        self.iter().filter(|r| r.timestamp >= cutoff).collect()
    }

    /// Reflections of one type, in insertion order.
    #[must_use]
    pub fn get_by_type(&self, reflection_type: ReflectionType) -> Vec<&ReflectionRecord> {
        self.by_type
            .get(&reflection_type)
            .map(|seqs| seqs.iter().filter_map(|seq| self.entries.get(seq)).collect())
            .unwrap_or_default()
    }

    /// The `k` most important reflections; equal importance keeps insertion order.
    #[must_use]
    pub fn get_most_important(&self, k: usize) -> Vec<&ReflectionRecord> {
        let mut sorted: Vec<&ReflectionRecord> = self.iter().collect();
        sorted.sort_by(|a, b| b.importance.total_cmp(&a.importance));
        sorted.truncate(k);
        sorted
    }

    /// Keyword search: each context token found in a reflection's token set
    /// scores `importance`. Only reflections with at least one hit are
    /// returned, best first.
    #[must_use]
    pub fn find_relevant(&self, context: &str, k: usize) -> Vec<&ReflectionRecord> {
        let context_tokens = tokenize(context);
        if context_tokens.is_empty() {
            return Vec::new();
        }

        let mut scored: Vec<(f64, &ReflectionRecord)> = self
            .iter()
            .filter_map(|reflection| {
                let tokens: HashSet<String> = tokenize(&reflection.reflection_text).into_iter().collect();
                let overlaps = context_tokens.iter().filter(|t| tokens.contains(*t)).count();
                #[allow(clippy::cast_precision_loss)]
                let score = overlaps as f64 * f64::from(reflection.importance);
                (overlaps > 0).then_some((score, reflection))
            })
            .collect();

        scored.sort_by(|a, b| b.0.total_cmp(&a.0));
        scored.truncate(k);
        scored.into_iter().map(|(_, r)| r).collect()
    }

    // ------------------------------------------------------------------
    // Identity state
    // ------------------------------------------------------------------

    /// Append a core principle unless it is already present.
    pub fn add_core_principle(&mut self, principle: impl Into<String>) {
        push_unique(&mut self.core_principles, principle.into());
    }

    /// Append a long-term goal unless it is already present.
    pub fn add_long_term_goal(&mut self, goal: impl Into<String>) {
        push_unique(&mut self.long_term_goals, goal.into());
    }

    /// Replace the core principles wholesale.
    pub fn update_core_principles(&mut self, principles: Vec<String>) {
        self.core_principles = principles;
    }

    /// Replace the long-term goals wholesale.
    pub fn update_long_term_goals(&mut self, goals: Vec<String>) {
        self.long_term_goals = goals;
    }

    // ------------------------------------------------------------------
    // Summaries
    // ------------------------------------------------------------------

    /// Text digest of the last `days` days.
    #[must_use]
    pub fn get_reflection_summary(&self, days: u32) -> String {
        self.get_reflection_summary_at(days, Utc::now())
    }

    /// Text digest of the `days` days before `now`: identity state followed
    /// by the latest insights and daily reflections.
    #[must_use]
    pub fn get_reflection_summary_at(&self, days: u32, now: Timestamp) -> String {
        let recent = self.get_recent_at(days, now);
        let mut parts = vec![
            format!("Reflection Summary (Last {days} days)"),
            format!("Total reflections: {}", recent.len()),
        ];

        push_numbered(&mut parts, "Core Principles", &self.core_principles);
        push_numbered(&mut parts, "Long-term Goals", &self.long_term_goals);

        for (heading, kind) in [
            ("Recent Insights", ReflectionType::Insight),
            ("Recent Daily Reflections", ReflectionType::Daily),
        ] {
            let of_kind: Vec<&&ReflectionRecord> =
                recent.iter().filter(|r| r.reflection_type == kind).collect();
            if of_kind.is_empty() {
                continue;
            }
            parts.push(format!("\n{heading} ({}):", of_kind.len()));
            let skip = of_kind.len().saturating_sub(SUMMARY_RECENT_PER_TYPE);
            for reflection in of_kind.into_iter().skip(skip) {
                parts.push(format!("  - {}", reflection.reflection_text));
            }
        }

        parts.join("\n")
    }

    /// Aggregate statistics.
    #[must_use]
    pub fn get_statistics(&self) -> ReflectionStats {
        let mut stats = ReflectionStats {
            core_principles_count: self.core_principles.len(),
            long_term_goals_count: self.long_term_goals.len(),
            ..ReflectionStats::default()
        };
        if self.is_empty() {
            return stats;
        }

        let mut importance_sum = 0.0_f64;
        for reflection in self.iter() {
            importance_sum += f64::from(reflection.importance);
            *stats.type_breakdown.entry(reflection.reflection_type).or_insert(0) += 1;
            let ts = reflection.timestamp;
            stats.oldest_reflection = Some(stats.oldest_reflection.map_or(ts, |t| t.min(ts)));
            stats.newest_reflection = Some(stats.newest_reflection.map_or(ts, |t| t.max(ts)));
        }

        stats.total_reflections = self.len();
        #[allow(clippy::cast_precision_loss)]
        {
            stats.average_importance = importance_sum / self.len() as f64;
        }
        if let (Some(oldest), Some(newest)) = (stats.oldest_reflection, stats.newest_reflection) {
            stats.time_span_days = (newest - oldest).num_days();
        }
        stats
    }

    // ------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------

    /// Write a snapshot (reflections and identity state) to `path`.
    ///
    /// # Errors
    ///
    /// Returns [`MnemoError::Io`] or [`MnemoError::Serialization`] on failure.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        self.save_with(path, &PersistenceConfig::default())
    }

    /// [`save`](Self::save) with explicit persistence settings.
    ///
    /// # Errors
    ///
    /// See [`save`](Self::save).
    pub fn save_with(&self, path: impl AsRef<Path>, config: &PersistenceConfig) -> Result<()> {
        persistence::save_reflections(self, path.as_ref(), config)
    }

    /// Replace this store's contents with the snapshot at `path`.
    ///
    /// With a `memory_store`, each reflection's source ids are re-linked
    /// against it and ids that no longer resolve are dropped. Without one
    /// the ids are kept as stored. The store adopts the snapshot's capacity,
    /// evicting oldest-first if it holds more. On error the store is left
    /// unchanged.
    ///
    /// # Errors
    ///
    /// [`MnemoError::SnapshotNotFound`] if the file does not exist,
    /// [`MnemoError::MalformedSnapshot`] if it cannot be decoded.
    pub fn load(&mut self, path: impl AsRef<Path>, memory_store: Option<&MemoryStore>) -> Result<usize> {
        self.load_with(path, memory_store, &PersistenceConfig::default())
    }

    /// [`load`](Self::load) with explicit persistence settings.
    ///
    /// # Errors
    ///
    /// See [`load`](Self::load).
    pub fn load_with(
        &mut self,
        path: impl AsRef<Path>,
        memory_store: Option<&MemoryStore>,
        config: &PersistenceConfig,
    ) -> Result<usize> {
        let path = path.as_ref();
        let snapshot = persistence::read_reflections(path, config)?;

        let mut rebuilt = Self::new(self.max_reflections);
        let mut dropped = 0_usize;
        for mut reflection in snapshot.records {
            if let Some(store) = memory_store {
                let before = reflection.source_memories.len();
                reflection.relink(store);
                dropped += before - reflection.source_memories.len();
            }
            rebuilt
                .add(reflection)
                .map_err(|e| MnemoError::malformed(path, e))?;
        }
        if snapshot.max_capacity > 0 {
            rebuilt.set_max_reflections(snapshot.max_capacity);
        }
        rebuilt.core_principles = snapshot.core_principles.unwrap_or_default();
        rebuilt.long_term_goals = snapshot.long_term_goals.unwrap_or_default();

        if dropped > 0 {
            debug!(dropped, "Dropped unresolvable reflection sources on load");
        }

        *self = rebuilt;
        Ok(self.len())
    }
}

impl fmt::Display for ReflectionStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ReflectionStore({} reflections, {} principles, {} goals)",
            self.len(),
            self.core_principles.len(),
            self.long_term_goals.len()
        )
    }
}

fn push_unique(list: &mut Vec<String>, item: String) {
    if !list.contains(&item) {
        list.push(item);
    }
}

fn push_numbered(parts: &mut Vec<String>, heading: &str, items: &[String]) {
    if items.is_empty() {
        return;
    }
    parts.push(format!("\n{heading}:"));
    for (i, item) in items.iter().enumerate() {
        parts.push(format!("  {}. {item}", i + 1));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(hours: i64) -> Timestamp {
        Utc.with_ymd_and_hms(2024, 7, 1, 0, 0, 0).single().expect("valid date") + Duration::hours(hours)
    }

    fn refl(text: &str, hours: i64, importance: f32, kind: ReflectionType) -> ReflectionRecord {
        ReflectionRecord::builder(text)
            .timestamp(t(hours))
            .importance(importance)
            .reflection_type(kind)
            .build()
    }

    fn texts(records: &[&ReflectionRecord]) -> Vec<String> {
        records.iter().map(|r| r.reflection_text.clone()).collect()
    }

    #[test]
    fn eviction_removes_from_partition() {
        let mut store = ReflectionStore::new(2);
        store.add(refl("old daily", 0, 8.0, ReflectionType::Daily)).expect("add");
        store.add(refl("weekly", 5, 9.0, ReflectionType::Weekly)).expect("add");
        let evicted = store
            .add(refl("insight", 10, 7.5, ReflectionType::Insight))
            .expect("add")
            .expect("evicted");

        assert_eq!(evicted.reflection_text, "old daily");
        assert_eq!(store.len(), 2);
        assert!(store.get_by_type(ReflectionType::Daily).is_empty());
        assert_eq!(texts(&store.get_by_type(ReflectionType::Insight)), vec!["insight"]);
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let mut store = ReflectionStore::new(5);
        let r = refl("x", 0, 8.0, ReflectionType::Daily);
        store.add(r.clone()).expect("add");
        assert!(matches!(store.add(r), Err(MnemoError::DuplicateId(_))));
    }

    #[test]
    fn find_relevant_scores_overlap_times_importance() {
        let mut store = ReflectionStore::new(10);
        store
            .add(refl("the market is busy on fridays", 0, 5.0, ReflectionType::Insight))
            .expect("add");
        store
            .add(refl("i enjoy the quiet harbour", 1, 9.0, ReflectionType::Daily))
            .expect("add");
        store
            .add(refl("market prices rose", 2, 6.0, ReflectionType::Insight))
            .expect("add");

        // "market busy" hits the first twice (2 * 5 = 10) and the third once (6).
        let hits = store.find_relevant("Market busy", 5);
        assert_eq!(texts(&hits), vec!["the market is busy on fridays", "market prices rose"]);

        // Repeated context tokens count each time.
        let hits = store.find_relevant("harbour harbour market", 1);
        assert_eq!(texts(&hits), vec!["i enjoy the quiet harbour"]);

        assert!(store.find_relevant("nothing matches", 5).is_empty());
        assert!(store.iter().all(|r| r.reference_count == 0));
    }

    #[test]
    fn most_important_is_stable_on_ties() {
        let mut store = ReflectionStore::new(10);
        store.add(refl("a", 0, 7.0, ReflectionType::Daily)).expect("add");
        store.add(refl("b", 1, 9.0, ReflectionType::Daily)).expect("add");
        store.add(refl("c", 2, 7.0, ReflectionType::Daily)).expect("add");
        assert_eq!(texts(&store.get_most_important(3)), vec!["b", "a", "c"]);
        assert_eq!(store.get_most_important(1).len(), 1);
    }

    #[test]
    fn identity_state_updates() {
        let mut store = ReflectionStore::new(10);
        store.add_core_principle("Be honest");
        store.add_core_principle("Be honest");
        store.add_long_term_goal("Open a bakery");
        assert_eq!(store.core_principles(), ["Be honest".to_string()]);

        store.update_core_principles(vec!["Be kind".into(), "Be kind".into()]);
        assert_eq!(store.core_principles().len(), 2);
        store.update_long_term_goals(Vec::new());
        assert!(store.long_term_goals().is_empty());
    }

    #[test]
    fn summary_lists_identity_and_latest_entries() {
        let mut store = ReflectionStore::new(10);
        store.add_core_principle("Be honest");
        store.add_long_term_goal("Open a bakery");
        for i in 0..4 {
            store
                .add(refl(&format!("day {i}"), i * 24, 8.0, ReflectionType::Daily))
                .expect("add");
        }
        store
            .add(refl("flour is cheaper in spring", 10, 7.5, ReflectionType::Insight))
            .expect("add");

        let summary = store.get_reflection_summary_at(30, t(100));
        let expected = [
            "Reflection Summary (Last 30 days)",
            "Total reflections: 5",
            "",
            "Core Principles:",
            "  1. Be honest",
            "",
            "Long-term Goals:",
            "  1. Open a bakery",
            "",
            "Recent Insights (1):",
            "  - flour is cheaper in spring",
            "",
            "Recent Daily Reflections (4):",
            "  - day 1",
            "  - day 2",
            "  - day 3",
        ]
        .join("\n");
        assert_eq!(summary, expected);
    }

    #[test]
    fn recent_and_statistics() {
        let mut store = ReflectionStore::new(10);
        assert_eq!(store.get_statistics().total_reflections, 0);

        store.add(refl("a", 0, 8.0, ReflectionType::Daily)).expect("add");
        store.add(refl("b", 24 * 10, 6.0, ReflectionType::Goal)).expect("add");
        assert_eq!(texts(&store.get_recent_at(7, t(24 * 11))), vec!["b"]);

        let stats = store.get_statistics();
        assert_eq!(stats.total_reflections, 2);
        assert!((stats.average_importance - 7.0).abs() < 1e-9);
        assert_eq!(stats.type_breakdown.get(&ReflectionType::Goal), Some(&1));
        assert_eq!(stats.time_span_days, 10);
        assert_eq!(store.to_string(), "ReflectionStore(2 reflections, 0 principles, 0 goals)");
    }

    #[test]
    fn mark_referenced_only_touches_live_ids() {
        let mut store = ReflectionStore::new(10);
        let r = refl("x", 0, 8.0, ReflectionType::Daily);
        let id = r.id.clone();
        store.add(r).expect("add");
        assert!(store.mark_referenced_at(&id, t(1)));
        assert!(!store.mark_referenced_at(&ReflectionId::from("missing"), t(1)));
        assert_eq!(store.get(&id).map(|r| r.reference_count), Some(1));
    }
}
