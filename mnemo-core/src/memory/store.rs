//! Memory Store — the bounded, indexed, rankable memory stream.
//!
//! Records live in an arena of slots addressed by a stable [`Handle`].
//! Secondary indices (importance bucket, source, keyword, id) map keys to
//! sets of handles and are updated in lock-step with insert and evict.
//! Eviction removes the oldest-timestamped record whenever an insert pushes
//! the store past `max_memories`.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::path::Path;
use std::time::Instant;

use chrono::{Duration, Utc};
use serde::Serialize;
use tracing::debug;

use crate::config::{AccessMarking, MnemoConfig, PersistenceConfig};
use crate::error::{MnemoError, Result};
use crate::eviction::{EvictionQueue, over_capacity};
use crate::memory::MemoryRecord;
use crate::persistence;
use crate::retrieval::scoring::CompositeScorer;
use crate::retrieval::{RetrievalQuery, RetrievedMemory, ScoreBreakdown, rank_order};
use crate::types::{MemoryId, Timestamp};

/// Default capacity of a memory store.
pub const DEFAULT_MAX_MEMORIES: usize = 10_000;

/// Number of snippets per source in [`MemoryStore::summarize_period`].
const SUMMARY_TOP_PER_SOURCE: usize = 3;
/// Snippet length in characters in [`MemoryStore::summarize_period`].
const SUMMARY_SNIPPET_CHARS: usize = 100;

/// Stable arena address of a live record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Handle(usize);

#[derive(Debug, Clone)]
struct Slot {
    seq: u64,
    record: MemoryRecord,
}

/// Aggregate statistics over a memory store.
///
/// `total_memories == 0` flags an empty store; the other fields are then
/// zero / `None`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MemoryStats {
    /// Number of live records.
    pub total_memories: usize,
    /// Mean importance.
    pub average_importance: f64,
    /// Record count per source tag.
    pub source_breakdown: BTreeMap<String, usize>,
    /// Oldest timestamp.
    pub oldest_memory: Option<Timestamp>,
    /// Newest timestamp.
    pub newest_memory: Option<Timestamp>,
    /// Whole days between oldest and newest.
    pub time_span_days: i64,
}

/// Bounded multiset of [`MemoryRecord`]s with secondary indices.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    slots: Vec<Option<Slot>>,
    free: Vec<usize>,
    len: usize,
    next_seq: u64,
    max_memories: usize,
    access_marking: AccessMarking,
    scorer: CompositeScorer,
    by_id: HashMap<MemoryId, Handle>,
    by_seq: BTreeMap<u64, Handle>,
    by_importance: BTreeMap<u8, BTreeSet<Handle>>,
    by_source: BTreeMap<String, BTreeSet<Handle>>,
    by_keyword: BTreeMap<String, BTreeSet<Handle>>,
    eviction: EvictionQueue<Handle>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_MEMORIES)
    }
}

impl MemoryStore {
    /// Create an empty store holding at most `max_memories` records.
    ///
    /// A capacity of zero is raised to one.
    #[must_use]
    pub fn new(max_memories: usize) -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            len: 0,
            next_seq: 0,
            max_memories: max_memories.max(1),
            access_marking: AccessMarking::default(),
            scorer: CompositeScorer::default(),
            by_id: HashMap::new(),
            by_seq: BTreeMap::new(),
            by_importance: BTreeMap::new(),
            by_source: BTreeMap::new(),
            by_keyword: BTreeMap::new(),
            eviction: EvictionQueue::new(),
        }
    }

    /// Create an empty store from configuration.
    #[must_use]
    pub fn from_config(config: &MnemoConfig) -> Self {
        Self::new(config.memory.max_memories)
            .with_access_marking(config.memory.access_marking)
            .with_scorer(CompositeScorer::from(&config.retrieval))
    }

    /// Replace the scoring function.
    #[must_use]
    pub fn with_scorer(mut self, scorer: CompositeScorer) -> Self {
        self.scorer = scorer;
        self
    }

    /// Choose which retrieval candidates get access-marked.
    #[must_use]
    pub fn with_access_marking(mut self, marking: AccessMarking) -> Self {
        self.access_marking = marking;
        self
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    /// Number of live records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the store holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Configured capacity.
    #[must_use]
    pub fn max_memories(&self) -> usize {
        self.max_memories
    }

    /// Configured access-marking breadth.
    #[must_use]
    pub fn access_marking(&self) -> AccessMarking {
        self.access_marking
    }

    /// The scoring function used by [`retrieve`](Self::retrieve).
    #[must_use]
    pub fn scorer(&self) -> &CompositeScorer {
        &self.scorer
    }

    /// Look up a live record by id.
    #[must_use]
    pub fn get(&self, id: &MemoryId) -> Option<&MemoryRecord> {
        self.by_id.get(id).and_then(|&h| self.record(h))
    }

    /// Whether a record with this id is live.
    #[must_use]
    pub fn contains(&self, id: &MemoryId) -> bool {
        self.by_id.contains_key(id)
    }

    /// Resolve weak ids to live records, silently skipping the ones that are gone.
    pub fn resolve<'a, I>(&self, ids: I) -> Vec<&MemoryRecord>
    where
        I: IntoIterator<Item = &'a MemoryId>,
    {
        ids.into_iter().filter_map(|id| self.get(id)).collect()
    }

    /// All live records in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &MemoryRecord> + '_ {
        self.by_seq.values().filter_map(|&h| self.record(h))
    }

    /// Records carrying `keyword` (lowercase), in insertion order.
    #[must_use]
    pub fn keyword_bucket(&self, keyword: &str) -> Vec<&MemoryRecord> {
        self.collect_ordered(self.by_keyword.get(keyword))
    }

    /// Records whose truncated importance equals `level`, in insertion order.
    #[must_use]
    pub fn importance_bucket(&self, level: u8) -> Vec<&MemoryRecord> {
        self.collect_ordered(self.by_importance.get(&level))
    }

    /// Distinct source tags currently present, sorted.
    #[must_use]
    pub fn sources(&self) -> Vec<&str> {
        self.by_source.keys().map(String::as_str).collect()
    }

    fn record(&self, handle: Handle) -> Option<&MemoryRecord> {
        self.slots
            .get(handle.0)
            .and_then(Option::as_ref)
            .map(|slot| &slot.record)
    }

    fn record_mut(&mut self, handle: Handle) -> Option<&mut MemoryRecord> {
        self.slots
            .get_mut(handle.0)
            .and_then(Option::as_mut)
            .map(|slot| &mut slot.record)
    }

    fn seq_of(&self, handle: Handle) -> u64 {
        self.slots
            .get(handle.0)
            .and_then(Option::as_ref)
            .map_or(u64::MAX, |slot| slot.seq)
    }

    fn collect_ordered(&self, handles: Option<&BTreeSet<Handle>>) -> Vec<&MemoryRecord> {
        let Some(handles) = handles else {
            return Vec::new();
        };
        let mut ordered: Vec<Handle> = handles.iter().copied().collect();
        ordered.sort_by_key(|&h| self.seq_of(h));
        ordered.into_iter().filter_map(|h| self.record(h)).collect()
    }

    // ------------------------------------------------------------------
    // Insert / evict
    // ------------------------------------------------------------------

    /// Add a record, evicting the oldest one if capacity is exceeded.
    ///
    /// Returns the evicted record, if any.
    ///
    /// # Errors
    ///
    /// Returns [`MnemoError::DuplicateId`] if a record with the same id is
    /// already live; the store is left unchanged.
    pub fn add(&mut self, record: MemoryRecord) -> Result<Option<MemoryRecord>> {
        if self.by_id.contains_key(&record.id) {
            return Err(MnemoError::DuplicateId(record.id.to_string()));
        }

        let handle = self.insert(record);
        if let Some(added) = self.record(handle) {
            debug!(
                id = %added.id,
                source = %added.source,
                importance = added.importance,
                len = self.len,
                "Added memory"
            );
        }

        let evicted = if over_capacity(self.len, self.max_memories) {
            self.evict_oldest()
        } else {
            None
        };

        debug_assert!(
            self.len <= self.max_memories,
            "memory store exceeded capacity: {} > {}",
            self.len,
            self.max_memories
        );
        Ok(evicted)
    }

    fn insert(&mut self, record: MemoryRecord) -> Handle {
        let seq = self.next_seq;
        self.next_seq += 1;

        let handle = match self.free.pop() {
            Some(index) => Handle(index),
            None => {
                self.slots.push(None);
                Handle(self.slots.len() - 1)
            }
        };

        self.by_id.insert(record.id.clone(), handle);
        self.by_seq.insert(seq, handle);
        self.by_importance
            .entry(record.importance_level())
            .or_default()
            .insert(handle);
        self.by_source
            .entry(record.source.clone())
            .or_default()
            .insert(handle);
        for keyword in &record.keywords {
            self.by_keyword
                .entry(keyword.clone())
                .or_default()
                .insert(handle);
        }
        self.eviction.push(record.timestamp, seq, handle);

        self.slots[handle.0] = Some(Slot { seq, record });
        self.len += 1;
        handle
    }

    /// Evict the record with the oldest timestamp. Returns it, if any.
    pub fn evict_oldest(&mut self) -> Option<MemoryRecord> {
        let handle = self.eviction.pop_oldest()?;
        let slot = self.slots.get_mut(handle.0).and_then(Option::take)?;
        self.free.push(handle.0);
        self.len -= 1;

        let record = slot.record;
        self.by_id.remove(&record.id);
        self.by_seq.remove(&slot.seq);
        remove_from_index(&mut self.by_importance, &record.importance_level(), handle);
        remove_from_index(&mut self.by_source, &record.source, handle);
        for keyword in &record.keywords {
            remove_from_index(&mut self.by_keyword, keyword, handle);
        }

        debug!(id = %record.id, timestamp = %record.timestamp, "Evicted oldest memory");
        Some(record)
    }

    /// Change the capacity, evicting oldest-first until the store fits.
    ///
    /// A capacity of zero is raised to one. Returns the evicted records.
    pub fn set_max_memories(&mut self, max_memories: usize) -> Vec<MemoryRecord> {
        self.max_memories = max_memories.max(1);
        let mut evicted = Vec::new();
        while over_capacity(self.len, self.max_memories) {
            match self.evict_oldest() {
                Some(record) => evicted.push(record),
                None => break,
            }
        }
        evicted
    }

    /// Remove every record and reset all indices.
    pub fn clear(&mut self) {
        let max = self.max_memories;
        let marking = self.access_marking;
        let scorer = self.scorer;
        *self = Self::new(max).with_access_marking(marking).with_scorer(scorer);
    }

    // ------------------------------------------------------------------
    // Retrieval
    // ------------------------------------------------------------------

    /// Retrieve the top-k memories for `query`, scored at the current time.
    ///
    /// Access counters are bumped as a side effect (see [`AccessMarking`]).
    pub fn retrieve(&mut self, query: &RetrievalQuery) -> Vec<RetrievedMemory<'_>> {
        self.retrieve_at(query, Utc::now())
    }

    /// Retrieve the top-k memories for `query`, scored at `now`.
    ///
    /// 1. filter by importance, source, time range and keywords;
    /// 2. mark candidates accessed and compute composite scores;
    /// 3. sort by score descending, ties broken by ascending id;
    /// 4. keep the first `k`.
    pub fn retrieve_at(&mut self, query: &RetrievalQuery, now: Timestamp) -> Vec<RetrievedMemory<'_>> {
        let start = Instant::now();

        let candidates: Vec<Handle> = self
            .by_seq
            .values()
            .copied()
            .filter(|&h| self.record(h).is_some_and(|r| query.matches(r)))
            .collect();

        if candidates.is_empty() {
            return Vec::new();
        }

        if self.access_marking == AccessMarking::AllCandidates {
            for &h in &candidates {
                if let Some(record) = self.record_mut(h) {
                    record.mark_accessed_at(now);
                }
            }
        }

        let query_embedding = query.query_embedding.as_ref();
        let mut scored: Vec<(ScoreBreakdown, Handle)> = candidates
            .iter()
            .filter_map(|&h| {
                self.record(h)
                    .map(|r| (self.scorer.breakdown(r, now, query_embedding), h))
            })
            .collect();

        scored.sort_by(|a, b| match (self.record(a.1), self.record(b.1)) {
            (Some(ra), Some(rb)) => rank_order((a.0.total(), ra), (b.0.total(), rb)),
            _ => std::cmp::Ordering::Equal,
        });
        scored.truncate(query.k);

        if self.access_marking == AccessMarking::ReturnedOnly {
            for &(_, h) in &scored {
                if let Some(record) = self.record_mut(h) {
                    record.mark_accessed_at(now);
                }
            }
        }

        debug!(
            candidates = candidates.len(),
            returned = scored.len(),
            elapsed_us = start.elapsed().as_micros(),
            "Retrieved memories"
        );

        scored
            .into_iter()
            .filter_map(|(breakdown, h)| {
                self.record(h).map(|record| RetrievedMemory {
                    record,
                    score: breakdown.total(),
                    breakdown,
                })
            })
            .collect()
    }

    // ------------------------------------------------------------------
    // Simple views (no scoring, no access marking)
    // ------------------------------------------------------------------

    /// Records with `start <= timestamp <= end`, in insertion order.
    #[must_use]
    pub fn get_memories_by_timeframe(&self, start: Timestamp, end: Timestamp) -> Vec<&MemoryRecord> {
        self.iter()
            .filter(|m| start <= m.timestamp && m.timestamp <= end)
            .collect()
    }

    /// Records with the given source tag, in insertion order.
    #[must_use]
    pub fn get_memories_by_source(&self, source: &str) -> Vec<&MemoryRecord> {
        self.collect_ordered(self.by_source.get(source))
    }

    /// Records formed in the last `hours` hours.
    #[must_use]
    pub fn get_recent_memories(&self, hours: u32) -> Vec<&MemoryRecord> {
        self.get_recent_memories_at(hours, Utc::now())
    }

    /// Records formed in the `hours` hours before `now`.
    #[must_use]
    pub fn get_recent_memories_at(&self, hours: u32, now: Timestamp) -> Vec<&MemoryRecord> {
        let cutoff = now - Duration::hours(i64::from(hours));
        self.iter().filter(|m| m.timestamp >= cutoff).collect()
    }

    /// Records with `importance >= min_importance`, in insertion order.
    #[must_use]
    pub fn get_important_memories(&self, min_importance: f32) -> Vec<&MemoryRecord> {
        // Buckets below trunc(min) cannot contain a match.
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let floor = min_importance.clamp(0.0, 10.0).trunc() as u8;
        let mut handles: Vec<Handle> = self
            .by_importance
            .range(floor..)
            .flat_map(|(_, set)| set.iter().copied())
            .filter(|&h| self.record(h).is_some_and(|r| r.importance >= min_importance))
            .collect();
        handles.sort_by_key(|&h| self.seq_of(h));
        handles.into_iter().filter_map(|h| self.record(h)).collect()
    }

    /// Text digest of a period: records grouped by source, the three most
    /// important snippets per source.
    #[must_use]
    pub fn summarize_period(&self, start: Timestamp, end: Timestamp) -> String {
        let period = self.get_memories_by_timeframe(start, end);
        let start_s = start.format("%Y-%m-%d %H:%M");
        let end_s = end.format("%Y-%m-%d %H:%M");

        if period.is_empty() {
            return format!("No memories from {start_s} to {end_s}");
        }

        let mut groups: Vec<(&str, Vec<&MemoryRecord>)> = Vec::new();
        for memory in &period {
            match groups.iter_mut().find(|(s, _)| *s == memory.source) {
                Some((_, members)) => members.push(memory),
                None => groups.push((memory.source.as_str(), vec![memory])),
            }
        }

        let mut lines = vec![
            format!("Period: {start_s} to {end_s}"),
            format!("Total memories: {}", period.len()),
        ];
        for (source, mut members) in groups {
            lines.push(format!("\n{} ({} memories):", title_case(source), members.len()));
            members.sort_by(|a, b| b.importance.total_cmp(&a.importance));
            for memory in members.into_iter().take(SUMMARY_TOP_PER_SOURCE) {
                let snippet: String = memory.text.chars().take(SUMMARY_SNIPPET_CHARS).collect();
                lines.push(format!("  - {snippet}..."));
            }
        }
        lines.join("\n")
    }

    /// Aggregate statistics.
    #[must_use]
    pub fn get_statistics(&self) -> MemoryStats {
        if self.is_empty() {
            return MemoryStats::default();
        }

        let mut source_breakdown = BTreeMap::new();
        let mut importance_sum = 0.0_f64;
        let mut oldest: Option<Timestamp> = None;
        let mut newest: Option<Timestamp> = None;
        for memory in self.iter() {
            importance_sum += f64::from(memory.importance);
            *source_breakdown.entry(memory.source.clone()).or_insert(0) += 1;
            oldest = Some(oldest.map_or(memory.timestamp, |t| t.min(memory.timestamp)));
            newest = Some(newest.map_or(memory.timestamp, |t| t.max(memory.timestamp)));
        }

        #[allow(clippy::cast_precision_loss)]
        let average_importance = importance_sum / self.len as f64;
        let time_span_days = match (oldest, newest) {
            (Some(o), Some(n)) => (n - o).num_days(),
            _ => 0,
        };

        MemoryStats {
            total_memories: self.len,
            average_importance,
            source_breakdown,
            oldest_memory: oldest,
            newest_memory: newest,
            time_span_days,
        }
    }

    // ------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------

    /// Write a snapshot to `path` with default persistence settings.
    ///
    /// # Errors
    ///
    /// Returns [`MnemoError::Io`] or [`MnemoError::Serialization`] on failure.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        self.save_with(path, &PersistenceConfig::default())
    }

    /// Write a snapshot to `path`.
    ///
    /// # Errors
    ///
    /// Returns [`MnemoError::Io`] or [`MnemoError::Serialization`] on failure.
    pub fn save_with(&self, path: impl AsRef<Path>, config: &PersistenceConfig) -> Result<()> {
        persistence::save_memories(self, path.as_ref(), config)
    }

    /// Replace the contents of this store with the snapshot at `path`.
    ///
    /// Records are re-added one by one under the current capacity, so
    /// eviction applies exactly as it does live. The store then adopts the
    /// snapshot's capacity. On error the store is left unchanged.
    ///
    /// # Errors
    ///
    /// [`MnemoError::SnapshotNotFound`] if the file does not exist,
    /// [`MnemoError::MalformedSnapshot`] if it cannot be decoded.
    pub fn load(&mut self, path: impl AsRef<Path>) -> Result<usize> {
        self.load_with(path, &PersistenceConfig::default())
    }

    /// [`load`](Self::load) with explicit persistence settings.
    ///
    /// Returns the number of records live after the load.
    ///
    /// # Errors
    ///
    /// See [`load`](Self::load).
    pub fn load_with(&mut self, path: impl AsRef<Path>, config: &PersistenceConfig) -> Result<usize> {
        let path = path.as_ref();
        let snapshot = persistence::read_memories(path, config)?;

        let mut rebuilt = Self::new(self.max_memories)
            .with_access_marking(self.access_marking)
            .with_scorer(self.scorer);
        for record in snapshot.records {
            rebuilt
                .add(record)
                .map_err(|e| MnemoError::malformed(path, e))?;
        }

        // Zero means the snapshot carried no capacity.
        if snapshot.max_capacity > 0 && snapshot.max_capacity != rebuilt.max_memories {
            let evicted = rebuilt.set_max_memories(snapshot.max_capacity);
            debug!(
                path = %path.display(),
                capacity = rebuilt.max_memories,
                evicted = evicted.len(),
                "Adopted snapshot capacity"
            );
        }

        *self = rebuilt;
        Ok(self.len)
    }
}

impl fmt::Display for MemoryStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stats = self.get_statistics();
        write!(
            f,
            "MemoryStore({} memories, avg_importance={:.1})",
            stats.total_memories, stats.average_importance
        )
    }
}

/// Drop `handle` from the set under `key`, pruning the key once empty.
fn remove_from_index<K: Ord>(index: &mut BTreeMap<K, BTreeSet<Handle>>, key: &K, handle: Handle) {
    if let Some(set) = index.get_mut(key) {
        set.remove(&handle);
        if set.is_empty() {
            index.remove(key);
        }
    }
}

/// Title casing: uppercase the first letter of every run of
/// letters, lowercase the rest (`goal_activity` → `Goal_Activity`).
fn title_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut prev_is_letter = false;
    for c in s.chars() {
        if c.is_alphabetic() {
            if prev_is_letter {
                out.extend(c.to_lowercase());
            } else {
                out.extend(c.to_uppercase());
            }
            prev_is_letter = true;
        } else {
            out.push(c);
            prev_is_letter = false;
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
