//! Reflection Record — a synthesized insight derived from many memories.
//!
//! A reflection points back at the memories it was built from by id only.
//! Those ids are weak: the memory store may evict the records at any time,
//! after which the ids simply stop resolving.

use std::fmt;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::memory::{MemoryRecord, MemoryStore, clamp_importance};
use crate::types::{MemoryId, ReflectionId, Timestamp};

/// Importance given to reflections when the caller gives none.
pub const DEFAULT_REFLECTION_IMPORTANCE: f32 = 8.0;

/// Kind of reflection, used to partition the reflection store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub enum ReflectionType {
    /// End-of-day synthesis.
    #[default]
    #[serde(rename = "daily_reflection", alias = "daily")]
    Daily,
    /// End-of-week synthesis.
    #[serde(rename = "weekly_reflection", alias = "weekly")]
    Weekly,
    /// A pattern or realization drawn from related memories.
    #[serde(rename = "insight")]
    Insight,
    /// Progress towards a goal.
    #[serde(rename = "goal", alias = "goal_progress")]
    Goal,
    /// End-of-month synthesis.
    #[serde(rename = "monthly_reflection", alias = "monthly")]
    Monthly,
}

impl ReflectionType {
    /// All variants, in declaration order.
    pub const ALL: [Self; 5] = [
        Self::Daily,
        Self::Weekly,
        Self::Insight,
        Self::Goal,
        Self::Monthly,
    ];

    /// Serialized name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Daily => "daily_reflection",
            Self::Weekly => "weekly_reflection",
            Self::Insight => "insight",
            Self::Goal => "goal",
            Self::Monthly => "monthly_reflection",
        }
    }
}

impl fmt::Display for ReflectionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A higher-level insight derived from a set of memories.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReflectionRecord {
    /// `reflection_`-prefixed id derived from `(timestamp, hash(text))`.
    pub id: ReflectionId,
    /// The insight itself.
    pub reflection_text: String,
    /// Weak ids of the memories this reflection was built from.
    #[serde(default, alias = "source_memory_ids")]
    pub source_memories: Vec<MemoryId>,
    /// When the reflection was synthesized.
    pub timestamp: Timestamp,
    /// Significance in `[1, 10]`.
    #[serde(deserialize_with = "crate::memory::record::deserialize_importance")]
    pub importance: f32,
    /// Partition key.
    pub reflection_type: ReflectionType,
    /// How many times the agent has referred back to this reflection.
    #[serde(default)]
    pub reference_count: u32,
    /// When the agent last referred back to this reflection.
    #[serde(default)]
    pub last_referenced: Option<Timestamp>,
}

impl ReflectionRecord {
    /// Start building a reflection (daily, importance 8, stamped now).
    #[must_use]
    pub fn builder(reflection_text: impl Into<String>) -> ReflectionRecordBuilder {
        ReflectionRecordBuilder {
            reflection_text: reflection_text.into(),
            source_memories: Vec::new(),
            timestamp: None,
            importance: DEFAULT_REFLECTION_IMPORTANCE,
            reflection_type: ReflectionType::default(),
        }
    }

    /// Record a reference at the current time.
    pub fn mark_referenced(&mut self) {
        self.mark_referenced_at(Utc::now());
    }

    /// Record a reference at `now`.
    pub fn mark_referenced_at(&mut self, now: Timestamp) {
        self.reference_count = self.reference_count.saturating_add(1);
        self.last_referenced = Some(now);
    }

    /// The source memories that are still live in `store`.
    #[must_use]
    pub fn resolve_sources<'s>(&self, store: &'s MemoryStore) -> Vec<&'s MemoryRecord> {
        store.resolve(&self.source_memories)
    }

    /// Source ids that no longer resolve against `store`.
    #[must_use]
    pub fn unresolved_sources(&self, store: &MemoryStore) -> Vec<&MemoryId> {
        self.source_memories
            .iter()
            .filter(|id| !store.contains(id))
            .collect()
    }

    /// Drop source ids that do not resolve against `store`.
    pub fn relink(&mut self, store: &MemoryStore) {
        self.source_memories.retain(|id| store.contains(id));
    }
}

impl fmt::Display for ReflectionRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let snippet: String = self.reflection_text.chars().take(100).collect();
        write!(
            f,
            "ReflectionRecord({}, {}): {}...",
            self.timestamp.format("%Y-%m-%d"),
            self.reflection_type,
            snippet
        )
    }
}

/// Builder for [`ReflectionRecord`].
#[derive(Debug, Clone)]
#[must_use]
pub struct ReflectionRecordBuilder {
    reflection_text: String,
    source_memories: Vec<MemoryId>,
    timestamp: Option<Timestamp>,
    importance: f32,
    reflection_type: ReflectionType,
}

impl ReflectionRecordBuilder {
    /// Partition key.
    pub fn reflection_type(mut self, reflection_type: ReflectionType) -> Self {
        self.reflection_type = reflection_type;
        self
    }

    /// Synthesis time (defaults to now).
    pub fn timestamp(mut self, timestamp: Timestamp) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Importance, clamped to `[1, 10]` on build.
    pub fn importance(mut self, importance: f32) -> Self {
        self.importance = importance;
        self
    }

    /// Weak ids of the source memories; duplicates are dropped on build.
    pub fn sources<I>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = MemoryId>,
    {
        self.source_memories.extend(ids);
        self
    }

    /// Convenience over [`sources`](Self::sources) for borrowed records.
    pub fn source_records<'a, I>(self, records: I) -> Self
    where
        I: IntoIterator<Item = &'a MemoryRecord>,
    {
        self.sources(records.into_iter().map(|r| r.id.clone()))
    }

    /// Finish the reflection.
    #[must_use]
    pub fn build(self) -> ReflectionRecord {
        let timestamp = self.timestamp.unwrap_or_else(Utc::now);
        let mut source_memories: Vec<MemoryId> = Vec::with_capacity(self.source_memories.len());
        for id in self.source_memories {
            if !source_memories.contains(&id) {
                source_memories.push(id);
            }
        }
        ReflectionRecord {
            id: ReflectionId::derive(&timestamp, &self.reflection_text),
            reflection_text: self.reflection_text,
            source_memories,
            timestamp,
            importance: clamp_importance(self.importance),
            reflection_type: self.reflection_type,
            reference_count: 0,
            last_referenced: None,
        }
    }
}
