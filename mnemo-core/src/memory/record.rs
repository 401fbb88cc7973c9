//! Memory Record — one atomic unit of experience.
//!
//! A record is immutable once built except for its access-tracking fields,
//! which retrieval bumps as a side effect.

use chrono::Utc;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

use crate::keywords::{extract_keywords, normalize_keywords};
use crate::retrieval::scoring::CompositeScorer;
use crate::types::{Embedding, MemoryId, Timestamp};

/// Lowest allowed importance.
pub const MIN_IMPORTANCE: f32 = 1.0;
/// Highest allowed importance.
pub const MAX_IMPORTANCE: f32 = 10.0;
/// Importance used when the caller gives none (or gives NaN).
pub const DEFAULT_IMPORTANCE: f32 = 5.0;
/// Source tag used when the caller gives none.
pub const DEFAULT_SOURCE: &str = "observation";

/// Clamp an importance score into `[1, 10]`, mapping NaN to the default.
#[must_use]
pub fn clamp_importance(importance: f32) -> f32 {
    if importance.is_nan() {
        return DEFAULT_IMPORTANCE;
    }
    importance.clamp(MIN_IMPORTANCE, MAX_IMPORTANCE)
}

/// Deserialize an importance score, clamping it like the builders do.
pub(crate) fn deserialize_importance<'de, D>(deserializer: D) -> Result<f32, D::Error>
where
    D: Deserializer<'de>,
{
    f32::deserialize(deserializer).map(clamp_importance)
}

/// A single memory: an observation, utterance, action or mirrored reflection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    /// Derived from `(timestamp, hash(text))`.
    pub id: MemoryId,
    /// What happened, in natural language.
    pub text: String,
    /// When the memory was formed.
    pub timestamp: Timestamp,
    /// Significance in `[1, 10]`.
    #[serde(deserialize_with = "deserialize_importance")]
    pub importance: f32,
    /// Open-ended origin tag (`observation`, `reflection`, `goal_activity`, ...).
    pub source: String,
    /// Vector from the embedding provider, if one was computed.
    #[serde(default)]
    pub embedding: Option<Embedding>,
    /// Free-text context tag.
    #[serde(default)]
    pub associated_event: Option<String>,
    /// Lowercase keywords, deduplicated.
    #[serde(default)]
    pub keywords: Vec<String>,
    /// How many times retrieval has considered this memory.
    #[serde(default)]
    pub access_count: u32,
    /// When retrieval last considered this memory.
    #[serde(default)]
    pub last_accessed: Option<Timestamp>,
}

impl MemoryRecord {
    /// Create a memory stamped with the current time, keywords extracted
    /// from `text`.
    #[must_use]
    pub fn new(text: impl Into<String>, importance: f32, source: impl Into<String>) -> Self {
        Self::builder(text).importance(importance).source(source).build()
    }

    /// Start building a memory with default importance and source.
    #[must_use]
    pub fn builder(text: impl Into<String>) -> MemoryRecordBuilder {
        MemoryRecordBuilder {
            text: text.into(),
            timestamp: None,
            importance: DEFAULT_IMPORTANCE,
            source: DEFAULT_SOURCE.to_string(),
            embedding: None,
            associated_event: None,
            keywords: None,
        }
    }

    /// Record an access at the current time.
    pub fn mark_accessed(&mut self) {
        self.mark_accessed_at(Utc::now());
    }

    /// Record an access at `now`.
    pub fn mark_accessed_at(&mut self, now: Timestamp) {
        self.access_count = self.access_count.saturating_add(1);
        self.last_accessed = Some(now);
    }

    /// `exp(-Δt / 86400)` with Δt in seconds since formation.
    #[must_use]
    pub fn recency_score(&self, now: Timestamp) -> f64 {
        CompositeScorer::default().recency(self, now)
    }

    /// `0.5·relevance + 0.3·importance/10 + 0.2·recency` with the default weights.
    #[must_use]
    pub fn composite_score(&self, now: Timestamp, query_embedding: Option<&Embedding>) -> f64 {
        CompositeScorer::default().score(self, now, query_embedding)
    }

    /// Importance bucket used by the store's importance index.
    #[must_use]
    pub fn importance_level(&self) -> u8 {
        // Importance is clamped to [1, 10], so truncation fits in a u8.
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let level = self.importance.trunc() as u8;
        level
    }

    /// Whether any of `keywords` (already lowercase) is attached to this memory.
    #[must_use]
    pub fn has_any_keyword(&self, keywords: &[String]) -> bool {
        keywords.iter().any(|k| self.keywords.contains(k))
    }
}

impl fmt::Display for MemoryRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let snippet: String = self.text.chars().take(100).collect();
        write!(
            f,
            "MemoryRecord({}, {}, importance={:.1}): {}...",
            self.timestamp.format("%Y-%m-%d %H:%M"),
            self.source,
            self.importance,
            snippet
        )
    }
}

/// Builder for [`MemoryRecord`].
#[derive(Debug, Clone)]
#[must_use]
pub struct MemoryRecordBuilder {
    text: String,
    timestamp: Option<Timestamp>,
    importance: f32,
    source: String,
    embedding: Option<Embedding>,
    associated_event: Option<String>,
    keywords: Option<Vec<String>>,
}

impl MemoryRecordBuilder {
    /// Formation time (defaults to now).
    pub fn timestamp(mut self, timestamp: Timestamp) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Importance, clamped to `[1, 10]` on build.
    pub fn importance(mut self, importance: f32) -> Self {
        self.importance = importance;
        self
    }

    /// Source tag.
    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    /// Pre-computed embedding.
    pub fn embedding(mut self, embedding: Embedding) -> Self {
        self.embedding = Some(embedding);
        self
    }

    /// Associated event tag.
    pub fn associated_event(mut self, event: impl Into<String>) -> Self {
        self.associated_event = Some(event.into());
        self
    }

    /// Explicit keywords (normalized on build). Without this, keywords are
    /// extracted from the text.
    pub fn keywords<I, S>(mut self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.keywords = Some(normalize_keywords(keywords));
        self
    }

    /// Finish the record.
    #[must_use]
    pub fn build(self) -> MemoryRecord {
        let timestamp = self.timestamp.unwrap_or_else(Utc::now);
        let keywords = self.keywords.unwrap_or_else(|| extract_keywords(&self.text));
        MemoryRecord {
            id: MemoryId::derive(&timestamp, &self.text),
            text: self.text,
            timestamp,
            importance: clamp_importance(self.importance),
            source: self.source,
            embedding: self.embedding,
            associated_event: self.associated_event,
            keywords,
            access_count: 0,
            last_accessed: None,
        }
    }
}
