//! Memory Retrieval — filtered, composite-scored ranking.
//!
//! The retrieval algorithm combines three weighted factors:
//!   Score = w₁·Relevance + w₂·Importance + w₃·Recency
//!
//! Based on the Stanford Generative Agents retrieval function. Filtering
//! and ranking are driven by [`MemoryStore::retrieve`](crate::memory::MemoryStore::retrieve);
//! this module holds the query and result types plus the ranking order.

pub mod context;
pub mod scoring;

use std::cmp::Ordering;

use ordered_float::OrderedFloat;

use crate::memory::MemoryRecord;
use crate::types::{Embedding, TimeRange};

/// A retrieval request: optional query vector, result count and filters.
///
/// All filters are conjunctive; a filter left unset does not restrict.
#[derive(Debug, Clone)]
#[must_use]
pub struct RetrievalQuery {
    /// Vector to compare stored embeddings against.
    pub query_embedding: Option<Embedding>,
    /// Maximum number of results.
    pub k: usize,
    /// Minimum importance; only applied when greater than zero.
    pub importance_threshold: f32,
    /// Accepted source tags.
    pub source_filter: Option<Vec<String>>,
    /// Inclusive timestamp window.
    pub time_range: Option<TimeRange>,
    /// Any-match keyword filter (lowercased on construction).
    pub keywords: Option<Vec<String>>,
}

impl Default for RetrievalQuery {
    fn default() -> Self {
        Self::new(10)
    }
}

impl RetrievalQuery {
    /// Unfiltered query returning at most `k` results.
    pub fn new(k: usize) -> Self {
        Self {
            query_embedding: None,
            k,
            importance_threshold: 0.0,
            source_filter: None,
            time_range: None,
            keywords: None,
        }
    }

    /// Rank by cosine similarity to `embedding`.
    pub fn embedding(mut self, embedding: Embedding) -> Self {
        self.query_embedding = Some(embedding);
        self
    }

    /// Keep only memories with `importance >= threshold`.
    pub fn importance_threshold(mut self, threshold: f32) -> Self {
        self.importance_threshold = threshold;
        self
    }

    /// Keep only memories whose source is one of `sources`.
    pub fn sources<I, S>(mut self, sources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.source_filter = Some(sources.into_iter().map(Into::into).collect());
        self
    }

    /// Keep only memories formed inside `range`.
    pub fn time_range(mut self, range: TimeRange) -> Self {
        self.time_range = Some(range);
        self
    }

    /// Keep only memories carrying at least one of `keywords`.
    pub fn keywords<I, S>(mut self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.keywords = Some(
            keywords
                .into_iter()
                .map(|k| k.as_ref().trim().to_lowercase())
                .collect(),
        );
        self
    }

    /// Whether `memory` passes every active filter.
    #[must_use]
    pub fn matches(&self, memory: &MemoryRecord) -> bool {
        if self.importance_threshold > 0.0 && memory.importance < self.importance_threshold {
            return false;
        }
        if let Some(sources) = self.source_filter.as_ref().filter(|s| !s.is_empty()) {
            if !sources.iter().any(|s| *s == memory.source) {
                return false;
            }
        }
        if let Some(range) = &self.time_range {
            if !range.contains(&memory.timestamp) {
                return false;
            }
        }
        if let Some(keywords) = self.keywords.as_ref().filter(|k| !k.is_empty()) {
            if !memory.has_any_keyword(keywords) {
                return false;
            }
        }
        true
    }
}

/// A scored retrieval result.
#[derive(Debug, Clone)]
pub struct RetrievedMemory<'a> {
    /// The retrieved memory (after access marking).
    pub record: &'a MemoryRecord,
    /// Combined retrieval score.
    pub score: f64,
    /// Per-factor breakdown.
    pub breakdown: ScoreBreakdown,
}

/// Breakdown of a retrieval score into its weighted component factors.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ScoreBreakdown {
    /// Relevance factor contribution.
    pub relevance: f64,
    /// Importance factor contribution.
    pub importance: f64,
    /// Recency factor contribution.
    pub recency: f64,
}

impl ScoreBreakdown {
    /// Sum of all contributions.
    #[must_use]
    pub fn total(&self) -> f64 {
        self.relevance + self.importance + self.recency
    }
}

/// Ranking order: score descending, then id ascending on ties.
#[must_use]
pub fn rank_order(a: (f64, &MemoryRecord), b: (f64, &MemoryRecord)) -> Ordering {
    OrderedFloat(b.0)
        .cmp(&OrderedFloat(a.0))
        .then_with(|| a.1.id.cmp(&b.1.id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn rec(text: &str, importance: f32, source: &str) -> MemoryRecord {
        let ts = Utc.with_ymd_and_hms(2024, 2, 2, 10, 0, 0).single().expect("valid date");
        MemoryRecord::builder(text)
            .timestamp(ts)
            .importance(importance)
            .source(source)
            .build()
    }

    #[test]
    fn empty_query_matches_everything() {
        let q = RetrievalQuery::new(5);
        assert!(q.matches(&rec("anything", 1.0, "observation")));
    }

    #[test]
    fn filters_are_conjunctive() {
        let q = RetrievalQuery::new(5)
            .importance_threshold(5.0)
            .sources(["observation"])
            .keywords(["Market"]);
        assert!(q.matches(&rec("went to the market", 6.0, "observation")));
        assert!(!q.matches(&rec("went to the market", 4.0, "observation")));
        assert!(!q.matches(&rec("went to the market", 6.0, "reflection")));
        assert!(!q.matches(&rec("went to the harbour", 6.0, "observation")));
    }

    #[test]
    fn time_range_filter_is_inclusive() {
        let m = rec("x", 5.0, "observation");
        let exact = RetrievalQuery::new(1).time_range(TimeRange::new(m.timestamp, m.timestamp));
        assert!(exact.matches(&m));
        let later = RetrievalQuery::new(1).time_range(TimeRange::new(
            m.timestamp + Duration::seconds(1),
            m.timestamp + Duration::hours(1),
        ));
        assert!(!later.matches(&m));
    }

    #[test]
    fn empty_filter_lists_do_not_restrict() {
        let q = RetrievalQuery::new(5)
            .sources(Vec::<String>::new())
            .keywords(Vec::<String>::new());
        assert!(q.matches(&rec("x", 5.0, "observation")));
    }

    #[test]
    fn rank_order_breaks_ties_by_id() {
        let a = rec("alpha", 5.0, "observation");
        let b = rec("bravo", 5.0, "observation");
        let (first, second) = if a.id < b.id { (&a, &b) } else { (&b, &a) };
        assert_eq!(rank_order((0.5, first), (0.5, second)), Ordering::Less);
        assert_eq!(rank_order((0.4, first), (0.5, second)), Ordering::Greater);
    }
}
