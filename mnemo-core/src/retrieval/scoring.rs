//! Per-factor scoring functions for memory retrieval.
//!
//! Score = w₁·Relevance(m) + w₂·Importance(m) + w₃·Recency(m)
//!
//! Where:
//!   Relevance(m)  = cosine_similarity(query_embedding, memory_embedding), 0 if either is absent
//!   Importance(m) = importance / 10
//!   Recency(m)    = exp(-ΔT / τ), ΔT in seconds, τ = 86 400 by default
//!
//! Defaults are w = (0.5, 0.3, 0.2).

use crate::config::RetrievalConfig;
use crate::memory::MemoryRecord;
use crate::retrieval::ScoreBreakdown;
use crate::types::{Embedding, Timestamp};

/// Default recency decay constant τ, in seconds (one day).
pub const DEFAULT_DECAY_SECONDS: f64 = 86_400.0;

/// Weights of the three score terms.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoringWeights {
    /// Weight of cosine relevance.
    pub relevance: f64,
    /// Weight of normalized importance.
    pub importance: f64,
    /// Weight of recency.
    pub recency: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            relevance: 0.5,
            importance: 0.3,
            recency: 0.2,
        }
    }
}

/// Pure composite scoring function.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompositeScorer {
    /// Term weights.
    pub weights: ScoringWeights,
    /// Recency decay constant τ in seconds.
    pub decay_seconds: f64,
}

impl Default for CompositeScorer {
    fn default() -> Self {
        Self {
            weights: ScoringWeights::default(),
            decay_seconds: DEFAULT_DECAY_SECONDS,
        }
    }
}

impl From<&RetrievalConfig> for CompositeScorer {
    fn from(config: &RetrievalConfig) -> Self {
        Self {
            weights: ScoringWeights {
                relevance: config.relevance_weight,
                importance: config.importance_weight,
                recency: config.recency_weight,
            },
            decay_seconds: config.recency_decay_seconds,
        }
    }
}

impl CompositeScorer {
    /// Compute the weighted breakdown for a single memory.
    #[must_use]
    pub fn breakdown(
        &self,
        memory: &MemoryRecord,
        now: Timestamp,
        query_embedding: Option<&Embedding>,
    ) -> ScoreBreakdown {
        ScoreBreakdown {
            relevance: self.weights.relevance * relevance_score(memory, query_embedding),
            importance: self.weights.importance * importance_score(memory),
            recency: self.weights.recency * self.recency(memory, now),
        }
    }

    /// Sum of the weighted terms.
    #[must_use]
    pub fn score(
        &self,
        memory: &MemoryRecord,
        now: Timestamp,
        query_embedding: Option<&Embedding>,
    ) -> f64 {
        self.breakdown(memory, now, query_embedding).total()
    }

    /// Recency score: R = e^(-ΔT / τ).
    ///
    /// ΔT saturates at zero for memories stamped after `now`.
    #[must_use]
    pub fn recency(&self, memory: &MemoryRecord, now: Timestamp) -> f64 {
        #[allow(clippy::cast_precision_loss)]
        let delta_seconds = (now - memory.timestamp).num_milliseconds().max(0) as f64 / 1000.0;
        (-delta_seconds / self.decay_seconds).exp()
    }
}

/// Relevance score: cosine similarity between query and memory embeddings.
///
/// 0.0 when either embedding is missing, has zero norm, or the dimensions
/// disagree.
#[must_use]
pub fn relevance_score(memory: &MemoryRecord, query_embedding: Option<&Embedding>) -> f64 {
    match (memory.embedding.as_ref(), query_embedding) {
        (Some(stored), Some(query)) => f64::from(stored.cosine_similarity(query)),
        _ => 0.0,
    }
}

/// Importance score: importance normalized to `[0.1, 1.0]`.
#[must_use]
pub fn importance_score(memory: &MemoryRecord) -> f64 {
    f64::from(memory.importance) / 10.0
}
