//! Core type definitions for the Mnemo memory substrate.
//!
//! All types are serializable; identifiers are derived deterministically
//! from a timestamp and a stable hash of the record's text.

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Wall-clock timestamp used for every record.
pub type Timestamp = DateTime<Utc>;

// ---------------------------------------------------------------------------
// Stable content hash
// ---------------------------------------------------------------------------

/// 64-bit FNV-1a hash of `text`.
///
/// Unlike `std`'s `DefaultHasher` this is stable across processes and
/// toolchains, so ids derived from it survive a save/load cycle.
#[must_use]
pub fn stable_hash(text: &str) -> u64 {
    const OFFSET: u64 = 0xCBF2_9CE4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01B3;
    let mut hash = OFFSET;
    for &byte in text.as_bytes() {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}

fn derive_id(timestamp: &Timestamp, text: &str) -> String {
    format!(
        "{}_{:016x}",
        timestamp.to_rfc3339_opts(SecondsFormat::Micros, true),
        stable_hash(text)
    )
}

// ---------------------------------------------------------------------------
// Identity Types
// ---------------------------------------------------------------------------

/// Unique identifier for a memory record.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MemoryId(pub String);

impl MemoryId {
    /// Derive the id of a memory created at `timestamp` with content `text`.
    #[must_use]
    pub fn derive(timestamp: &Timestamp, text: &str) -> Self {
        Self(derive_id(timestamp, text))
    }

    /// Borrow the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MemoryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MemoryId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Unique identifier for a reflection record.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReflectionId(pub String);

impl ReflectionId {
    /// Derive the id of a reflection created at `timestamp` with content `text`.
    #[must_use]
    pub fn derive(timestamp: &Timestamp, text: &str) -> Self {
        Self(format!("reflection_{}", derive_id(timestamp, text)))
    }

    /// Borrow the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ReflectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ReflectionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

// ---------------------------------------------------------------------------
// Time
// ---------------------------------------------------------------------------

/// Inclusive time window `[start, end]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    /// First instant included in the range.
    pub start: Timestamp,
    /// Last instant included in the range.
    pub end: Timestamp,
}

impl TimeRange {
    /// Create a new range.
    #[must_use]
    pub fn new(start: Timestamp, end: Timestamp) -> Self {
        Self { start, end }
    }

    /// The window covering the last `hours` hours up to and including `now`.
    #[must_use]
    pub fn last_hours(hours: u32, now: Timestamp) -> Self {
        Self {
            start: now - Duration::hours(i64::from(hours)),
            end: now,
        }
    }

    /// Whether `ts` falls inside the range (both ends inclusive).
    #[must_use]
    pub fn contains(&self, ts: &Timestamp) -> bool {
        self.start <= *ts && *ts <= self.end
    }
}

// ---------------------------------------------------------------------------
// Memory Embedding Vector
// ---------------------------------------------------------------------------

/// A dense vector embedding supplied by an
/// [`EmbeddingProvider`](crate::embedding::EmbeddingProvider).
///
/// Opaque to the stores; only used for cosine-similarity relevance.
/// Serializes as a plain JSON array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Embedding(pub Vec<f32>);

impl Embedding {
    /// A zero vector of the given dimensionality.
    #[must_use]
    pub fn zeros(dimensions: usize) -> Self {
        Self(vec![0.0; dimensions])
    }

    /// Cosine similarity between two embeddings.
    ///
    /// Returns 0.0 if the dimensions differ, if either vector has zero
    /// norm, or if the result is not finite.
    #[must_use]
    pub fn cosine_similarity(&self, other: &Self) -> f32 {
        if self.0.len() != other.0.len() || self.0.is_empty() {
            return 0.0;
        }
        // Accumulate in f64 so large components cannot overflow.
        let (mut dot, mut norm_a, mut norm_b) = (0.0_f64, 0.0_f64, 0.0_f64);
        for (&a, &b) in self.0.iter().zip(other.0.iter()) {
            let (a, b) = (f64::from(a), f64::from(b));
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }
        let denom = norm_a.sqrt() * norm_b.sqrt();
        if denom == 0.0 {
            return 0.0;
        }
        let sim = dot / denom;
        if !sim.is_finite() {
            return 0.0;
        }
        #[allow(clippy::cast_possible_truncation)]
        let sim = sim.clamp(-1.0, 1.0) as f32;
        sim
    }

    /// Euclidean norm of the vector.
    #[must_use]
    pub fn norm(&self) -> f32 {
        self.0.iter().map(|x| x * x).sum::<f32>().sqrt()
    }

    /// Whether every component is finite.
    #[must_use]
    pub fn is_finite(&self) -> bool {
        self.0.iter().all(|x| x.is_finite())
    }

    /// Dimensionality of the embedding.
    #[must_use]
    pub fn dimensions(&self) -> usize {
        self.0.len()
    }
}

impl From<Vec<f32>> for Embedding {
    fn from(value: Vec<f32>) -> Self {
        Self(value)
    }
}
