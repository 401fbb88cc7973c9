//! Vector embedding abstraction layer.
//!
//! The stores never compute embeddings themselves: callers embed text with
//! an injected [`EmbeddingProvider`] and hand the vectors in. Providers may
//! change dimensionality over their lifetime; comparisons across dimensions
//! score zero relevance rather than failing.

use tracing::warn;

use crate::config::{EmbeddingConfig, EmbeddingKind};
use crate::error::{MnemoError, Result};
use crate::types::{Embedding, stable_hash};

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Generate vector embeddings from text.
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a single text string.
    ///
    /// # Errors
    ///
    /// Returns [`MnemoError::Embedding`] if the provider cannot produce a vector.
    fn embed(&self, text: &str) -> Result<Embedding>;

    /// Embed a batch of texts.
    ///
    /// Default implementation calls `embed` in a loop.
    ///
    /// # Errors
    ///
    /// Returns an error if any embedding in the batch fails.
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Embedding>> {
        texts.iter().map(|t| self.embed(t)).collect()
    }

    /// The dimensionality of embeddings produced by this provider.
    fn dimensions(&self) -> usize;

    /// A human-readable name for the model.
    fn model_name(&self) -> &str;
}

/// Embed `text`, substituting a zero vector when the provider fails or
/// returns an unusable vector.
///
/// A zero vector scores zero relevance, so retrieval degrades to the
/// importance and recency terms.
pub fn embed_or_zero(provider: &dyn EmbeddingProvider, text: &str) -> Embedding {
    match provider.embed(text) {
        Ok(embedding) if !embedding.0.is_empty() && embedding.is_finite() => embedding,
        Ok(_) => {
            warn!(
                model = provider.model_name(),
                "Embedding was empty or non-finite; using zero vector"
            );
            Embedding::zeros(provider.dimensions())
        }
        Err(e) => {
            warn!(model = provider.model_name(), error = %e, "Embedding failed; using zero vector");
            Embedding::zeros(provider.dimensions())
        }
    }
}

/// Build the provider selected in configuration.
///
/// # Errors
///
/// Returns [`MnemoError::Config`] if `dimensions` is zero.
pub fn provider_from_config(config: &EmbeddingConfig) -> Result<Box<dyn EmbeddingProvider>> {
    if config.dimensions == 0 {
        return Err(MnemoError::Config("embedding.dimensions must be at least 1".into()));
    }
    Ok(match config.provider {
        EmbeddingKind::Hashing => Box::new(HashingEmbeddingProvider::new(config.dimensions)),
        EmbeddingKind::Stub => Box::new(StubEmbeddingProvider::new(config.dimensions)),
    })
}

// ---------------------------------------------------------------------------
// Stub provider
// ---------------------------------------------------------------------------

/// An embedding provider that returns zero vectors.
///
/// Every relevance score against its output is zero, which makes it useful
/// for tests that want importance and recency only.
#[derive(Debug, Clone)]
pub struct StubEmbeddingProvider {
    dims: usize,
}

impl StubEmbeddingProvider {
    /// Create a new stub provider with the given dimensionality.
    #[must_use]
    pub fn new(dimensions: usize) -> Self {
        Self { dims: dimensions }
    }
}

impl Default for StubEmbeddingProvider {
    fn default() -> Self {
        Self::new(256)
    }
}

impl EmbeddingProvider for StubEmbeddingProvider {
    fn embed(&self, _text: &str) -> Result<Embedding> {
        Ok(Embedding::zeros(self.dims))
    }

    fn dimensions(&self) -> usize {
        self.dims
    }

    fn model_name(&self) -> &str {
        "stub-zero-vector"
    }
}

// ---------------------------------------------------------------------------
// Feature-hashing provider
// ---------------------------------------------------------------------------

/// Deterministic bag-of-words embedder using the hashing trick.
///
/// Each lowercase alphanumeric token adds ±1 to the bucket `hash % dims`
/// (the sign comes from the hash's top bit); the result is L2-normalized.
/// Texts sharing vocabulary therefore get positive cosine similarity,
/// with no fitting step and no shared state.
#[derive(Debug, Clone)]
pub struct HashingEmbeddingProvider {
    dims: usize,
}

impl HashingEmbeddingProvider {
    /// Create a hashing provider with `dimensions` buckets (at least one).
    #[must_use]
    pub fn new(dimensions: usize) -> Self {
        Self {
            dims: dimensions.max(1),
        }
    }
}

impl Default for HashingEmbeddingProvider {
    fn default() -> Self {
        Self::new(256)
    }
}

impl EmbeddingProvider for HashingEmbeddingProvider {
    fn embed(&self, text: &str) -> Result<Embedding> {
        let mut vector = vec![0.0_f32; self.dims];
        let lowered = text.to_lowercase();
        for token in lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let hash = stable_hash(token);
            #[allow(clippy::cast_possible_truncation)]
            let bucket = (hash % self.dims as u64) as usize;
            let sign = if hash >> 63 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }

        let mut embedding = Embedding(vector);
        let norm = embedding.norm();
        if norm > f32::EPSILON {
            for x in &mut embedding.0 {
                *x /= norm;
            }
        }
        Ok(embedding)
    }

    fn dimensions(&self) -> usize {
        self.dims
    }

    fn model_name(&self) -> &str {
        "feature-hashing-bow"
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
