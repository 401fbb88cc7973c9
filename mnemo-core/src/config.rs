//! Configuration for the Mnemo memory substrate.
//!
//! Maps directly to `mnemo.toml`. Every field has a default, so an empty
//! document is a valid configuration.

use serde::{Deserialize, Serialize};

use crate::error::{MnemoError, Result};

/// Top-level Mnemo configuration, loadable from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MnemoConfig {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,
    /// Memory stream capacity and retrieval behavior.
    #[serde(default)]
    pub memory: MemoryConfig,
    /// Reflection tier capacity.
    #[serde(default)]
    pub reflection: ReflectionConfig,
    /// Composite scoring weights.
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    /// Built-in embedding provider selection.
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    /// Snapshot settings.
    #[serde(default)]
    pub persistence: PersistenceConfig,
}

impl MnemoConfig {
    /// Load configuration from a TOML string.
    ///
    /// # Errors
    /// Returns `MnemoError::Config` if the TOML is invalid or fails validation.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(toml_str).map_err(|e| MnemoError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Check value ranges that serde cannot express.
    ///
    /// # Errors
    /// Returns `MnemoError::Config` naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        if self.memory.max_memories == 0 {
            return Err(MnemoError::Config("memory.max_memories must be at least 1".into()));
        }
        if self.reflection.max_reflections == 0 {
            return Err(MnemoError::Config(
                "reflection.max_reflections must be at least 1".into(),
            ));
        }
        let r = &self.retrieval;
        for (name, w) in [
            ("relevance_weight", r.relevance_weight),
            ("importance_weight", r.importance_weight),
            ("recency_weight", r.recency_weight),
        ] {
            if !w.is_finite() || w < 0.0 {
                return Err(MnemoError::Config(format!(
                    "retrieval.{name} must be a finite non-negative number, got {w}"
                )));
            }
        }
        if !r.recency_decay_seconds.is_finite() || r.recency_decay_seconds <= 0.0 {
            return Err(MnemoError::Config(
                "retrieval.recency_decay_seconds must be positive".into(),
            ));
        }
        if self.embedding.dimensions == 0 {
            return Err(MnemoError::Config("embedding.dimensions must be at least 1".into()));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Sub-configs
// ---------------------------------------------------------------------------

/// General settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Log level for the host's subscriber: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

/// Which retrieval candidates get their access counters bumped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessMarking {
    /// Every record that passes the filters, returned or not.
    #[default]
    AllCandidates,
    /// Only the records actually returned to the caller.
    ReturnedOnly,
}

/// Memory stream configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Hard cap on live memory records.
    #[serde(default = "default_max_memories")]
    pub max_memories: usize,
    /// Access-marking breadth during retrieval.
    #[serde(default)]
    pub access_marking: AccessMarking,
    /// Default `k` for retrieval queries built from this config.
    #[serde(default = "default_top_k")]
    pub default_top_k: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_memories: 10_000,
            access_marking: AccessMarking::AllCandidates,
            default_top_k: 10,
        }
    }
}

/// Reflection tier configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReflectionConfig {
    /// Hard cap on live reflections.
    #[serde(default = "default_max_reflections")]
    pub max_reflections: usize,
}

impl Default for ReflectionConfig {
    fn default() -> Self {
        Self {
            max_reflections: 1_000,
        }
    }
}

/// Composite retrieval score tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Weight of cosine relevance.
    #[serde(default = "default_0_5")]
    pub relevance_weight: f64,
    /// Weight of normalized importance.
    #[serde(default = "default_0_3")]
    pub importance_weight: f64,
    /// Weight of recency.
    #[serde(default = "default_0_2")]
    pub recency_weight: f64,
    /// Characteristic time of the recency decay, in seconds.
    #[serde(default = "default_decay_seconds")]
    pub recency_decay_seconds: f64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            relevance_weight: 0.5,
            importance_weight: 0.3,
            recency_weight: 0.2,
            recency_decay_seconds: 86_400.0,
        }
    }
}

/// Built-in embedding provider kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingKind {
    /// Deterministic feature-hashing bag of words.
    #[default]
    Hashing,
    /// Zero vectors (relevance always 0).
    Stub,
}

/// Embedding provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Which built-in provider to construct.
    #[serde(default)]
    pub provider: EmbeddingKind,
    /// Embedding vector dimensions.
    #[serde(default = "default_dimensions")]
    pub dimensions: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingKind::Hashing,
            dimensions: 256,
        }
    }
}

/// Snapshot configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Pretty-print snapshot documents.
    #[serde(default = "default_true")]
    pub pretty: bool,
    /// Store a CRC-32 of the records alongside them.
    #[serde(default = "default_true")]
    pub checksum_enabled: bool,
    /// Treat a checksum mismatch as a malformed snapshot instead of a warning.
    #[serde(default)]
    pub strict_checksum: bool,
    /// Number of rotating `.bak.N` copies kept before overwriting (0 = none).
    #[serde(default)]
    pub backup_count: u32,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            pretty: true,
            checksum_enabled: true,
            strict_checksum: false,
            backup_count: 0,
        }
    }
}

// ---------------------------------------------------------------------------
// Serde default helpers
// ---------------------------------------------------------------------------

fn default_true() -> bool { true }
fn default_log_level() -> String { "info".to_string() }
fn default_max_memories() -> usize { 10_000 }
fn default_max_reflections() -> usize { 1_000 }
fn default_top_k() -> usize { 10 }
fn default_dimensions() -> usize { 256 }
fn default_0_2() -> f64 { 0.2 }
fn default_0_3() -> f64 { 0.3 }
fn default_0_5() -> f64 { 0.5 }
fn default_decay_seconds() -> f64 { 86_400.0 }

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_is_default() {
        let config = MnemoConfig::from_toml("").expect("parse");
        assert_eq!(config.memory.max_memories, 10_000);
        assert_eq!(config.reflection.max_reflections, 1_000);
        assert_eq!(config.memory.access_marking, AccessMarking::AllCandidates);
        assert!((config.retrieval.relevance_weight - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn partial_document_overrides() {
        let config = MnemoConfig::from_toml(
            r#"
            [memory]
            max_memories = 50
            access_marking = "returned_only"

            [persistence]
            backup_count = 2
            "#,
        )
        .expect("parse");
        assert_eq!(config.memory.max_memories, 50);
        assert_eq!(config.memory.access_marking, AccessMarking::ReturnedOnly);
        assert_eq!(config.persistence.backup_count, 2);
        assert!(config.persistence.checksum_enabled);
    }

    #[test]
    fn rejects_zero_capacity() {
        let err = MnemoConfig::from_toml("[memory]\nmax_memories = 0\n").expect_err("invalid");
        assert!(matches!(err, MnemoError::Config(_)));
    }

    #[test]
    fn rejects_negative_weight() {
        let err =
            MnemoConfig::from_toml("[retrieval]\nrecency_weight = -1.0\n").expect_err("invalid");
        assert!(err.to_string().contains("recency_weight"));
    }
}
