//! Error types for the Mnemo core library.

use std::path::PathBuf;

use thiserror::Error;

/// Top-level error type for all Mnemo operations.
#[derive(Error, Debug)]
pub enum MnemoError {
    /// No snapshot exists at the requested path.
    ///
    /// Callers are expected to recover from this (keep the current state).
    #[error("Snapshot not found: {}", path.display())]
    SnapshotNotFound {
        /// Path that was looked up.
        path: PathBuf,
    },

    /// A snapshot exists but cannot be decoded or is internally inconsistent.
    ///
    /// The load that produced this error left the target store untouched.
    #[error("Malformed snapshot {}: {reason}", path.display())]
    MalformedSnapshot {
        /// Path of the offending snapshot.
        path: PathBuf,
        /// What was wrong with it.
        reason: String,
    },

    /// A record with the same id is already live in the store.
    #[error("Duplicate record id: {0}")]
    DuplicateId(String),

    /// The embedding provider failed to produce a vector.
    #[error("Embedding error: {0}")]
    Embedding(String),

    /// The reasoning oracle failed to produce an answer.
    #[error("Reasoning oracle error: {0}")]
    Oracle(String),

    /// Serialization or deserialization failure outside of snapshot loading.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Generic I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl MnemoError {
    /// Whether this error is the recoverable "no snapshot on disk" case.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::SnapshotNotFound { .. })
    }

    pub(crate) fn malformed(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::MalformedSnapshot {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

/// Convenience Result type alias.
pub type Result<T> = std::result::Result<T, MnemoError>;
