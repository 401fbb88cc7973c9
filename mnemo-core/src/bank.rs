//! Memory Bank — one agent's memory stream and reflection tier together.
//!
//! The two stores are independent (reflections hold only weak ids into the
//! memory stream), but an agent saves, loads and reasons over them as a
//! unit. [`MemoryBank`] is that unit; [`SharedMemoryBank`] is a cloneable,
//! thread-safe handle to one.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use serde::Serialize;
use tracing::{info, warn};

use crate::config::{MnemoConfig, PersistenceConfig};
use crate::error::Result;
use crate::memory::{MemoryRecord, MemoryStats, MemoryStore};
use crate::reflection::{ReflectionStats, ReflectionStore};
use crate::retrieval::RetrievalQuery;
use crate::types::Timestamp;

/// Combined statistics for a bank.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BankStats {
    /// Memory stream statistics.
    pub memories: MemoryStats,
    /// Reflection tier statistics.
    pub reflections: ReflectionStats,
}

/// Outcome of [`MemoryBank::load`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadReport {
    /// Memories live after the load, or `None` if no memory snapshot existed.
    pub memories_loaded: Option<usize>,
    /// Reflections live after the load, or `None` if no reflection snapshot existed.
    pub reflections_loaded: Option<usize>,
}

/// An agent's complete memory: the memory stream plus the reflection tier.
#[derive(Debug, Clone)]
pub struct MemoryBank {
    /// The memory stream.
    pub memories: MemoryStore,
    /// The reflection tier, including core principles and long-term goals.
    pub reflections: ReflectionStore,
    persistence: PersistenceConfig,
}

impl Default for MemoryBank {
    fn default() -> Self {
        Self::from_config(&MnemoConfig::default())
    }
}

impl MemoryBank {
    /// Create an empty bank with explicit capacities and default settings.
    #[must_use]
    pub fn new(max_memories: usize, max_reflections: usize) -> Self {
        Self {
            memories: MemoryStore::new(max_memories),
            reflections: ReflectionStore::new(max_reflections),
            persistence: PersistenceConfig::default(),
        }
    }

    /// Create an empty bank from configuration.
    #[must_use]
    pub fn from_config(config: &MnemoConfig) -> Self {
        Self {
            memories: MemoryStore::from_config(config),
            reflections: ReflectionStore::from_config(config),
            persistence: config.persistence.clone(),
        }
    }

    /// Snapshot paths for `prefix`: `<prefix>_memories.json` and
    /// `<prefix>_reflections.json`.
    #[must_use]
    pub fn snapshot_paths(prefix: impl AsRef<Path>) -> (PathBuf, PathBuf) {
        let prefix = prefix.as_ref().as_os_str().to_string_lossy();
        (
            PathBuf::from(format!("{prefix}_memories.json")),
            PathBuf::from(format!("{prefix}_reflections.json")),
        )
    }

    /// Add a memory to the stream. Returns the record evicted to make room.
    ///
    /// # Errors
    ///
    /// [`MnemoError::DuplicateId`](crate::error::MnemoError::DuplicateId) if
    /// the id is already live.
    pub fn remember(&mut self, record: MemoryRecord) -> Result<Option<MemoryRecord>> {
        self.memories.add(record)
    }

    /// Statistics for both stores.
    #[must_use]
    pub fn statistics(&self) -> BankStats {
        BankStats {
            memories: self.memories.get_statistics(),
            reflections: self.reflections.get_statistics(),
        }
    }

    /// Save both stores next to `prefix`.
    ///
    /// # Errors
    ///
    /// Returns the first I/O or serialization error; the memory snapshot
    /// is written first.
    pub fn save(&self, prefix: impl AsRef<Path>) -> Result<()> {
        let (memory_path, reflection_path) = Self::snapshot_paths(prefix);
        self.memories.save_with(&memory_path, &self.persistence)?;
        self.reflections.save_with(&reflection_path, &self.persistence)?;
        info!(
            memories = self.memories.len(),
            reflections = self.reflections.len(),
            "Saved memory bank"
        );
        Ok(())
    }

    /// Load both stores from next to `prefix`.
    ///
    /// A missing snapshot is not an error: that store keeps its current
    /// contents. Reflections are relinked against the memory stream as it
    /// stands after the memory load. Either both stores are updated or,
    /// on error, neither is.
    ///
    /// # Errors
    ///
    /// [`MnemoError::MalformedSnapshot`](crate::error::MnemoError::MalformedSnapshot)
    /// or I/O errors from either snapshot.
    pub fn load(&mut self, prefix: impl AsRef<Path>) -> Result<LoadReport> {
        let (memory_path, reflection_path) = Self::snapshot_paths(prefix);
        let mut memories = self.memories.clone();
        let mut reflections = self.reflections.clone();
        let mut report = LoadReport::default();

        match memories.load_with(&memory_path, &self.persistence) {
            Ok(n) => report.memories_loaded = Some(n),
            Err(e) if e.is_not_found() => {
                warn!(path = %memory_path.display(), "No memory snapshot; keeping current memories");
            }
            Err(e) => return Err(e),
        }

        match reflections.load_with(&reflection_path, Some(&memories), &self.persistence) {
            Ok(n) => report.reflections_loaded = Some(n),
            Err(e) if e.is_not_found() => {
                warn!(path = %reflection_path.display(), "No reflection snapshot; keeping current reflections");
            }
            Err(e) => return Err(e),
        }

        self.memories = memories;
        self.reflections = reflections;
        info!(
            memories = self.memories.len(),
            reflections = self.reflections.len(),
            "Loaded memory bank"
        );
        Ok(report)
    }
}

// ---------------------------------------------------------------------------
// Shared handle
// ---------------------------------------------------------------------------

/// Thread-safe, cloneable handle to a [`MemoryBank`].
///
/// All clones share one bank. Methods take the lock for the duration of
/// the call; use [`lock`](Self::lock) to hold it across several steps.
#[derive(Debug, Clone, Default)]
pub struct SharedMemoryBank {
    inner: Arc<Mutex<MemoryBank>>,
}

impl SharedMemoryBank {
    /// Wrap a bank for sharing.
    #[must_use]
    pub fn new(bank: MemoryBank) -> Self {
        Self {
            inner: Arc::new(Mutex::new(bank)),
        }
    }

    /// Lock the bank for exclusive access.
    pub fn lock(&self) -> MutexGuard<'_, MemoryBank> {
        self.inner.lock()
    }

    /// See [`MemoryBank::remember`].
    ///
    /// # Errors
    ///
    /// See [`MemoryBank::remember`].
    pub fn remember(&self, record: MemoryRecord) -> Result<Option<MemoryRecord>> {
        self.inner.lock().remember(record)
    }

    /// Retrieve at `now`, returning owned copies of the ranked records.
    #[must_use]
    pub fn retrieve_at(&self, query: &RetrievalQuery, now: Timestamp) -> Vec<MemoryRecord> {
        let mut bank = self.inner.lock();
        bank.memories
            .retrieve_at(query, now)
            .into_iter()
            .map(|hit| hit.record.clone())
            .collect()
    }

    /// See [`MemoryBank::statistics`].
    #[must_use]
    pub fn statistics(&self) -> BankStats {
        self.inner.lock().statistics()
    }

    /// See [`MemoryBank::save`].
    ///
    /// # Errors
    ///
    /// See [`MemoryBank::save`].
    pub fn save(&self, prefix: impl AsRef<Path>) -> Result<()> {
        self.inner.lock().save(prefix)
    }

    /// See [`MemoryBank::load`].
    ///
    /// # Errors
    ///
    /// See [`MemoryBank::load`].
    pub fn load(&self, prefix: impl AsRef<Path>) -> Result<LoadReport> {
        self.inner.lock().load(prefix)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
