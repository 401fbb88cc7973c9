//! JSON snapshot persistence for the memory and reflection stores.
//!
//! Each store is written to its own document:
//!
//! ```json
//! {
//!   "format_version": 1,
//!   "saved_at": "2024-06-01T12:00:00Z",
//!   "max_capacity": 10000,
//!   "checksum": "1c291ca3",
//!   "records": [ ... ],
//!   "core_principles": [ ... ],   // reflection snapshots only
//!   "long_term_goals": [ ... ]    // reflection snapshots only
//! }
//! ```
//!
//! - Writes go to a sibling temporary file which is then renamed over the
//!   target, so a crash never leaves a half-written snapshot behind.
//! - Optional CRC-32 over the compact JSON of `records` detects corruption.
//! - Optional rotating backups (`<file>.bak.1` … `.bak.N`).
//! - Older key names (`memories`, `reflections`, `max_memories`,
//!   `max_reflections`) are accepted on read.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::PersistenceConfig;
use crate::error::{MnemoError, Result};
use crate::memory::{MemoryRecord, MemoryStore};
use crate::reflection::{ReflectionRecord, ReflectionStore};
use crate::types::Timestamp;

/// Newest snapshot layout this crate reads and the one it writes.
pub const FORMAT_VERSION: u32 = 1;

// ---------------------------------------------------------------------------
// CRC-32 checksum helper
// ---------------------------------------------------------------------------

/// CRC-32 of `data` as 8 lowercase hex digits.
#[must_use]
pub fn crc32_hex(data: &[u8]) -> String {
    format!("{:08x}", crc32_compute(data))
}

/// Basic CRC-32 (ISO 3309 / ITU-T V.42) computation.
fn crc32_compute(data: &[u8]) -> u32 {
    const POLY: u32 = 0xEDB8_8320;
    let mut crc: u32 = 0xFFFF_FFFF;
    for &byte in data {
        crc ^= u32::from(byte);
        for _ in 0..8 {
            crc = if crc & 1 == 1 { (crc >> 1) ^ POLY } else { crc >> 1 };
        }
    }
    !crc
}

// ---------------------------------------------------------------------------
// Document shape
// ---------------------------------------------------------------------------

/// A decoded snapshot document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot<R> {
    /// Layout version; documents without one are treated as version 1.
    #[serde(default = "default_format_version")]
    pub format_version: u32,
    /// When the snapshot was written.
    #[serde(default)]
    pub saved_at: Option<Timestamp>,
    /// Capacity of the store that wrote the snapshot.
    #[serde(default, alias = "max_memories", alias = "max_reflections")]
    pub max_capacity: usize,
    /// CRC-32 of the compact JSON encoding of `records`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    /// Stored records, in insertion order.
    #[serde(alias = "memories", alias = "reflections")]
    pub records: Vec<R>,
    /// Core principles (reflection snapshots).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub core_principles: Option<Vec<String>>,
    /// Long-term goals (reflection snapshots).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub long_term_goals: Option<Vec<String>>,
}

/// Snapshot of a [`MemoryStore`].
pub type MemorySnapshot = Snapshot<MemoryRecord>;
/// Snapshot of a [`ReflectionStore`].
pub type ReflectionSnapshot = Snapshot<ReflectionRecord>;

fn default_format_version() -> u32 {
    FORMAT_VERSION
}

// ---------------------------------------------------------------------------
// Store entry points
// ---------------------------------------------------------------------------

/// Write `store` to `path`.
///
/// # Errors
///
/// Returns [`MnemoError::Serialization`] if encoding fails or
/// [`MnemoError::Io`] if the file cannot be written.
pub fn save_memories(store: &MemoryStore, path: &Path, config: &PersistenceConfig) -> Result<()> {
    let records: Vec<&MemoryRecord> = store.iter().collect();
    write_snapshot(path, &records, store.max_memories(), None, config)
}

/// Read a memory snapshot from `path`.
///
/// # Errors
///
/// [`MnemoError::SnapshotNotFound`] if the file does not exist,
/// [`MnemoError::MalformedSnapshot`] if it cannot be decoded.
pub fn read_memories(path: &Path, config: &PersistenceConfig) -> Result<MemorySnapshot> {
    read_snapshot(path, config)
}

/// Write `store` (reflections and identity state) to `path`.
///
/// # Errors
///
/// Returns [`MnemoError::Serialization`] if encoding fails or
/// [`MnemoError::Io`] if the file cannot be written.
pub fn save_reflections(store: &ReflectionStore, path: &Path, config: &PersistenceConfig) -> Result<()> {
    let records: Vec<&ReflectionRecord> = store.iter().collect();
    let identity = Identity {
        core_principles: store.core_principles(),
        long_term_goals: store.long_term_goals(),
    };
    write_snapshot(path, &records, store.max_reflections(), Some(identity), config)
}

/// Read a reflection snapshot from `path`.
///
/// # Errors
///
/// [`MnemoError::SnapshotNotFound`] if the file does not exist,
/// [`MnemoError::MalformedSnapshot`] if it cannot be decoded.
pub fn read_reflections(path: &Path, config: &PersistenceConfig) -> Result<ReflectionSnapshot> {
    read_snapshot(path, config)
}

// ---------------------------------------------------------------------------
// Codec
// ---------------------------------------------------------------------------

struct Identity<'a> {
    core_principles: &'a [String],
    long_term_goals: &'a [String],
}

#[derive(Serialize)]
struct SnapshotOut<'a, R> {
    format_version: u32,
    saved_at: Timestamp,
    max_capacity: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    checksum: Option<String>,
    records: &'a [&'a R],
    #[serde(skip_serializing_if = "Option::is_none")]
    core_principles: Option<&'a [String]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    long_term_goals: Option<&'a [String]>,
}

fn write_snapshot<R: Serialize>(
    path: &Path,
    records: &[&R],
    max_capacity: usize,
    identity: Option<Identity<'_>>,
    config: &PersistenceConfig,
) -> Result<()> {
    let start = Instant::now();

    let checksum = if config.checksum_enabled {
        let compact = serde_json::to_vec(records).map_err(|e| MnemoError::Serialization(e.to_string()))?;
        Some(crc32_hex(&compact))
    } else {
        None
    };

    let doc = SnapshotOut {
        format_version: FORMAT_VERSION,
        saved_at: Utc::now(),
        max_capacity,
        checksum,
        records,
        core_principles: identity.as_ref().map(|i| i.core_principles),
        long_term_goals: identity.as_ref().map(|i| i.long_term_goals),
    };

    let bytes = if config.pretty {
        serde_json::to_vec_pretty(&doc)
    } else {
        serde_json::to_vec(&doc)
    }
    .map_err(|e| MnemoError::Serialization(e.to_string()))?;

    if config.backup_count > 0 && path.exists() {
        rotate_backups(path, config.backup_count)?;
    }
    write_atomic(path, &bytes)?;

    info!(
        path = %path.display(),
        records = records.len(),
        bytes = bytes.len(),
        elapsed_us = start.elapsed().as_micros(),
        "Saved snapshot"
    );
    Ok(())
}

fn read_snapshot<R>(path: &Path, config: &PersistenceConfig) -> Result<Snapshot<R>>
where
    R: Serialize + DeserializeOwned,
{
    let start = Instant::now();

    let bytes = fs::read(path).map_err(|e| match e.kind() {
        ErrorKind::NotFound => MnemoError::SnapshotNotFound {
            path: path.to_path_buf(),
        },
        _ => MnemoError::Io(e),
    })?;

    let snapshot: Snapshot<R> =
        serde_json::from_slice(&bytes).map_err(|e| MnemoError::malformed(path, e))?;

    if snapshot.format_version > FORMAT_VERSION {
        return Err(MnemoError::malformed(
            path,
            format!(
                "format version {} is newer than supported version {FORMAT_VERSION}",
                snapshot.format_version
            ),
        ));
    }

    if let Some(expected) = &snapshot.checksum {
        let compact =
            serde_json::to_vec(&snapshot.records).map_err(|e| MnemoError::Serialization(e.to_string()))?;
        let actual = crc32_hex(&compact);
        if *expected != actual {
            if config.strict_checksum {
                return Err(MnemoError::malformed(
                    path,
                    format!("checksum mismatch: expected {expected}, found {actual}"),
                ));
            }
            warn!(
                path = %path.display(),
                expected = %expected,
                actual = %actual,
                "Checksum mismatch, possible snapshot corruption"
            );
        }
    }

    info!(
        path = %path.display(),
        records = snapshot.records.len(),
        bytes = bytes.len(),
        elapsed_us = start.elapsed().as_micros(),
        "Loaded snapshot"
    );
    Ok(snapshot)
}

// ---------------------------------------------------------------------------
// Files
// ---------------------------------------------------------------------------

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = sibling(path, ".tmp");
    fs::write(&tmp, bytes)?;
    if let Err(e) = fs::rename(&tmp, path) {
        // Best effort; the rename error is the one worth reporting.
        let _ = fs::remove_file(&tmp);
        return Err(e.into());
    }
    Ok(())
}

/// Shift `<file>.bak.1..N-1` up by one and copy the current file to `.bak.1`.
fn rotate_backups(path: &Path, max: u32) -> Result<()> {
    for i in (1..max).rev() {
        let src = backup_path(path, i);
        if src.exists() {
            fs::rename(&src, backup_path(path, i + 1))?;
        }
    }
    let oldest = backup_path(path, max + 1);
    if oldest.exists() {
        fs::remove_file(&oldest)?;
    }
    fs::copy(path, backup_path(path, 1))?;
    debug!(path = %path.display(), max_backups = max, "Rotated snapshot backups");
    Ok(())
}

/// Path to a numbered backup file (e.g. `agent_memories.json.bak.1`).
#[must_use]
pub fn backup_path(path: &Path, n: u32) -> PathBuf {
    sibling(path, &format!(".bak.{n}"))
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(suffix);
    path.with_file_name(name)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
