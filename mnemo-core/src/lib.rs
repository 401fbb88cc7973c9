//! # Mnemo Core Library
//!
//! Long-term memory substrate for autonomous agents.
//!
//! Every agent gets a [`MemoryBank`] with two tiers:
//!
//! - **Memory stream** — "What happened": timestamped observations,
//!   utterances and actions ([`MemoryRecord`]) in a bounded
//!   [`MemoryStore`] that evicts its oldest record when full.
//! - **Reflections** — "What I think": higher-level syntheses
//!   ([`ReflectionRecord`]) that point back at their sources by weak id,
//!   plus the agent's core principles and long-term goals.
//!
//! Retrieval ranks memories by the composite score of Park et al. (2023):
//!
//! ```text
//! score = 0.5 · cosine(query, memory) + 0.3 · importance / 10 + 0.2 · exp(-Δt / 1 day)
//! ```
//!
//! Embeddings and reasoning are injected: an [`EmbeddingProvider`] turns
//! text into vectors and a [`ReasoningOracle`] scores importance and
//! writes reflections. Neither is ever called by the stores themselves.
//!
//! Both tiers persist as self-describing JSON snapshots
//! (see [`persistence`]).

#![deny(clippy::unwrap_used)]
#![deny(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod bank;
pub mod config;
pub mod consolidation;
pub mod embedding;
pub mod error;
pub mod eviction;
pub mod keywords;
pub mod memory;
pub mod observation;
pub mod persistence;
pub mod reflection;
pub mod retrieval;
pub mod types;

pub use bank::{MemoryBank, SharedMemoryBank};
pub use config::MnemoConfig;
pub use consolidation::{ReasoningOracle, Reflector};
pub use embedding::EmbeddingProvider;
pub use error::{MnemoError, Result};
pub use memory::{MemoryRecord, MemoryStore};
pub use reflection::{ReflectionRecord, ReflectionStore, ReflectionType};
pub use retrieval::{RetrievalQuery, RetrievedMemory};
pub use types::*;
