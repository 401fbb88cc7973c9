//! The memory stream: individual records and the bounded store that holds them.
//!
//! Every observation, utterance, action and mirrored reflection of an agent
//! becomes a [`MemoryRecord`]; the [`MemoryStore`] keeps the most recent
//! `max_memories` of them indexed by id, importance, source and keyword.

pub mod record;
pub mod store;

pub use record::{MemoryRecord, MemoryRecordBuilder, clamp_importance};
pub use store::{Handle, MemoryStats, MemoryStore};
