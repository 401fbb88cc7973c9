//! The reflection tier: synthesized insights layered over the memory stream.

pub mod record;
pub mod store;

pub use record::{ReflectionRecord, ReflectionRecordBuilder, ReflectionType};
pub use store::{ReflectionStats, ReflectionStore};
