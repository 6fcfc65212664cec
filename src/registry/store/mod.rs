//! Instance Store Backends
//!
//! Implementations of [`InstanceStore`](crate::domain::InstanceStore).

mod file;
mod memory;

pub use file::FileStore;
pub use memory::{MemoryStore, STORE_SHARD_COUNT};
