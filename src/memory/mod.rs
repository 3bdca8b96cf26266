//! Memory storage module.
//!
//! Provides device buffers, the map guard registry, storages over buffers,
//! and the host bridge for bulk copies.

mod bridge;
mod buffer;
mod guard;
mod storage;

pub use bridge::{read_from_storage, write_to_storage};
pub use buffer::{Buffer, ReadWriteAccessor};
pub use guard::{GuardError, GuardManager, GuardTag, MapTag};
pub use storage::{MappedPtr, MemoryFlags, MemoryStorage, StorageId};
