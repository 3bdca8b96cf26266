//! memstore
//!
//! Device memory storage for a heterogeneous compute library. Buffers live
//! either in a host-unified engine, which shares the host address space, or
//! in a discrete-device engine with separate memory reached through a
//! command queue.
//!
//! # Building blocks
//!
//! - [`Buffer`]: reference-counted device bytes; sub-buffers share memory.
//! - [`GuardManager`]: registry pairing every map with exactly one unmap.
//! - [`MemoryStorage`]: owning or aliasing view with map/unmap, sub-storage,
//!   and clone.
//! - [`write_to_storage`] / [`read_from_storage`]: blocking bulk copies.
//!
//! # Example
//!
//! ```
//! use memstore::{read_from_storage, write_to_storage, Engine, EngineConfig, MemoryStorage};
//!
//! let engine = Engine::new(&EngineConfig::device())?;
//! let storage = MemoryStorage::allocate(engine, 4)?;
//! write_to_storage(&[1, 2, 3, 4], &storage)?;
//!
//! let sub = storage.get_sub_storage(2, 2)?;
//! let mut out = [0u8; 2];
//! read_from_storage(&mut out, &sub)?;
//! assert_eq!(out, [3, 4]);
//! # Ok::<(), memstore::StorageError>(())
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod memory;
pub mod telemetry;

pub use config::{ConfigError, EngineConfig};
pub use engine::{
    BufferAllocator, CommandQueue, CopyEvent, Engine, EngineKind, Reservation, TrackingAllocator,
    ViewStrategy,
};
pub use error::{Status, StorageError};
pub use memory::{
    read_from_storage, write_to_storage, Buffer, GuardError, GuardManager, GuardTag, MapTag,
    MappedPtr, MemoryFlags, MemoryStorage, ReadWriteAccessor, StorageId,
};
