// Copyright 2024-2026 memstore Contributors
// Licensed under the Apache License, Version 2.0

//! Memory storage: an owning or aliasing view over a device buffer.
//!
//! Storages share their [`Buffer`] by reference count. Sub-storages and
//! clones are independent objects with their own identity, so each can be
//! mapped and unmapped on its own while reading and writing the same bytes.

use std::fmt;
use std::ptr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bitflags::bitflags;
use tracing::{debug, warn};

use super::buffer::Buffer;
use crate::engine::{Engine, ViewStrategy};
use crate::error::StorageError;

/// Process-unique identity of a storage object.
///
/// Identities are only minted by storages themselves; outside code can read
/// them but not create them:
///
/// ```compile_fail
/// let id = memstore::StorageId::next();
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StorageId(u64);

impl StorageId {
    /// Allocate a fresh identity.
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        StorageId(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for StorageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

bitflags! {
    /// How a storage obtains its buffer.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct MemoryFlags: u32 {
        /// Allocate a new buffer owned by the storage.
        const ALLOC = 0x1;
        /// Alias a buffer supplied by the runtime.
        const USE_RUNTIME_PTR = 0x2;
    }
}

/// Host pointer returned by [`MemoryStorage::map_data`]. May be null.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MappedPtr(*mut u8);

impl MappedPtr {
    pub fn null() -> Self {
        MappedPtr(ptr::null_mut())
    }

    /// Wrap an arbitrary pointer, e.g. one handed back by foreign code.
    pub fn from_raw(ptr: *mut u8) -> Self {
        MappedPtr(ptr)
    }

    pub fn is_null(&self) -> bool {
        self.0.is_null()
    }

    pub fn as_ptr(&self) -> *mut u8 {
        self.0
    }

    /// View the mapped bytes as a slice.
    ///
    /// # Safety
    /// The pointer must come from a mapping that is still open and cover at
    /// least `len` bytes, and no other reference may alias them.
    pub unsafe fn as_slice<'a>(&self, len: usize) -> &'a [u8] {
        if self.0.is_null() {
            return &[];
        }
        std::slice::from_raw_parts(self.0, len)
    }

    /// Mutable counterpart of [`MappedPtr::as_slice`].
    ///
    /// # Safety
    /// Same contract as [`MappedPtr::as_slice`].
    pub unsafe fn as_mut_slice<'a>(&self, len: usize) -> &'a mut [u8] {
        if self.0.is_null() {
            return &mut [];
        }
        std::slice::from_raw_parts_mut(self.0, len)
    }
}

/// Device memory storage bound to an engine.
pub struct MemoryStorage {
    id: StorageId,
    engine: Arc<Engine>,
    buffer: Option<Buffer>,
    base_offset: usize,
    size: usize,
}

impl MemoryStorage {
    /// Construct a storage that either allocates a buffer or aliases `handle`.
    ///
    /// A zero `size`, or a missing handle without [`MemoryFlags::ALLOC`],
    /// yields a valid storage with no buffer.
    pub fn new(
        engine: Arc<Engine>,
        flags: MemoryFlags,
        size: usize,
        handle: Option<&Buffer>,
    ) -> Result<Self, StorageError> {
        if size == 0 || (handle.is_none() && !flags.contains(MemoryFlags::ALLOC)) {
            return Ok(Self::unbacked(engine, size));
        }

        let buffer = if flags.contains(MemoryFlags::ALLOC) {
            Buffer::new(&engine, size)?
        } else if flags.contains(MemoryFlags::USE_RUNTIME_PTR) {
            let Some(handle) = handle else {
                return Ok(Self::unbacked(engine, size));
            };
            if handle.len() < size {
                return Err(StorageError::InvalidArguments(format!(
                    "runtime buffer of {} bytes cannot back a {size}-byte storage",
                    handle.len()
                )));
            }
            handle.clone()
        } else {
            return Err(StorageError::InvalidArguments(format!(
                "unexpected memory flags {flags:?}"
            )));
        };

        let storage = Self {
            id: StorageId::next(),
            engine,
            buffer: Some(buffer),
            base_offset: 0,
            size,
        };
        debug!(storage = %storage.id, size, ?flags, "storage created");
        Ok(storage)
    }

    /// Allocate a storage of `size` bytes.
    pub fn allocate(engine: Arc<Engine>, size: usize) -> Result<Self, StorageError> {
        Self::new(engine, MemoryFlags::ALLOC, size, None)
    }

    /// Alias a runtime-provided buffer, or stay unbacked if none is given yet.
    pub fn from_runtime(
        engine: Arc<Engine>,
        size: usize,
        handle: Option<&Buffer>,
    ) -> Result<Self, StorageError> {
        Self::new(engine, MemoryFlags::USE_RUNTIME_PTR, size, handle)
    }

    fn unbacked(engine: Arc<Engine>, size: usize) -> Self {
        Self {
            id: StorageId::next(),
            engine,
            buffer: None,
            base_offset: 0,
            size,
        }
    }

    pub fn id(&self) -> StorageId {
        self.id
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    pub fn buffer(&self) -> Option<&Buffer> {
        self.buffer.as_ref()
    }

    pub fn base_offset(&self) -> usize {
        self.base_offset
    }

    /// Declared size in bytes.
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_mapped(&self) -> bool {
        self.engine.guards().is_entered(self.id)
    }

    /// Map the storage into host memory.
    ///
    /// Returns a null pointer for a storage without a buffer. Mapping a
    /// storage that is already mapped is rejected.
    pub fn map_data(&self) -> Result<MappedPtr, StorageError> {
        let Some(buffer) = &self.buffer else {
            return Ok(MappedPtr::null());
        };

        let accessor = buffer.access();
        let mapped = accessor.as_mut_ptr().wrapping_add(self.base_offset);
        self.engine.guards().enter(self.id, move || drop(accessor))?;

        debug!(storage = %self.id, base_offset = self.base_offset, size = self.size, "storage mapped");
        Ok(MappedPtr(mapped))
    }

    /// Release the mapping opened by [`MemoryStorage::map_data`].
    ///
    /// The mapping is found by storage identity alone; `mapped` only decides
    /// between the null no-op and a real release, its value is not checked.
    pub fn unmap_data(&self, mapped: MappedPtr) -> Result<(), StorageError> {
        if mapped.is_null() {
            return Ok(());
        }
        self.engine.guards().exit(self.id)?;
        debug!(storage = %self.id, "storage unmapped");
        Ok(())
    }

    /// Storage over `[offset, offset + size)` of this storage's contents.
    ///
    /// Keeping the range inside this storage is the caller's job.
    pub fn get_sub_storage(&self, offset: usize, size: usize) -> Result<MemoryStorage, StorageError> {
        let sub = match self.engine.view_strategy() {
            ViewStrategy::ZeroCopyOffset => Self {
                id: StorageId::next(),
                engine: self.engine.clone(),
                buffer: self.buffer.clone(),
                base_offset: self.base_offset.checked_add(offset).ok_or_else(|| {
                    StorageError::InvalidArguments(format!("sub-storage offset {offset} overflows"))
                })?,
                size,
            },
            ViewStrategy::DeviceSubBuffer => Self {
                id: StorageId::next(),
                engine: self.engine.clone(),
                buffer: self
                    .buffer
                    .as_ref()
                    .map(|b| b.sub_buffer(offset, size))
                    .transpose()?,
                base_offset: 0,
                size,
            },
        };
        debug!(parent = %self.id, storage = %sub.id, offset, size, "sub-storage created");
        Ok(sub)
    }

    /// Zero-copy pointer to the storage bytes, without opening a mapping.
    ///
    /// Only engines with zero-copy views can provide one.
    pub fn zero_copy_ptr(&self) -> Result<MappedPtr, StorageError> {
        if self.engine.view_strategy() != ViewStrategy::ZeroCopyOffset {
            return Err(StorageError::Unimplemented(format!(
                "zero-copy access on {} engine",
                self.engine.kind()
            )));
        }
        Ok(match self.buffer.as_ref().and_then(Buffer::host_ptr) {
            Some(ptr) => MappedPtr(ptr.as_ptr().wrapping_add(self.base_offset)),
            None => MappedPtr::null(),
        })
    }
}

/// A clone shares the buffer, offset and size, but is a new identity that is
/// mapped and unmapped independently of the source.
impl Clone for MemoryStorage {
    fn clone(&self) -> Self {
        Self {
            id: StorageId::next(),
            engine: self.engine.clone(),
            buffer: self.buffer.clone(),
            base_offset: self.base_offset,
            size: self.size,
        }
    }
}

impl Drop for MemoryStorage {
    fn drop(&mut self) {
        if self.engine.guards().discard(self.id) {
            warn!(storage = %self.id, "storage dropped while mapped; mapping released");
        }
    }
}

impl fmt::Debug for MemoryStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryStorage")
            .field("id", &self.id)
            .field("engine", &self.engine.kind())
            .field("buffer", &self.buffer)
            .field("base_offset", &self.base_offset)
            .field("size", &self.size)
            .finish()
    }
}

#[cfg(test)]
#[path = "storage_tests.rs"]
mod tests;
