// Copyright 2024-2026 memstore Contributors
// Licensed under the Apache License, Version 2.0

//! Device-resident byte buffers and their host accessors.
//!
//! A [`Buffer`] is a cheap, cloneable handle onto reference-counted device
//! memory plus the byte window it covers. Sub-buffers share the memory and
//! carry their own window. Memory is freed and its reservation returned to
//! the engine allocator when the last handle is dropped.

use std::alloc::{self, Layout};
use std::fmt;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{trace, warn};

use crate::engine::{BufferAllocator, Engine, EngineKind, Reservation};
use crate::error::StorageError;

const BUFFER_ALIGN: usize = 64;

/// Where the bytes of a buffer physically live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Residency {
    /// Host-addressable; accessors point straight into the allocation.
    Host,
    /// Device-private; accessors work on a shared host staging copy.
    Device,
}

struct DeviceMemory {
    ptr: NonNull<u8>,
    layout: Layout,
    residency: Residency,
    /// Host copy of device-resident memory, shared by every open accessor.
    /// Filled by the first accessor and written back by the last one. The
    /// lock also serializes device-side copies against it.
    transfer: Mutex<Option<Vec<u8>>>,
    live_accessors: AtomicUsize,
    reservation: Reservation,
    allocator: Arc<dyn BufferAllocator>,
}

// Safety: the allocation is plain bytes owned by this struct; device-side
// copies and staging transitions are serialized through `transfer`.
unsafe impl Send for DeviceMemory {}
unsafe impl Sync for DeviceMemory {}

impl DeviceMemory {
    fn len(&self) -> usize {
        self.layout.size()
    }

    /// Start of the up-to-date bytes: the staged copy if one is open.
    /// Callers hold the `transfer` lock, passed in as `staged`.
    fn current_bytes(&self, staged: &mut Option<Vec<u8>>) -> *mut u8 {
        match staged {
            Some(copy) => copy.as_mut_ptr(),
            None => self.ptr.as_ptr(),
        }
    }
}

impl Drop for DeviceMemory {
    fn drop(&mut self) {
        // Safety: ptr was returned by alloc_zeroed with this layout.
        unsafe { alloc::dealloc(self.ptr.as_ptr(), self.layout) };
        release_reservation(self.allocator.as_ref(), &self.reservation);
        trace!(bytes = self.layout.size(), "device memory freed");
    }
}

/// Return a reservation, logging instead of failing: callers are on
/// teardown or error paths with nothing left to propagate to.
fn release_reservation(allocator: &dyn BufferAllocator, reservation: &Reservation) -> bool {
    match allocator.release(reservation) {
        Ok(()) => true,
        Err(e) => {
            warn!(error = %e, reservation = reservation.id, "failed to release buffer reservation");
            false
        }
    }
}

/// Handle onto a contiguous byte range of device memory.
#[derive(Clone)]
pub struct Buffer {
    memory: Arc<DeviceMemory>,
    offset: usize,
    len: usize,
}

impl Buffer {
    /// Allocate `size` zeroed bytes in the engine's memory domain.
    pub fn new(engine: &Engine, size: usize) -> Result<Self, StorageError> {
        if size == 0 {
            return Err(StorageError::InvalidArguments(
                "buffer size must be non-zero".into(),
            ));
        }
        let layout = Layout::from_size_align(size, BUFFER_ALIGN)
            .map_err(|e| StorageError::InvalidArguments(format!("bad buffer layout: {e}")))?;

        let allocator = engine.allocator().clone();
        let reservation = allocator.reserve(size)?;

        // Safety: layout has non-zero size.
        let raw = unsafe { alloc::alloc_zeroed(layout) };
        let Some(ptr) = NonNull::new(raw) else {
            release_reservation(allocator.as_ref(), &reservation);
            return Err(StorageError::OutOfMemory { required: size, available: 0 });
        };

        let residency = match engine.kind() {
            EngineKind::HostUnified => Residency::Host,
            EngineKind::DiscreteDevice => Residency::Device,
        };
        trace!(bytes = size, ?residency, "device memory allocated");

        Ok(Self {
            memory: Arc::new(DeviceMemory {
                ptr,
                layout,
                residency,
                transfer: Mutex::new(None),
                live_accessors: AtomicUsize::new(0),
                reservation,
                allocator,
            }),
            offset: 0,
            len: size,
        })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Byte offset of this buffer's window inside its device memory.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Create a sub-buffer over `[offset, offset + size)` of this buffer.
    pub fn sub_buffer(&self, offset: usize, size: usize) -> Result<Buffer, StorageError> {
        let in_bounds = matches!(offset.checked_add(size), Some(end) if end <= self.len);
        if !in_bounds {
            return Err(StorageError::InvalidArguments(format!(
                "sub-buffer [{offset}, +{size}) exceeds buffer of {} bytes",
                self.len
            )));
        }
        Ok(Buffer {
            memory: self.memory.clone(),
            offset: self.offset + offset,
            len: size,
        })
    }

    /// Returns true if both handles refer to the same device memory.
    pub fn shares_memory(&self, other: &Buffer) -> bool {
        Arc::ptr_eq(&self.memory, &other.memory)
    }

    /// Number of handles (buffers and sub-buffers) keeping the memory alive.
    pub fn holders(&self) -> usize {
        Arc::strong_count(&self.memory)
    }

    /// Number of host accessors currently open on the device memory.
    pub fn live_accessors(&self) -> usize {
        self.memory.live_accessors.load(Ordering::Acquire)
    }

    /// Returns true if host code may address the bytes directly.
    pub fn is_host_resident(&self) -> bool {
        self.memory.residency == Residency::Host
    }

    /// Open a read-write host accessor over this buffer's window.
    ///
    /// Accessors on device-resident memory point into one host copy shared
    /// by every accessor open on that memory, so overlapping windows see each
    /// other's writes. The copy is written back when the last one closes.
    pub fn access(&self) -> ReadWriteAccessor {
        let base = match self.memory.residency {
            Residency::Host => {
                self.memory.live_accessors.fetch_add(1, Ordering::AcqRel);
                self.memory.ptr.as_ptr()
            }
            Residency::Device => {
                let mut staged = self.memory.transfer.lock();
                let copy = staged.get_or_insert_with(|| {
                    let mut copy = vec![0u8; self.memory.len()];
                    // Safety: the copy holds exactly the allocation length.
                    unsafe {
                        std::ptr::copy_nonoverlapping(
                            self.memory.ptr.as_ptr(),
                            copy.as_mut_ptr(),
                            copy.len(),
                        )
                    };
                    trace!(bytes = copy.len(), "device memory staged");
                    copy
                });
                self.memory.live_accessors.fetch_add(1, Ordering::AcqRel);
                copy.as_mut_ptr()
            }
        };
        // Safety: offset <= memory len, enforced by sub_buffer.
        let ptr = unsafe { base.add(self.offset) };
        ReadWriteAccessor { buffer: self.clone(), ptr }
    }

    /// Device-side copy of `data` into this buffer at `at`.
    ///
    /// Lands in the shared host copy while accessors are open, so they see
    /// it and the final write-back keeps it.
    pub(crate) fn write_bytes(&self, at: usize, data: &[u8]) -> Result<(), StorageError> {
        self.check_window(at, data.len())?;
        let mut staged = self.memory.transfer.lock();
        let base = self.memory.current_bytes(&mut staged);
        // Safety: bounds checked above; source and destination never overlap.
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), base.add(self.offset + at), data.len());
        }
        Ok(())
    }

    /// Device-side copy of `len` bytes out of this buffer starting at `at`.
    pub(crate) fn read_bytes(&self, at: usize, len: usize) -> Result<Vec<u8>, StorageError> {
        self.check_window(at, len)?;
        let mut out = vec![0u8; len];
        let mut staged = self.memory.transfer.lock();
        let base = self.memory.current_bytes(&mut staged);
        // Safety: bounds checked above.
        unsafe { std::ptr::copy_nonoverlapping(base.add(self.offset + at), out.as_mut_ptr(), len) };
        Ok(out)
    }

    fn check_window(&self, at: usize, len: usize) -> Result<(), StorageError> {
        match at.checked_add(len) {
            Some(end) if end <= self.len => Ok(()),
            _ => Err(StorageError::InvalidArguments(format!(
                "copy of {len} bytes at {at} exceeds buffer of {} bytes",
                self.len
            ))),
        }
    }

    /// Raw host pointer to the window start, only for host-resident memory.
    pub(crate) fn host_ptr(&self) -> Option<NonNull<u8>> {
        match self.memory.residency {
            // Safety: offset is within the allocation.
            Residency::Host => NonNull::new(unsafe { self.memory.ptr.as_ptr().add(self.offset) }),
            Residency::Device => None,
        }
    }
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("offset", &self.offset)
            .field("len", &self.len)
            .field("memory_len", &self.memory.len())
            .field("residency", &self.memory.residency)
            .finish()
    }
}

/// Host view of a buffer window, released on drop.
pub struct ReadWriteAccessor {
    buffer: Buffer,
    ptr: *mut u8,
}

// Safety: the accessor holds a counted handle keeping the memory and any
// staged copy alive; the pointer is only dereferenced by the mapping caller.
unsafe impl Send for ReadWriteAccessor {}
unsafe impl Sync for ReadWriteAccessor {}

impl ReadWriteAccessor {
    pub fn as_mut_ptr(&self) -> *mut u8 {
        self.ptr
    }

    pub fn len(&self) -> usize {
        self.buffer.len
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.len == 0
    }
}

impl Drop for ReadWriteAccessor {
    fn drop(&mut self) {
        let memory = &self.buffer.memory;
        if memory.residency == Residency::Host {
            memory.live_accessors.fetch_sub(1, Ordering::AcqRel);
            return;
        }

        let mut staged = memory.transfer.lock();
        if memory.live_accessors.fetch_sub(1, Ordering::AcqRel) == 1 {
            if let Some(copy) = staged.take() {
                // Safety: the copy holds exactly the allocation length.
                unsafe { std::ptr::copy_nonoverlapping(copy.as_ptr(), memory.ptr.as_ptr(), copy.len()) };
                trace!(bytes = copy.len(), "staged copy written back");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::engine::TrackingAllocator;
    use crate::memory::GuardManager;

    fn engine(config: EngineConfig, capacity: usize) -> (Arc<Engine>, Arc<TrackingAllocator>) {
        let allocator = Arc::new(TrackingAllocator::new(capacity, 0));
        let engine =
            Engine::with_parts(&config, allocator.clone(), Arc::new(GuardManager::new())).unwrap();
        (engine, allocator)
    }

    #[test]
    fn test_zero_sized_buffer_rejected() {
        let (engine, _) = engine(EngineConfig::host(), 1024);
        assert!(matches!(Buffer::new(&engine, 0), Err(StorageError::InvalidArguments(_))));
    }

    #[test]
    fn test_last_holder_returns_reservation() {
        let (engine, allocator) = engine(EngineConfig::host(), 1024);
        let buffer = Buffer::new(&engine, 256).unwrap();
        let sub = buffer.sub_buffer(16, 32).unwrap();
        assert_eq!(allocator.allocated_bytes(), 256);
        assert_eq!(buffer.holders(), 2);

        drop(buffer);
        assert_eq!(allocator.allocated_bytes(), 256);
        drop(sub);
        assert_eq!(allocator.allocated_bytes(), 0);
        assert_eq!(allocator.leak_count(), 0);
    }

    #[test]
    fn test_failed_release_is_logged_not_propagated() {
        let allocator = TrackingAllocator::new(1024, 0);
        let reservation = allocator.reserve(64).unwrap();

        assert!(release_reservation(&allocator, &reservation));
        assert_eq!(allocator.allocated_bytes(), 0);
        // A second release is refused by the allocator and only warned about.
        assert!(!release_reservation(&allocator, &reservation));
        assert_eq!(allocator.leak_count(), 0);
    }

    #[test]
    fn test_out_of_capacity() {
        let (engine, _) = engine(EngineConfig::device(), 128);
        let err = Buffer::new(&engine, 256).unwrap_err();
        assert!(matches!(err, StorageError::OutOfMemory { required: 256, .. }));
    }

    #[test]
    fn test_sub_buffer_composes_offsets() {
        let (engine, _) = engine(EngineConfig::host(), 1024);
        let buffer = Buffer::new(&engine, 64).unwrap();
        let sub = buffer.sub_buffer(8, 32).unwrap();
        let nested = sub.sub_buffer(4, 8).unwrap();
        assert_eq!(nested.offset(), 12);
        assert_eq!(nested.len(), 8);
        assert!(nested.shares_memory(&buffer));
        assert!(sub.sub_buffer(30, 4).is_err());
        assert!(sub.sub_buffer(usize::MAX, 2).is_err());
    }

    /// Bytes in device memory itself, ignoring any staged copy.
    fn device_bytes(buffer: &Buffer) -> Vec<u8> {
        let mut out = vec![0u8; buffer.len()];
        // Safety: the window is in bounds of the allocation.
        unsafe {
            std::ptr::copy_nonoverlapping(
                buffer.memory.ptr.as_ptr().add(buffer.offset),
                out.as_mut_ptr(),
                out.len(),
            )
        };
        out
    }

    #[test]
    fn test_device_accessor_writes_back_on_drop() {
        let (engine, _) = engine(EngineConfig::device(), 1024);
        let buffer = Buffer::new(&engine, 16).unwrap();
        assert!(!buffer.is_host_resident());
        assert!(buffer.host_ptr().is_none());

        let accessor = buffer.access();
        assert_eq!(buffer.live_accessors(), 1);
        // Safety: accessor covers 16 bytes.
        unsafe { std::ptr::write_bytes(accessor.as_mut_ptr(), 0xAB, accessor.len()) };
        assert_eq!(device_bytes(&buffer), vec![0u8; 16]);
        // Queue copies observe the staged bytes.
        assert_eq!(buffer.read_bytes(0, 16).unwrap(), vec![0xABu8; 16]);

        drop(accessor);
        assert_eq!(buffer.live_accessors(), 0);
        assert!(buffer.memory.transfer.lock().is_none());
        assert_eq!(device_bytes(&buffer), vec![0xABu8; 16]);
    }

    #[test]
    fn test_overlapping_device_accessors_share_one_copy() {
        let (engine, _) = engine(EngineConfig::device(), 1024);
        let buffer = Buffer::new(&engine, 8).unwrap();
        let sub = buffer.sub_buffer(4, 4).unwrap();

        let whole = buffer.access();
        let window = sub.access();
        assert_eq!(window.as_mut_ptr(), whole.as_mut_ptr().wrapping_add(4));

        // Safety: window covers 4 bytes, whole covers 8.
        unsafe {
            *window.as_mut_ptr() = 9;
            *whole.as_mut_ptr() = 1;
            assert_eq!(*whole.as_mut_ptr().add(4), 9);
        }

        drop(window);
        assert_eq!(buffer.live_accessors(), 1);
        assert_eq!(device_bytes(&buffer), vec![0u8; 8]);

        drop(whole);
        assert_eq!(device_bytes(&buffer), vec![1, 0, 0, 0, 9, 0, 0, 0]);
    }

    #[test]
    fn test_device_write_while_staged_survives_write_back() {
        let (engine, _) = engine(EngineConfig::device(), 1024);
        let buffer = Buffer::new(&engine, 4).unwrap();
        let accessor = buffer.access();

        buffer.write_bytes(0, &[7, 7, 7, 7]).unwrap();
        // Safety: accessor covers 4 bytes.
        assert_eq!(unsafe { *accessor.as_mut_ptr().add(3) }, 7);

        drop(accessor);
        assert_eq!(device_bytes(&buffer), vec![7u8; 4]);
    }

    #[test]
    fn test_host_accessor_is_direct() {
        let (engine, _) = engine(EngineConfig::host(), 1024);
        let buffer = Buffer::new(&engine, 16).unwrap();
        let sub = buffer.sub_buffer(4, 4).unwrap();
        let accessor = sub.access();
        assert_eq!(accessor.as_mut_ptr(), sub.host_ptr().unwrap().as_ptr());
        // Safety: accessor covers 4 bytes.
        unsafe { *accessor.as_mut_ptr() = 9 };
        assert_eq!(buffer.read_bytes(4, 1).unwrap(), vec![9u8]);
    }

    #[test]
    fn test_window_bounds_on_copies() {
        let (engine, _) = engine(EngineConfig::device(), 1024);
        let buffer = Buffer::new(&engine, 8).unwrap();
        assert!(buffer.write_bytes(4, &[1, 2, 3, 4, 5]).is_err());
        assert!(buffer.read_bytes(9, 0).is_err());
        buffer.write_bytes(4, &[1, 2, 3, 4]).unwrap();
        assert_eq!(buffer.read_bytes(2, 4).unwrap(), vec![0, 0, 1, 2]);
    }
}
