// Copyright 2024-2026 memstore Contributors
// Licensed under the Apache License, Version 2.0

//! Buffer allocator trait and the capacity-tracking implementation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::error::StorageError;

/// A granted slice of an engine's memory capacity.
#[derive(Debug, Clone)]
pub struct Reservation {
    pub id: u64,
    pub size: usize,
    pub device_index: usize,
}

/// Trait abstracting engine memory accounting.
pub trait BufferAllocator: Send + Sync {
    fn reserve(&self, size: usize) -> Result<Reservation, StorageError>;
    fn release(&self, reservation: &Reservation) -> Result<(), StorageError>;
    fn allocated_bytes(&self) -> usize;
}

struct TrackingState {
    reservations: HashMap<u64, usize>,
    total: usize,
}

/// Allocator with a fixed capacity and per-reservation bookkeeping.
pub struct TrackingAllocator {
    capacity: usize,
    device_index: usize,
    next_id: AtomicU64,
    state: Mutex<TrackingState>,
}

impl TrackingAllocator {
    pub fn new(capacity: usize, device_index: usize) -> Self {
        Self {
            capacity,
            device_index,
            next_id: AtomicU64::new(1),
            state: Mutex::new(TrackingState { reservations: HashMap::new(), total: 0 }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Count of live (un-released) reservations.
    pub fn leak_count(&self) -> usize {
        self.state.lock().reservations.len()
    }
}

impl BufferAllocator for TrackingAllocator {
    fn reserve(&self, size: usize) -> Result<Reservation, StorageError> {
        let mut s = self.state.lock();
        let available = self.capacity - s.total;
        if size > available {
            return Err(StorageError::OutOfMemory { required: size, available });
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        s.reservations.insert(id, size);
        s.total += size;
        Ok(Reservation { id, size, device_index: self.device_index })
    }

    fn release(&self, reservation: &Reservation) -> Result<(), StorageError> {
        let mut s = self.state.lock();
        match s.reservations.remove(&reservation.id) {
            Some(size) => {
                s.total -= size;
                Ok(())
            }
            None => Err(StorageError::InvalidArguments(format!(
                "double release or unknown reservation id={}",
                reservation.id
            ))),
        }
    }

    fn allocated_bytes(&self) -> usize {
        self.state.lock().total
    }
}

#[cfg(test)]
#[path = "allocator_tests.rs"]
mod tests;
