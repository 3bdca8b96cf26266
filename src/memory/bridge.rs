// Copyright 2024-2026 memstore Contributors
// Licensed under the Apache License, Version 2.0

//! Host bridge: bulk byte copies between host slices and storages.
//!
//! Both directions move exactly `storage.size()` bytes and return only once
//! the copy is complete.

use tracing::debug;

use super::buffer::Buffer;
use super::guard::{GuardError, GuardTag, MapTag};
use super::storage::MemoryStorage;
use crate::engine::ViewStrategy;
use crate::error::StorageError;
use crate::telemetry::{record_bridge_transfer, TransferDirection};

/// Copy `handle` into the storage.
pub fn write_to_storage(handle: &[u8], storage: &MemoryStorage) -> Result<(), StorageError> {
    let Some(buffer) = checked_buffer(handle.len(), storage)? else {
        return Ok(());
    };

    match storage.engine().view_strategy() {
        ViewStrategy::ZeroCopyOffset => {
            let mapped = storage.map_data()?;
            // Safety: the mapping is open and the view was checked to cover
            // storage.size() == handle.len() bytes.
            unsafe { std::ptr::copy_nonoverlapping(handle.as_ptr(), mapped.as_ptr(), handle.len()) };
            storage.unmap_data(mapped)?;
        }
        ViewStrategy::DeviceSubBuffer => {
            ensure_unmapped(storage)?;
            storage
                .engine()
                .queue()?
                .enqueue_write(buffer.clone(), storage.base_offset(), handle.to_vec())?
                .wait()?;
        }
    }

    record_bridge_transfer(TransferDirection::Write, handle.len());
    debug!(storage = %storage.id(), bytes = handle.len(), "host bytes written to storage");
    Ok(())
}

/// Copy the storage contents into `handle`.
pub fn read_from_storage(handle: &mut [u8], storage: &MemoryStorage) -> Result<(), StorageError> {
    let Some(buffer) = checked_buffer(handle.len(), storage)? else {
        return Ok(());
    };

    match storage.engine().view_strategy() {
        ViewStrategy::ZeroCopyOffset => {
            let mapped = storage.map_data()?;
            // Safety: see write_to_storage.
            unsafe { std::ptr::copy_nonoverlapping(mapped.as_ptr(), handle.as_mut_ptr(), handle.len()) };
            storage.unmap_data(mapped)?;
        }
        ViewStrategy::DeviceSubBuffer => {
            ensure_unmapped(storage)?;
            let bytes = storage
                .engine()
                .queue()?
                .enqueue_read(buffer.clone(), storage.base_offset(), handle.len())?
                .wait()?;
            handle.copy_from_slice(&bytes);
        }
    }

    record_bridge_transfer(TransferDirection::Read, handle.len());
    debug!(storage = %storage.id(), bytes = handle.len(), "storage bytes read to host");
    Ok(())
}

/// Validate a transfer before any byte moves. `None` means nothing to copy.
fn checked_buffer(len: usize, storage: &MemoryStorage) -> Result<Option<&Buffer>, StorageError> {
    if len != storage.size() {
        return Err(StorageError::InvalidArguments(format!(
            "host buffer of {len} bytes does not match storage of {} bytes",
            storage.size()
        )));
    }
    if len == 0 {
        return Ok(None);
    }
    let buffer = storage.buffer().ok_or_else(|| {
        StorageError::InvalidArguments(format!("storage {} has no backing buffer", storage.id()))
    })?;
    let in_bounds = matches!(storage.base_offset().checked_add(len), Some(end) if end <= buffer.len());
    if !in_bounds {
        return Err(StorageError::InvalidArguments(format!(
            "storage view [{}, +{len}) exceeds buffer of {} bytes",
            storage.base_offset(),
            buffer.len()
        )));
    }
    Ok(Some(buffer))
}

/// A storage with an open mapping cannot take part in a transfer, on any
/// engine. Zero-copy engines get this from `map_data`.
fn ensure_unmapped(storage: &MemoryStorage) -> Result<(), StorageError> {
    if storage.is_mapped() {
        return Err(GuardError::AlreadyEntered { tag: MapTag::NAME, key: storage.id() }.into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::engine::Engine;
    use crate::error::Status;
    use crate::telemetry::metrics::testing::CountingRecorder;

    #[test]
    fn test_length_mismatch_is_rejected() {
        let engine = Engine::new(&EngineConfig::host()).unwrap();
        let storage = MemoryStorage::allocate(engine, 16).unwrap();
        let result = write_to_storage(&[0u8; 8], &storage);
        assert_eq!(Status::of(&result), Status::InvalidArguments);
    }

    #[test]
    fn test_empty_storage_is_noop() {
        let engine = Engine::new(&EngineConfig::device()).unwrap();
        let storage = MemoryStorage::allocate(engine, 0).unwrap();
        write_to_storage(&[], &storage).unwrap();
        read_from_storage(&mut [], &storage).unwrap();
    }

    #[test]
    fn test_unbacked_storage_is_rejected() {
        let engine = Engine::new(&EngineConfig::host()).unwrap();
        let storage = MemoryStorage::from_runtime(engine, 8, None).unwrap();
        let mut out = [0u8; 8];
        let result = read_from_storage(&mut out, &storage);
        assert_eq!(Status::of(&result), Status::InvalidArguments);
    }

    #[test]
    fn test_host_view_past_buffer_end_is_rejected() {
        let engine = Engine::new(&EngineConfig::host()).unwrap();
        let storage = MemoryStorage::allocate(engine, 16).unwrap();
        let sub = storage.get_sub_storage(12, 8).unwrap();
        let result = write_to_storage(&[1u8; 8], &sub);
        assert_eq!(Status::of(&result), Status::InvalidArguments);
        assert!(!sub.is_mapped());
    }

    #[test]
    fn test_host_write_leaves_storage_unmapped() {
        let engine = Engine::new(&EngineConfig::host()).unwrap();
        let storage = MemoryStorage::allocate(engine.clone(), 4).unwrap();
        write_to_storage(&[1, 2, 3, 4], &storage).unwrap();
        assert!(!storage.is_mapped());
        assert!(engine.guards().is_empty());
        assert_eq!(storage.buffer().unwrap().live_accessors(), 0);
    }

    #[test]
    fn test_host_write_while_mapped_is_protocol_violation() {
        let engine = Engine::new(&EngineConfig::host()).unwrap();
        let storage = MemoryStorage::allocate(engine, 4).unwrap();
        let mapped = storage.map_data().unwrap();
        let err = write_to_storage(&[1, 2, 3, 4], &storage).unwrap_err();
        assert!(err.is_protocol_violation());
        storage.unmap_data(mapped).unwrap();
    }

    #[test]
    fn test_device_transfer_while_mapped_is_protocol_violation() {
        let engine = Engine::new(&EngineConfig::device()).unwrap();
        let storage = MemoryStorage::allocate(engine, 4).unwrap();
        let mapped = storage.map_data().unwrap();

        let err = write_to_storage(&[7u8; 4], &storage).unwrap_err();
        assert!(err.is_protocol_violation());
        let mut out = [0u8; 4];
        let err = read_from_storage(&mut out, &storage).unwrap_err();
        assert_eq!(err.status(), Status::RuntimeError);

        storage.unmap_data(mapped).unwrap();
        write_to_storage(&[7u8; 4], &storage).unwrap();
        read_from_storage(&mut out, &storage).unwrap();
        assert_eq!(out, [7u8; 4]);
    }

    #[test]
    fn test_device_write_through_alias_while_source_mapped() {
        let engine = Engine::new(&EngineConfig::device()).unwrap();
        let source = MemoryStorage::allocate(engine, 4).unwrap();
        let alias = source.clone();
        let mapped = source.map_data().unwrap();

        write_to_storage(&[5u8; 4], &alias).unwrap();
        assert_eq!(unsafe { mapped.as_slice(4) }, &[5u8; 4]);
        source.unmap_data(mapped).unwrap();

        let mut out = [0u8; 4];
        read_from_storage(&mut out, &alias).unwrap();
        assert_eq!(out, [5u8; 4]);
    }

    #[test]
    fn test_transfers_are_counted() {
        let recorder = CountingRecorder::default();
        for config in [EngineConfig::host(), EngineConfig::device()] {
            let engine = Engine::new(&config).unwrap();
            let storage = MemoryStorage::allocate(engine, 16).unwrap();
            ::metrics::with_local_recorder(&recorder, || {
                write_to_storage(&[1u8; 16], &storage).unwrap();
                let mut out = [0u8; 16];
                read_from_storage(&mut out, &storage).unwrap();
                // Rejected transfers move nothing.
                assert!(write_to_storage(&[1u8; 3], &storage).is_err());
            });
        }

        assert_eq!(recorder.counter("memstore_bridge_bytes_total{direction=write}"), 32);
        assert_eq!(recorder.counter("memstore_bridge_bytes_total{direction=read}"), 32);
    }

    #[test]
    fn test_device_copy_after_queue_shutdown_fails() {
        let engine = Engine::new(&EngineConfig::device()).unwrap();
        let storage = MemoryStorage::allocate(engine.clone(), 8).unwrap();
        engine.queue().unwrap().shutdown();

        let result = write_to_storage(&[7u8; 8], &storage);
        assert_eq!(Status::of(&result), Status::RuntimeError);

        let mut out = [0u8; 8];
        let result = read_from_storage(&mut out, &storage);
        assert_eq!(Status::of(&result), Status::RuntimeError);
        assert_eq!(out, [0u8; 8]);
    }
}
