// Copyright 2024-2026 memstore Contributors
// Licensed under the Apache License, Version 2.0

//! Engines: the memory domains a storage can live in.
//!
//! An engine is either host-unified (shares the host address space) or a
//! discrete device (separate memory, explicit transfer through a command
//! queue). Storage code never compares kinds directly; it asks the engine
//! for its [`ViewStrategy`].

mod allocator;
mod queue;

pub use allocator::{BufferAllocator, Reservation, TrackingAllocator};
pub use queue::{CommandQueue, CopyEvent};

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::Deserialize;
use tracing::info;

use crate::config::EngineConfig;
use crate::error::StorageError;
use crate::memory::{GuardManager, MapTag};

/// Memory domain kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
pub enum EngineKind {
    /// Shares the host address space; no explicit transfer needed.
    #[default]
    #[serde(rename = "host", alias = "cpu")]
    HostUnified,
    /// Separate device memory; bytes move through the command queue.
    #[serde(rename = "device", alias = "gpu")]
    DiscreteDevice,
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineKind::HostUnified => write!(f, "host"),
            EngineKind::DiscreteDevice => write!(f, "device"),
        }
    }
}

impl FromStr for EngineKind {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "host" | "cpu" => Ok(EngineKind::HostUnified),
            "device" | "gpu" => Ok(EngineKind::DiscreteDevice),
            other => Err(StorageError::InvalidArguments(format!(
                "unknown engine kind '{other}'"
            ))),
        }
    }
}

/// How an engine exposes sub-ranges of a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewStrategy {
    /// Sub-ranges are plain host-side offsets into the shared buffer.
    ZeroCopyOffset,
    /// Sub-ranges need a device-level sub-buffer object.
    DeviceSubBuffer,
}

/// A memory domain shared by every storage allocated on it.
pub struct Engine {
    kind: EngineKind,
    index: usize,
    allocator: Arc<dyn BufferAllocator>,
    guards: Arc<GuardManager<MapTag>>,
    queue: Option<CommandQueue>,
}

impl Engine {
    /// Create an engine from configuration with a fresh allocator and map
    /// registry.
    pub fn new(config: &EngineConfig) -> Result<Arc<Self>, StorageError> {
        let allocator = Arc::new(TrackingAllocator::new(
            config.memory_capacity,
            config.device_index,
        ));
        Self::with_parts(config, allocator, Arc::new(GuardManager::new()))
    }

    /// Create an engine with an injected allocator and map registry.
    pub fn with_parts(
        config: &EngineConfig,
        allocator: Arc<dyn BufferAllocator>,
        guards: Arc<GuardManager<MapTag>>,
    ) -> Result<Arc<Self>, StorageError> {
        if config.kind == EngineKind::DiscreteDevice && config.device_index >= config.device_count {
            return Err(StorageError::InvalidArguments(format!(
                "device index {} out of range, {} device(s) available",
                config.device_index, config.device_count
            )));
        }

        let queue = match config.kind {
            EngineKind::HostUnified => None,
            EngineKind::DiscreteDevice => Some(CommandQueue::new(&config.queue_name)?),
        };

        info!(
            kind = %config.kind,
            index = config.device_index,
            capacity = config.memory_capacity,
            "engine created"
        );

        Ok(Arc::new(Self {
            kind: config.kind,
            index: config.device_index,
            allocator,
            guards,
            queue,
        }))
    }

    pub fn kind(&self) -> EngineKind {
        self.kind
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Capability query used by storage sub-view logic.
    pub fn view_strategy(&self) -> ViewStrategy {
        match self.kind {
            EngineKind::HostUnified => ViewStrategy::ZeroCopyOffset,
            EngineKind::DiscreteDevice => ViewStrategy::DeviceSubBuffer,
        }
    }

    pub fn allocator(&self) -> &Arc<dyn BufferAllocator> {
        &self.allocator
    }

    /// Registry tracking outstanding mappings of storages on this engine.
    pub fn guards(&self) -> &GuardManager<MapTag> {
        &self.guards
    }

    /// Command queue of a discrete device.
    pub fn queue(&self) -> Result<&CommandQueue, StorageError> {
        self.queue.as_ref().ok_or_else(|| {
            StorageError::Unimplemented(format!("{} engine has no command queue", self.kind))
        })
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("kind", &self.kind)
            .field("index", &self.index)
            .field("allocated_bytes", &self.allocator.allocated_bytes())
            .field("mapped", &self.guards.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_kind_parsing() {
        assert_eq!("cpu".parse::<EngineKind>().unwrap(), EngineKind::HostUnified);
        assert_eq!("HOST".parse::<EngineKind>().unwrap(), EngineKind::HostUnified);
        assert_eq!("gpu".parse::<EngineKind>().unwrap(), EngineKind::DiscreteDevice);
        assert_eq!(" device ".parse::<EngineKind>().unwrap(), EngineKind::DiscreteDevice);
        assert!("fpga".parse::<EngineKind>().is_err());
    }

    #[test]
    fn test_view_strategy_follows_kind() {
        let host = Engine::new(&EngineConfig::host()).unwrap();
        let device = Engine::new(&EngineConfig::device()).unwrap();
        assert_eq!(host.view_strategy(), ViewStrategy::ZeroCopyOffset);
        assert_eq!(device.view_strategy(), ViewStrategy::DeviceSubBuffer);
    }

    #[test]
    fn test_host_engine_has_no_queue() {
        let host = Engine::new(&EngineConfig::host()).unwrap();
        let err = host.queue().unwrap_err();
        assert_eq!(err.status(), crate::Status::Unimplemented);
    }

    #[test]
    fn test_device_index_out_of_range() {
        let config = EngineConfig {
            device_index: 3,
            ..EngineConfig::device()
        };
        let err = Engine::new(&config).unwrap_err();
        assert_eq!(err.status(), crate::Status::InvalidArguments);
    }
}
