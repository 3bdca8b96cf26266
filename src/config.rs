//! Engine configuration loading from environment variables or TOML.
//!
//! Values are read from `MEMSTORE_*` environment variables with sensible
//! defaults. Invalid values fall back to defaults without crashing.
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |---|---|---|
//! | `MEMSTORE_ENGINE_KIND` | host | Engine kind (`host`/`cpu`, `device`/`gpu`) |
//! | `MEMSTORE_DEVICE_INDEX` | 0 | Device index |
//! | `MEMSTORE_DEVICE_COUNT` | 1 | Discrete devices present |
//! | `MEMSTORE_MEMORY_CAPACITY` | 1073741824 | Allocator capacity (bytes) |
//! | `MEMSTORE_QUEUE_NAME` | memstore-queue | Command queue worker thread name |

use serde::Deserialize;
use thiserror::Error;

use crate::engine::EngineKind;

const DEFAULT_CAPACITY: usize = 1024 * 1024 * 1024; // 1 GiB
const DEFAULT_QUEUE_NAME: &str = "memstore-queue";

/// Errors raised while parsing a configuration document.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid engine configuration: {0}")]
    Parse(String),
}

/// Configuration of a single engine.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub kind: EngineKind,
    pub device_index: usize,
    pub device_count: usize,
    pub memory_capacity: usize,
    pub queue_name: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            kind: EngineKind::HostUnified,
            device_index: 0,
            device_count: 1,
            memory_capacity: DEFAULT_CAPACITY,
            queue_name: DEFAULT_QUEUE_NAME.to_string(),
        }
    }
}

impl EngineConfig {
    /// Host-unified engine with default capacity.
    pub fn host() -> Self {
        Self::default()
    }

    /// Discrete-device engine with default capacity.
    pub fn device() -> Self {
        Self {
            kind: EngineKind::DiscreteDevice,
            ..Default::default()
        }
    }

    /// Load configuration from `MEMSTORE_*` environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let kind = std::env::var("MEMSTORE_ENGINE_KIND")
            .ok()
            .and_then(|v| v.parse::<EngineKind>().ok())
            .unwrap_or(defaults.kind);
        let device_index = parse_usize("MEMSTORE_DEVICE_INDEX", defaults.device_index);
        let device_count = parse_usize("MEMSTORE_DEVICE_COUNT", defaults.device_count);
        let memory_capacity = parse_usize("MEMSTORE_MEMORY_CAPACITY", defaults.memory_capacity);
        let queue_name = std::env::var("MEMSTORE_QUEUE_NAME")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or(defaults.queue_name);

        Self {
            kind,
            device_index,
            device_count,
            memory_capacity,
            queue_name,
        }
    }

    /// Parse configuration from a TOML document. Missing keys take defaults.
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        toml::from_str(source).map_err(|e| ConfigError::Parse(e.to_string()))
    }
}

/// Parse a `usize` env var, returning `default` on missing or invalid.
fn parse_usize(key: &str, default: usize) -> usize {
    match std::env::var(key) {
        Ok(val) => val.trim().parse::<usize>().unwrap_or(default),
        Err(_) => default,
    }
}
