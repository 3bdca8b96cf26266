//! Telemetry module.
//!
//! Structured logging setup. Library code emits `tracing` events and
//! `metrics` counters; installing subscribers and recorders is up to the
//! embedding program.

mod logging;
pub(crate) mod metrics;

pub use logging::{init_logging, LogConfig, LogError, LogFormat};
pub use metrics::{record_bridge_transfer, TransferDirection, BRIDGE_BYTES_TOTAL};
