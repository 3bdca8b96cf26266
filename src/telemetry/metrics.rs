//! Metrics emitted through the `metrics` facade.
//!
//! No recorder is installed here; embedders choose their own exporter.

/// Counter of bytes moved by the host bridge, labelled by `direction`.
pub const BRIDGE_BYTES_TOTAL: &str = "memstore_bridge_bytes_total";

/// Direction of a host bridge transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferDirection {
    /// Host slice into storage.
    Write,
    /// Storage into host slice.
    Read,
}

impl TransferDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferDirection::Write => "write",
            TransferDirection::Read => "read",
        }
    }
}

/// Record a completed host bridge transfer of `bytes` bytes.
pub fn record_bridge_transfer(direction: TransferDirection, bytes: usize) {
    ::metrics::counter!(BRIDGE_BYTES_TOTAL, "direction" => direction.as_str())
        .increment(bytes as u64);
}
