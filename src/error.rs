// Copyright 2024-2026 memstore Contributors
// Licensed under the Apache License, Version 2.0

//! Storage error types and the closed status set reported by core operations.
//!
//! All errors are fail-closed: a failed operation leaves no partial state
//! visible to the caller.

use std::fmt;
use thiserror::Error;

use crate::memory::GuardError;

/// Status codes surfaced by every core operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    Success,
    InvalidArguments,
    RuntimeError,
    OutOfMemory,
    Unimplemented,
}

impl Status {
    /// Status of an operation result.
    pub fn of<T>(result: &Result<T, StorageError>) -> Self {
        match result {
            Ok(_) => Status::Success,
            Err(e) => e.status(),
        }
    }

    pub fn is_success(&self) -> bool {
        *self == Status::Success
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Success => write!(f, "success"),
            Status::InvalidArguments => write!(f, "invalid_arguments"),
            Status::RuntimeError => write!(f, "runtime_error"),
            Status::OutOfMemory => write!(f, "out_of_memory"),
            Status::Unimplemented => write!(f, "unimplemented"),
        }
    }
}

/// Errors that can occur in storage, guard, and transfer operations.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("Out of device memory: required {required} bytes, available {available} bytes")]
    OutOfMemory { required: usize, available: usize },

    #[error("Map protocol violation: {0}")]
    Guard(#[from] GuardError),

    #[error("Device operation failed: {0}")]
    DeviceFailure(String),

    #[error("Capability not supported: {0}")]
    Unimplemented(String),
}

impl StorageError {
    /// The status code this error is reported as.
    pub fn status(&self) -> Status {
        match self {
            Self::InvalidArguments(_) => Status::InvalidArguments,
            Self::OutOfMemory { .. } => Status::OutOfMemory,
            Self::Guard(_) | Self::DeviceFailure(_) => Status::RuntimeError,
            Self::Unimplemented(_) => Status::Unimplemented,
        }
    }

    /// Returns true if this error indicates a caller bug rather than a
    /// resource or device condition.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(self, Self::Guard(_))
    }
}

impl From<&StorageError> for Status {
    fn from(err: &StorageError) -> Self {
        err.status()
    }
}
