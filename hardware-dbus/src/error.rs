//! Error types for hardware facade operations

use hardware_types::{Capability, ErrorType, Udi};
use thiserror::Error;

use crate::ops::OperationKind;

#[derive(Error, Debug)]
pub enum HardwareError {
    #[error("unknown device: {0}")]
    UnknownDevice(Udi),

    #[error("device {udi} does not support {capability}")]
    UnsupportedCapability { udi: Udi, capability: Capability },

    /// A backend reported an operation failure. `message` is the backend's
    /// human-readable text, preserved verbatim for display.
    #[error("operation failed ({kind:?}): {message}")]
    Operation { kind: ErrorType, message: String },

    #[error("timed out waiting for {operation} completion on {udi}")]
    Timeout { udi: Udi, operation: OperationKind },

    #[error("invalid query expression: {0}")]
    Query(String),

    #[error("D-Bus error: {0}")]
    Bus(#[from] zbus::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl HardwareError {
    /// The taxonomy member this error classifies as.
    pub fn error_type(&self) -> ErrorType {
        match self {
            HardwareError::UnknownDevice(_) => ErrorType::UnknownDevice,
            HardwareError::UnsupportedCapability { .. } => ErrorType::UnsupportedCapability,
            HardwareError::Operation { kind, .. } => *kind,
            HardwareError::Timeout { .. } => ErrorType::OperationFailed,
            HardwareError::Query(_) => ErrorType::InvalidOption,
            HardwareError::Bus(_) | HardwareError::Io(_) => ErrorType::OperationFailed,
        }
    }
}
