//! Error types for the Mosaic collective backend

use crate::{DataType, DeviceHandle, OpKind};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for Mosaic operations
#[derive(Debug, Error, Clone, PartialEq, Serialize, Deserialize)]
pub enum MosaicError {
    /// The operation is declared but has no implementation path
    #[error("Unsupported operation: `{op}` is not supported by this backend")]
    UnsupportedOperation { op: OpKind },

    /// Tensor lists violate a per-operation shape or placement invariant
    #[error("Shape or device mismatch in `{op}`: {message}")]
    ShapeMismatch { op: OpKind, message: String },

    /// No usable device, or no vendor sub-group for the resolved device
    #[error("No device available: {message}")]
    NoDeviceAvailable { message: String },

    /// Full-mesh formation or a rendezvous store exchange failed
    #[error("Rendezvous failure: {message}")]
    Rendezvous { message: String },

    /// A vendor sub-group failed while executing a delegated operation
    #[error("Vendor failure in `{op}` on {device}: {message}")]
    VendorDelegate {
        op: OpKind,
        device: DeviceHandle,
        message: String,
    },

    /// Element type has no transport instantiation
    #[error("Unsupported dtype: {dtype}")]
    UnsupportedDtype { dtype: DataType },

    /// A one-shot result slot was completed twice
    #[error("Work already completed: {message}")]
    AlreadyCompleted { message: String },

    /// Terminal state queried before completion
    #[error("Work state indeterminate: {message}")]
    Indeterminate { message: String },

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Device enumeration/health query errors
    #[error("Device error: {message}")]
    Device { message: String },

    /// Timeout errors
    #[error("Operation timed out: {message}")]
    Timeout { message: String },

    /// I/O errors
    #[error("I/O error: {message}")]
    IO { message: String },

    /// Network errors
    #[error("Network error: {message}")]
    Network { message: String },

    /// Serialization/deserialization errors
    #[error("Serialization error: {message}")]
    Serialization { message: String },

    /// Internal errors (should not happen in normal operation)
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl MosaicError {
    /// Create an unsupported operation error
    pub fn unsupported_operation(op: OpKind) -> Self {
        Self::UnsupportedOperation { op }
    }

    /// Create a shape/device mismatch error
    pub fn shape_mismatch(op: OpKind, message: impl Into<String>) -> Self {
        Self::ShapeMismatch {
            op,
            message: message.into(),
        }
    }

    /// Create a missing vendor sub-group error for `op` on `device`
    pub fn no_device_available(op: OpKind, device: DeviceHandle) -> Self {
        Self::NoDeviceAvailable {
            message: format!("`{}` on {}: no vendor sub-group serves this device", op, device),
        }
    }

    /// Create an error for a process that found no usable device at all
    pub fn no_devices(message: impl Into<String>) -> Self {
        Self::NoDeviceAvailable {
            message: message.into(),
        }
    }

    /// Create a rendezvous error
    pub fn rendezvous(message: impl Into<String>) -> Self {
        Self::Rendezvous {
            message: message.into(),
        }
    }

    /// Wrap a vendor failure with the operation and device it happened on
    pub fn vendor_delegate(op: OpKind, device: DeviceHandle, message: impl Into<String>) -> Self {
        Self::VendorDelegate {
            op,
            device,
            message: message.into(),
        }
    }

    /// Create an unsupported dtype error
    pub fn unsupported_dtype(dtype: DataType) -> Self {
        Self::UnsupportedDtype { dtype }
    }

    /// Create an already-completed error
    pub fn already_completed(message: impl Into<String>) -> Self {
        Self::AlreadyCompleted {
            message: message.into(),
        }
    }

    /// Create an indeterminate-state error
    pub fn indeterminate(message: impl Into<String>) -> Self {
        Self::Indeterminate {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a device error
    pub fn device(message: impl Into<String>) -> Self {
        Self::Device {
            message: message.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::Timeout {
            message: message.into(),
        }
    }

    /// Create an I/O error
    pub fn io(message: impl Into<String>) -> Self {
        Self::IO {
            message: message.into(),
        }
    }

    /// Create a network error
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    /// Create a serialization error
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Operation this error is attributed to, when known
    pub fn operation(&self) -> Option<OpKind> {
        match self {
            Self::UnsupportedOperation { op }
            | Self::ShapeMismatch { op, .. }
            | Self::VendorDelegate { op, .. } => Some(*op),
            _ => None,
        }
    }

    /// Check if this error belongs to process bring-up rather than a single call
    pub fn is_bringup_error(&self) -> bool {
        matches!(self, Self::Rendezvous { .. } | Self::Config { .. })
    }
}

/// Conversion from std::io::Error
impl From<std::io::Error> for MosaicError {
    fn from(err: std::io::Error) -> Self {
        Self::io(format!("{}", err))
    }
}

/// Conversion from serde_json::Error
impl From<serde_json::Error> for MosaicError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization(format!("{}", err))
    }
}

/// Conversion from toml::de::Error
impl From<toml::de::Error> for MosaicError {
    fn from(err: toml::de::Error) -> Self {
        Self::config(format!("{}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_name_operation_and_device() {
        let err = MosaicError::no_device_available(OpKind::Allreduce, DeviceHandle::mlu(2));
        let text = err.to_string();
        assert!(text.contains("allreduce"));
        assert!(text.contains("mlu:2"));

        let err = MosaicError::unsupported_operation(OpKind::RecvAnysource);
        assert_eq!(err.operation(), Some(OpKind::RecvAnysource));
        assert!(err.to_string().contains("recvAnysource"));
    }

    #[test]
    fn test_bringup_classification() {
        assert!(MosaicError::rendezvous("peer lost").is_bringup_error());
        assert!(MosaicError::config("bad rank").is_bringup_error());
        assert!(!MosaicError::timeout("slow").is_bringup_error());
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        assert!(matches!(MosaicError::from(io), MosaicError::IO { .. }));
    }
}
