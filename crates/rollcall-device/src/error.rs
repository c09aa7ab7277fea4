//! Error types for device transport operations.
//!
//! These errors are transient: supervisors absorb them into retry loops and
//! health snapshots, and they never propagate to the orchestrator's caller.
//! Fatal conditions live in `rollcall_core::Error`.

/// Result type alias for device transport operations.
pub type Result<T> = std::result::Result<T, DeviceError>;

/// Errors that can occur while talking to a capture device.
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    /// Initial connection attempt failed.
    #[error("Connect failed for {device}: {message}")]
    ConnectFailed { device: String, message: String },

    /// Connection dropped or was never established.
    #[error("Device disconnected: {device}")]
    Disconnected { device: String },

    /// Operation timed out after the specified duration.
    #[error("Operation timeout after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    /// Device sent data the transport could not interpret.
    #[error("Protocol error: {message}")]
    Protocol { message: String },

    /// Semantically invalid data received from the device.
    #[error("Invalid data: {message}")]
    InvalidData { message: String },

    /// Generic I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl DeviceError {
    /// Create a new connect-failed error.
    pub fn connect_failed(device: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConnectFailed {
            device: device.into(),
            message: message.into(),
        }
    }

    /// Create a new disconnected error.
    pub fn disconnected(device: impl Into<String>) -> Self {
        Self::Disconnected {
            device: device.into(),
        }
    }

    /// Create a new timeout error.
    pub fn timeout(duration_ms: u64) -> Self {
        Self::Timeout { duration_ms }
    }

    /// Create a new protocol error.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Create a new invalid data error.
    pub fn invalid_data(message: impl Into<String>) -> Self {
        Self::InvalidData {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_failed_error() {
        let error = DeviceError::connect_failed("gate-a", "connection refused");
        assert!(matches!(error, DeviceError::ConnectFailed { .. }));
        assert_eq!(
            error.to_string(),
            "Connect failed for gate-a: connection refused"
        );
    }

    #[test]
    fn test_disconnected_error() {
        let error = DeviceError::disconnected("gate-a");
        assert_eq!(error.to_string(), "Device disconnected: gate-a");
    }

    #[test]
    fn test_timeout_error() {
        let error = DeviceError::timeout(5000);
        assert_eq!(error.to_string(), "Operation timeout after 5000ms");
    }
}
