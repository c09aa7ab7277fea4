use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Duplicate device id: {0}")]
    DuplicateDeviceId(String),

    #[error("Invalid device address '{address}': {message}")]
    InvalidAddress { address: String, message: String },

    #[error("Invalid device id: {0}")]
    InvalidDeviceId(String),

    #[error("Invalid match quality: {0} (must be 0-100)")]
    InvalidMatchQuality(u8),

    // Session lifecycle errors
    #[error("An attendance session is already active")]
    SessionActive,

    #[error("No attendance session is active")]
    NoActiveSession,

    // Device lookup errors
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Device {0} is in use by an active supervisor or probe")]
    DeviceBusy(String),

    #[error("Connection test failed: {0}")]
    ConnectionTest(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
