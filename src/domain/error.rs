use thiserror::Error;

/// TempBridge unified error type
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Serial port '{device}' is unavailable: {message}")]
    PortUnavailable { device: String, message: String },

    #[error("Serial port '{device}' not found")]
    PortNotFound { device: String },

    #[error("Failed to configure serial port '{device}': {message}")]
    PortConfiguration { device: String, message: String },

    #[error("Device '{device}' is not a serial port")]
    UnsupportedDevice { device: String },

    #[error("Failed to connect to {server}: {message}")]
    Connect { server: String, message: String },

    #[error("Authentication failed for '{username}': {message}")]
    Auth { username: String, message: String },

    #[error("Messaging session not ready: {operation} requires {required}")]
    NotConnected { operation: String, required: String },

    #[error("Invalid state: {message}")]
    InvalidState { message: String },

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("Output error: {0}")]
    Output(String),
}

impl BridgeError {
    /// True for failures raised while setting up the serial line or the session.
    pub fn is_setup_error(&self) -> bool {
        matches!(
            self,
            BridgeError::PortUnavailable { .. }
                | BridgeError::PortNotFound { .. }
                | BridgeError::PortConfiguration { .. }
                | BridgeError::UnsupportedDevice { .. }
                | BridgeError::Connect { .. }
                | BridgeError::Auth { .. }
        )
    }
}

pub type BridgeResult<T> = Result<T, BridgeError>;
