//! # Error Types
//!
//! Custom error types for Rotor Bridge using `thiserror`.

use thiserror::Error;

/// Main error type for Rotor Bridge
#[derive(Debug, Error)]
pub enum RotorBridgeError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// Serial port errors
    #[error("Serial port error: {0}")]
    Serial(#[from] tokio_serial::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Event record serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Command issued while the rotor link is down
    #[error("Rotor is not connected")]
    NotConnected,
}

/// Result type alias for Rotor Bridge
pub type Result<T> = std::result::Result<T, RotorBridgeError>;
