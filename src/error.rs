//! # Error Types
//!
//! Custom error types for the transmitter engine using `thiserror`.

use thiserror::Error;

use crate::protocol_id::ProtocolId;

/// Main error type for the transmitter engine
#[derive(Debug, Error)]
pub enum RfError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Capture serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Transceiver never echoed its identity register
    #[error("{chip} not responding after {attempts} reset attempts")]
    ChipNotFound { chip: &'static str, attempts: u32 },

    /// A7105 IF/VCO self-calibration failed or timed out
    #[error("Calibration failed: {0}")]
    Calibration(String),

    /// Module/protocol combination with no state machine behind it
    #[error("Unsupported protocol: {0}")]
    UnsupportedProtocol(ProtocolId),

    /// Malformed downlink frame
    #[error("Telemetry error: {0}")]
    Telemetry(String),
}

/// Result type alias for the transmitter engine
pub type Result<T> = std::result::Result<T, RfError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chip_not_found_message() {
        let err = RfError::ChipNotFound { chip: "CYRF6936", attempts: 5 };
        assert_eq!(err.to_string(), "CYRF6936 not responding after 5 reset attempts");
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: RfError = io.into();
        assert!(matches!(err, RfError::Io(_)));
    }
}
