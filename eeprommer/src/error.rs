//! Error types for eeprommer.

use std::io;
use thiserror::Error;

use crate::programmer::Operation;

/// Result type for eeprommer operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for eeprommer operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The serial endpoint could not be opened.
    #[error("Cannot open serial port {port}: {source}")]
    Connection {
        /// Port name/path that failed to open.
        port: String,
        /// Underlying cause (invalid port, device absent, permission denied).
        #[source]
        source: io::Error,
    },

    /// Expected bytes were not received within the deadline.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// The device answered with an unexpected acknowledgement byte.
    #[error("No ack for {operation}: expected {expected:#04x}, got {}", display_ack(.actual))]
    Ack {
        /// Operation that was waiting for the ack.
        operation: Operation,
        /// Ack byte the operation requires.
        expected: u8,
        /// Byte actually received, if any.
        actual: Option<u8>,
    },

    /// Verify found differing bytes.
    #[error("Verify failed: {count} differences found")]
    Mismatch {
        /// Number of differing byte positions.
        count: usize,
    },

    /// A required source or destination is missing or invalid.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A numeric frame field does not fit its fixed hex width.
    #[error("Frame field {field} = {value:#x} does not fit in {digits} hex digits")]
    FieldOverflow {
        /// Name of the field.
        field: &'static str,
        /// Rejected value.
        value: u64,
        /// Allotted width in hex digits.
        digits: usize,
    },

    /// I/O error (serial port, file operations).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error.
    #[cfg(feature = "native")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),
}

#[allow(clippy::ref_option)]
fn display_ack(actual: &Option<u8>) -> String {
    actual.map_or_else(|| "nothing".to_string(), |b| format!("{b:#04x}"))
}
