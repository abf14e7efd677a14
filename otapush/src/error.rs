//! Error types for otapush.

use std::io;
use thiserror::Error;

/// Result type for otapush operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for otapush operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (serial port, file operations).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error.
    #[cfg(feature = "native")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// The device violated the transfer protocol (out-of-order ACK,
    /// malformed status fields, unexpected status for the current phase).
    #[error("Protocol violation: {0}")]
    Protocol(String),

    /// The device rejected or aborted the transfer with an `__OTA_ERROR__` line.
    #[error("Device error: {0}")]
    Device(String),

    /// No qualifying status line arrived within the phase deadline.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Invalid configuration (chunk size, window size, ...).
    #[error("Configuration error: {0}")]
    Config(String),

    /// The transfer was cancelled by the embedding application.
    #[error("Transfer interrupted")]
    Interrupted,
}
