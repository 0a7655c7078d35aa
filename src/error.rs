//! Error types for the audio link
//!
//! Errors are split by subsystem. Channel loops use [`Error::is_recoverable`]
//! to decide between reconnecting and shutting the whole service down.

use std::io;
use thiserror::Error;

/// Main error type for the application
#[derive(Error, Debug)]
pub enum Error {
    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Channel thread failed: {0}")]
    Panicked(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// Peer and socket level failures are retried; everything else stops the runner.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::Network(_))
    }
}

/// Audio subsystem errors
#[derive(Error, Debug)]
pub enum AudioError {
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("Chunk size mismatch: expected {expected} bytes, got {actual}")]
    ChunkSize { expected: usize, actual: usize },

    #[error("Device closed")]
    Closed,
}

/// Network errors
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Cannot bind {addr}: {source}")]
    BindConflict {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("Cannot connect to {addr}: {source}")]
    ConnectFailed {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("Cannot resolve {0}")]
    Resolve(String),

    #[error("Connection reset: {0}")]
    PeerReset(#[source] io::Error),

    #[error("Connection closed by peer")]
    PeerClosed,
}

impl NetworkError {
    /// Classify an I/O failure on an established stream.
    pub fn from_stream(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::UnexpectedEof => NetworkError::PeerClosed,
            _ => NetworkError::PeerReset(err),
        }
    }
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Cannot access {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Malformed configuration: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Result type alias for the application
pub type Result<T> = std::result::Result<T, Error>;
