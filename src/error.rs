//! Error types for gpuwire.

use thiserror::Error;

/// Main error type for all gpuwire operations.
#[derive(Debug, Error)]
pub enum GpuWireError {
    /// I/O error during socket or queue-pair operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error while reading the endpoint configuration.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid or incomplete endpoint/plugin configuration.
    /// Fatal at startup, before the backend serves.
    #[error("configuration error: {0}")]
    Config(String),

    /// Transport-level failure (bind/connect/listen, wrong state).
    /// Fatal to the affected communicator.
    #[error("transport error: {0}")]
    Transport(String),

    /// Protocol violation (bad framing, malformed body, oversized frame).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A typed read consumed past the buffer's write length.
    #[error("buffer underrun: needed {needed} more byte(s), {remaining} available")]
    BufferUnderrun { needed: usize, remaining: usize },

    /// Peer closed the connection.
    #[error("connection closed")]
    ConnectionClosed,
}

/// Result type alias using GpuWireError.
pub type Result<T> = std::result::Result<T, GpuWireError>;
