use std::time::Duration;

use wirepipe_frame::FrameError;

/// Errors that can occur in pipe operations.
#[derive(Debug, thiserror::Error)]
pub enum PipeError {
    /// Frame-level error (codec, write-path validation, frame I/O).
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// An I/O error outside the frame layer.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Pub/sub JSON serialization/deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// The pipe is closed; no further operations succeed.
    #[error("pipe is closed")]
    Closed,

    /// `close` was called on an already-closed pipe.
    #[error("pipe already closed")]
    AlreadyClosed,

    /// A wait on the RTT slot timed out.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// Failed to bind the listening socket.
    #[error("failed to bind to {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },

    /// Failed to connect to the remote endpoint.
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        source: std::io::Error,
    },

    /// The listener gave up accepting connections.
    #[error("giving up after {failures} consecutive accept failures: {source}")]
    AcceptFailed {
        failures: u32,
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, PipeError>;
