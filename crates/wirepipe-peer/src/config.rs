use std::time::Duration;

use wirepipe_frame::DEFAULT_MAX_CHUNK;

/// Behavior configuration for a [`Pipe`](crate::Pipe).
///
/// The defaults carry the production constants; tests compress the
/// timescales. All timeouts must be nonzero.
#[derive(Debug, Clone)]
pub struct PipeConfig {
    /// Maximum payload size accepted by the write path, and ceiling on the
    /// declared length of incoming frames. Values above `u32::MAX` are
    /// clamped by the 4-byte length field. Default: 16 MiB.
    pub max_chunk: usize,
    /// Idle budget for a new header to arrive while linger is off, and the
    /// deadline for every payload sub-read. Default: 15 s.
    pub read_timeout: Duration,
    /// Idle budget for a new header to arrive once linger is on.
    /// Default: 2 min.
    pub linger_timeout: Duration,
    /// Deadline for putting a whole frame on the wire. Default: 1 min.
    pub write_timeout: Duration,
    /// Keepalive probe interval. Default: 1 min.
    pub ping_interval: Duration,
}

impl Default for PipeConfig {
    fn default() -> Self {
        Self {
            max_chunk: DEFAULT_MAX_CHUNK,
            read_timeout: Duration::from_secs(15),
            linger_timeout: Duration::from_secs(120),
            write_timeout: Duration::from_secs(60),
            ping_interval: Duration::from_secs(60),
        }
    }
}
