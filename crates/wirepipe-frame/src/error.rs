/// Errors that can occur at the frame layer.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// Fewer than 8 header bytes were supplied to the decoder.
    #[error("header not to size ({len} bytes, need 8)")]
    ShortHeader { len: usize },

    /// The frame header does not start with the magic bytes 0x1F 0xFA.
    #[error("invalid frame magic (expected 0x1FFA)")]
    InvalidMagic,

    /// The payload exceeds the configured maximum chunk size.
    #[error("chunk too large ({size} bytes, max {max})")]
    ChunkTooLarge { size: usize, max: usize },

    /// A zero-length payload was passed to an explicit data write.
    #[error("refusing to send a chunk of size 0")]
    EmptyChunk,

    /// An I/O error occurred while reading or writing frames.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The connection was closed before a complete frame was transferred.
    #[error("connection closed (incomplete frame)")]
    ConnectionClosed,
}

pub type Result<T> = std::result::Result<T, FrameError>;
