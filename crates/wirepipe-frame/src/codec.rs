use bytes::Bytes;

use crate::error::{FrameError, Result};

/// Frame header: magic (2) + type (2) + length (4) = 8 bytes.
pub const HEADER_SIZE: usize = 8;

/// Magic bytes preceding every frame.
pub const MAGIC: [u8; 2] = [0x1F, 0xFA];

/// Default maximum payload size for outgoing writes: 16 MiB.
pub const DEFAULT_MAX_CHUNK: usize = 16 * 1024 * 1024;

/// A received frame, ready for dispatch to subscribers.
#[derive(Debug, Clone)]
pub struct Frame {
    /// The declared frame type.
    pub frame_type: u16,
    /// The payload, exactly `length` bytes (possibly empty).
    pub payload: Bytes,
}

impl Frame {
    /// Create a new frame.
    pub fn new(frame_type: u16, payload: impl Into<Bytes>) -> Self {
        Self {
            frame_type,
            payload: payload.into(),
        }
    }

    /// The total wire size of this frame (header + payload).
    pub fn wire_size(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }
}

/// Encode a frame header into the wire format.
///
/// Wire format:
/// ```text
/// ┌──────────────┬──────────┬───────────┬──────────────────┐
/// │ Magic (2B)   │ Type     │ Length    │ Payload          │
/// │ 0x1F 0xFA    │ (2B BE)  │ (4B BE)   │ (Length bytes)   │
/// └──────────────┴──────────┴───────────┴──────────────────┘
/// ```
///
/// Pure function; the payload itself is written separately by the
/// connection's write path.
pub fn encode_header(frame_type: u16, length: u32) -> [u8; HEADER_SIZE] {
    let mut header = [0u8; HEADER_SIZE];
    header[..2].copy_from_slice(&MAGIC);
    header[2..4].copy_from_slice(&frame_type.to_be_bytes());
    header[4..].copy_from_slice(&length.to_be_bytes());
    header
}

/// A decoded 8-byte frame header.
///
/// Decoding only checks the size; callers must check [`Header::is_valid`]
/// before trusting the type and length accessors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    data: [u8; HEADER_SIZE],
}

impl Header {
    /// Decode a header from raw bytes.
    ///
    /// Fails with [`FrameError::ShortHeader`] if fewer than 8 bytes are
    /// supplied. Extra bytes are ignored.
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_SIZE {
            return Err(FrameError::ShortHeader { len: data.len() });
        }
        let mut fixed = [0u8; HEADER_SIZE];
        fixed.copy_from_slice(&data[..HEADER_SIZE]);
        Ok(Self { data: fixed })
    }

    /// True iff both magic bytes match exactly.
    pub fn is_valid(&self) -> bool {
        self.data[0] == MAGIC[0] && self.data[1] == MAGIC[1]
    }

    /// The declared frame type.
    pub fn frame_type(&self) -> u16 {
        u16::from_be_bytes([self.data[2], self.data[3]])
    }

    /// The declared payload length in bytes.
    pub fn length(&self) -> u32 {
        u32::from_be_bytes([self.data[4], self.data[5], self.data[6], self.data[7]])
    }

    /// The raw header bytes.
    pub fn as_bytes(&self) -> &[u8; HEADER_SIZE] {
        &self.data
    }
}
