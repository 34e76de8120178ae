//! Typed frame codec for the wirepipe TCP transport.
//!
//! Every message on a wirepipe connection is one frame:
//! - A 2-byte magic number (0x1F 0xFA) for stream sanity
//! - A 2-byte big-endian frame type
//! - A 4-byte big-endian payload length
//! - `length` payload bytes
//!
//! The codec only understands whole 8-byte headers; payload transfer and
//! partial reads are the connection's job, not the codec's.

pub mod codec;
pub mod error;
pub mod frame_type;

pub use codec::{encode_header, Frame, Header, DEFAULT_MAX_CHUNK, HEADER_SIZE, MAGIC};
pub use error::{FrameError, Result};
pub use frame_type::{LINGER, PING, PONG, PUB_SUB, USER_TYPE_START};
