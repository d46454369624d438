//! Length-prefixed message framing for tagwire.
//!
//! Every message on the wire is framed as:
//! - an 8-byte payload length in native byte order
//! - exactly that many payload bytes
//!
//! The length excludes its own field and is bounded by
//! [`FrameConfig::max_payload_size`]. No partial reads, no buffer management
//! in user code.

pub mod buffer;
pub mod codec;
pub mod error;
pub mod reader;
pub mod writer;

pub use buffer::ScratchBuffer;
pub use codec::{
    decode_frame, encode_frame, Frame, FrameConfig, BUFFER_SIZE, DEFAULT_MAX_PAYLOAD,
    DEFAULT_READ_TIMEOUT, HEADER_SIZE, MAX_BUFFER_SIZE,
};
pub use error::{FrameError, Result};
pub use reader::FrameReader;
pub use writer::FrameWriter;
