use std::time::Duration;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{FrameError, Result};

/// Frame header: payload length as a native-endian `u64`.
pub const HEADER_SIZE: usize = std::mem::size_of::<u64>();

/// Default capacity of network buffers.
pub const BUFFER_SIZE: usize = 8 * 1024;

/// Receive buffers grown past this size are released once a smaller frame arrives.
pub const MAX_BUFFER_SIZE: usize = BUFFER_SIZE * 4;

/// Default maximum payload size: 64 KiB.
pub const DEFAULT_MAX_PAYLOAD: usize = BUFFER_SIZE * 8;

/// Default receive timeout for blocking reads.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(10);

/// A single framed payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// The message payload.
    pub payload: Bytes,
}

impl Frame {
    /// Create a new frame.
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            payload: payload.into(),
        }
    }

    /// Payload length in bytes (the value carried in the header).
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// Whether the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// The total wire size of this frame (header + payload).
    pub fn wire_size(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }
}

/// Encode a frame into the wire format.
///
/// Wire format:
/// ```text
/// ┌──────────────────────┬───────────────────────┐
/// │ Length (8B, native)  │ Payload (Length bytes) │
/// └──────────────────────┴───────────────────────┘
/// ```
pub fn encode_frame(payload: &[u8], dst: &mut BytesMut, max_payload: usize) -> Result<()> {
    if payload.len() > max_payload {
        return Err(FrameError::PayloadTooLarge {
            size: payload.len() as u64,
            max: max_payload,
        });
    }
    dst.reserve(HEADER_SIZE + payload.len());
    dst.put_slice(&(payload.len() as u64).to_ne_bytes());
    dst.put_slice(payload);
    Ok(())
}

/// Decode a frame from a buffer.
///
/// Returns `Ok(None)` if the buffer doesn't contain a complete frame yet.
/// A declared length above `max_payload` is rejected as soon as the header
/// is available, before any payload byte is consumed.
pub fn decode_frame(src: &mut BytesMut, max_payload: usize) -> Result<Option<Frame>> {
    if src.len() < HEADER_SIZE {
        return Ok(None);
    }

    let declared = read_length(&src[..HEADER_SIZE]);
    let payload_len = check_length(declared, max_payload)?;

    let total = HEADER_SIZE + payload_len;
    if src.len() < total {
        return Ok(None);
    }

    src.advance(HEADER_SIZE);
    let payload = src.split_to(payload_len).freeze();

    Ok(Some(Frame { payload }))
}

/// Read the declared payload length from a header.
pub(crate) fn read_length(header: &[u8]) -> u64 {
    let mut raw = [0u8; HEADER_SIZE];
    raw.copy_from_slice(&header[..HEADER_SIZE]);
    u64::from_ne_bytes(raw)
}

/// Validate a declared length against the configured maximum.
pub(crate) fn check_length(declared: u64, max_payload: usize) -> Result<usize> {
    match usize::try_from(declared) {
        Ok(len) if len <= max_payload => Ok(len),
        _ => Err(FrameError::PayloadTooLarge {
            size: declared,
            max: max_payload,
        }),
    }
}

/// Configuration for the frame codec.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Maximum payload size in bytes. Default: 64 KiB.
    pub max_payload_size: usize,
    /// Read timeout for blocking operations. Default: 10 s.
    pub read_timeout: Option<Duration>,
    /// Write timeout for blocking operations.
    pub write_timeout: Option<Duration>,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_payload_size: DEFAULT_MAX_PAYLOAD,
            read_timeout: Some(DEFAULT_READ_TIMEOUT),
            write_timeout: None,
        }
    }
}
