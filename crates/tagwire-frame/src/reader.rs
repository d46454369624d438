use std::io::{ErrorKind, Read};

use bytes::Bytes;
use tagwire_transport::NetStream;
use tracing::trace;

use crate::buffer::ScratchBuffer;
use crate::codec::{check_length, read_length, Frame, FrameConfig, HEADER_SIZE};
use crate::error::{FrameError, Result};

/// Reads complete frames from any `Read` stream.
///
/// The header is read exactly, the declared length is checked against the
/// configured maximum, and only then is the body read. Callers always get
/// complete frames.
pub struct FrameReader<T> {
    inner: T,
    buf: ScratchBuffer,
    config: FrameConfig,
}

impl<T: Read> FrameReader<T> {
    /// Create a new frame reader with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a new frame reader with explicit configuration.
    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            buf: ScratchBuffer::new(),
            config,
        }
    }

    /// Read the next complete frame (blocking).
    ///
    /// Returns `Err(FrameError::ConnectionClosed)` when EOF is reached,
    /// whether at a frame boundary or mid-frame.
    pub fn read_frame(&mut self) -> Result<Frame> {
        let mut header = [0u8; HEADER_SIZE];
        read_full(&mut self.inner, &mut header)?;

        let declared = read_length(&header);
        let len = check_length(declared, self.config.max_payload_size)?;

        let body = self.buf.prepare_receive(len);
        read_full(&mut self.inner, body)?;
        trace!(len, "frame received");

        Ok(Frame {
            payload: Bytes::copy_from_slice(self.buf.as_slice()),
        })
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Mutably borrow the underlying stream.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Consume the reader and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Update maximum payload size for subsequent frame decoding.
    pub fn set_max_payload_size(&mut self, max_payload_size: usize) {
        self.config.max_payload_size = max_payload_size;
    }

    /// Current frame reader configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }

    /// Current capacity of the receive buffer.
    pub fn buffer_capacity(&self) -> usize {
        self.buf.capacity()
    }
}

impl FrameReader<NetStream> {
    /// Create a frame reader for `NetStream` and apply read timeout from config.
    pub fn with_config_net(inner: NetStream, config: FrameConfig) -> Result<Self> {
        inner
            .set_read_timeout(config.read_timeout)
            .map_err(transport_to_frame_error)?;
        Ok(Self::with_config(inner, config))
    }
}

fn read_full<R: Read>(inner: &mut R, mut dst: &mut [u8]) -> Result<()> {
    while !dst.is_empty() {
        match inner.read(dst) {
            Ok(0) => return Err(FrameError::ConnectionClosed),
            Ok(n) => dst = &mut dst[n..],
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(FrameError::Io(err)),
        }
    }
    Ok(())
}

pub(crate) fn transport_to_frame_error(err: tagwire_transport::TransportError) -> FrameError {
    match err {
        tagwire_transport::TransportError::Io(io)
        | tagwire_transport::TransportError::Accept(io) => FrameError::Io(io),
        tagwire_transport::TransportError::Bind { source, .. }
        | tagwire_transport::TransportError::Connect { source, .. } => FrameError::Io(source),
        other => FrameError::Io(std::io::Error::other(other.to_string())),
    }
}
