use std::io::{ErrorKind, Write};

use bytes::{BufMut, BytesMut};
use tagwire_transport::NetStream;
use tracing::trace;

use crate::buffer::ScratchBuffer;
use crate::codec::{Frame, FrameConfig};
use crate::error::{FrameError, Result};
use crate::reader::transport_to_frame_error;

/// Writes complete frames to any `Write` stream.
pub struct FrameWriter<T> {
    inner: T,
    buf: ScratchBuffer,
    config: FrameConfig,
}

impl<T: Write> FrameWriter<T> {
    /// Create a new frame writer with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a new frame writer with explicit configuration.
    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            buf: ScratchBuffer::new(),
            config,
        }
    }

    /// Write a complete frame (blocking).
    pub fn write_frame(&mut self, frame: &Frame) -> Result<usize> {
        self.send(frame.payload.as_ref())
    }

    /// Frame and send a raw payload. Returns the payload size.
    pub fn send(&mut self, payload: &[u8]) -> Result<usize> {
        self.write_with(|body: &mut BytesMut| {
            body.put_slice(payload);
            Ok::<(), FrameError>(())
        })
    }

    /// Build a payload in place and send it as one frame.
    ///
    /// `fill` appends the payload to the buffer after the reserved header.
    /// If `fill` fails, or the payload exceeds the configured maximum,
    /// nothing is written to the stream. Returns the payload size.
    pub fn write_with<E, F>(&mut self, fill: F) -> std::result::Result<usize, E>
    where
        E: From<FrameError>,
        F: FnOnce(&mut BytesMut) -> std::result::Result<(), E>,
    {
        self.buf.begin_frame();
        fill(self.buf.body_mut())?;
        let body_len = self.buf.body_len();
        let wire = self.buf.finish_frame(self.config.max_payload_size)?;

        write_full(&mut self.inner, wire)?;
        flush_full(&mut self.inner)?;
        trace!(len = body_len, "frame sent");
        Ok(body_len)
    }

    /// Flush the underlying stream.
    pub fn flush(&mut self) -> Result<()> {
        flush_full(&mut self.inner)
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Mutably borrow the underlying stream.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Consume the writer and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Update maximum payload size for subsequent frame encoding.
    pub fn set_max_payload_size(&mut self, max_payload_size: usize) {
        self.config.max_payload_size = max_payload_size;
    }

    /// Current frame writer configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}

impl FrameWriter<NetStream> {
    /// Create a frame writer for `NetStream` and apply write timeout from config.
    pub fn with_config_net(inner: NetStream, config: FrameConfig) -> Result<Self> {
        inner
            .set_write_timeout(config.write_timeout)
            .map_err(transport_to_frame_error)?;
        Ok(Self::with_config(inner, config))
    }
}

fn write_full<W: Write>(inner: &mut W, wire: &[u8]) -> Result<()> {
    let mut offset = 0usize;
    while offset < wire.len() {
        match inner.write(&wire[offset..]) {
            Ok(0) => return Err(FrameError::ConnectionClosed),
            Ok(n) => offset += n,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(FrameError::Io(err)),
        }
    }
    Ok(())
}

fn flush_full<W: Write>(inner: &mut W) -> Result<()> {
    loop {
        match inner.flush() {
            Ok(()) => return Ok(()),
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(FrameError::Io(err)),
        }
    }
}
