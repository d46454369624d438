//! Reusable scratch space for building and receiving frames.

use bytes::{BufMut, BytesMut};

use crate::codec::{check_length, BUFFER_SIZE, HEADER_SIZE, MAX_BUFFER_SIZE};
use crate::error::Result;

/// A growable byte buffer owned by one reader or writer.
///
/// The buffer starts at [`BUFFER_SIZE`] and grows on demand. Once it has
/// grown past [`MAX_BUFFER_SIZE`], it is swapped for a fresh default-sized
/// allocation as soon as a smaller frame comes through, so one oversized
/// message does not pin memory for the life of a connection.
#[derive(Debug)]
pub struct ScratchBuffer {
    buf: BytesMut,
}

impl Default for ScratchBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl ScratchBuffer {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(BUFFER_SIZE),
        }
    }

    /// Start a new outgoing frame: clears the buffer and reserves the header.
    pub fn begin_frame(&mut self) {
        if self.buf.capacity() > MAX_BUFFER_SIZE {
            self.release();
        }
        self.buf.clear();
        self.buf.put_bytes(0, HEADER_SIZE);
    }

    /// The buffer the payload is appended to, after the reserved header.
    pub fn body_mut(&mut self) -> &mut BytesMut {
        &mut self.buf
    }

    /// Size of the payload written since [`begin_frame`](Self::begin_frame).
    pub fn body_len(&self) -> usize {
        self.buf.len().saturating_sub(HEADER_SIZE)
    }

    /// Back-patch the header with the payload length and return the whole frame.
    pub fn finish_frame(&mut self, max_payload: usize) -> Result<&[u8]> {
        let body_len = self.body_len();
        check_length(body_len as u64, max_payload)?;
        self.buf[..HEADER_SIZE].copy_from_slice(&(body_len as u64).to_ne_bytes());
        Ok(&self.buf[..])
    }

    /// Size the buffer to receive exactly `len` bytes and return it.
    pub fn prepare_receive(&mut self, len: usize) -> &mut [u8] {
        if self.buf.capacity() > MAX_BUFFER_SIZE && len < MAX_BUFFER_SIZE {
            self.release();
        }
        self.buf.clear();
        self.buf.resize(len, 0);
        &mut self.buf[..]
    }

    /// The current contents.
    pub fn as_slice(&self) -> &[u8] {
        &self.buf[..]
    }

    /// Drop the current allocation and go back to the default capacity.
    pub fn release(&mut self) {
        self.buf = BytesMut::with_capacity(BUFFER_SIZE);
    }

    pub fn capacity(&self) -> usize {
        self.buf.capacity()
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}
