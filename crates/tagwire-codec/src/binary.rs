//! Binary encode/decode helpers.
//!
//! Layout rules:
//! - fixed-width primitives are raw native-endian copies
//! - byte strings are a `u64` length followed by the raw bytes
//! - wide strings are a `u64` character count followed by the raw
//!   [`WideChar`] units
//! - sets are a `u64` element count followed by each element in the set's
//!   own (ascending) order

use std::collections::BTreeSet;

use bytes::{BufMut, BytesMut};

use crate::error::{CodecError, Result};
use crate::serializable::Serializable;
use crate::tag::Tag;

/// Platform wide character unit.
#[cfg(windows)]
pub type WideChar = u16;

/// Platform wide character unit.
#[cfg(not(windows))]
pub type WideChar = u32;

/// A fixed-width value copied to and from the wire in native byte order.
pub trait Primitive: Copy {
    /// Encoded width in bytes.
    const SIZE: usize;

    fn put_ne(self, dst: &mut BytesMut);

    /// Decode from exactly [`Self::SIZE`] bytes.
    fn from_ne(src: &[u8]) -> Result<Self>;
}

macro_rules! impl_primitive {
    ($($ty:ty),* $(,)?) => {
        $(
            impl Primitive for $ty {
                const SIZE: usize = std::mem::size_of::<$ty>();

                fn put_ne(self, dst: &mut BytesMut) {
                    dst.put_slice(&self.to_ne_bytes());
                }

                fn from_ne(src: &[u8]) -> Result<Self> {
                    let mut raw = [0u8; std::mem::size_of::<$ty>()];
                    raw.copy_from_slice(&src[..Self::SIZE]);
                    Ok(<$ty>::from_ne_bytes(raw))
                }
            }
        )*
    };
}

impl_primitive!(u8, i8, u16, i16, u32, i32, u64, i64, u128, i128, f32, f64);

impl Primitive for bool {
    const SIZE: usize = 1;

    fn put_ne(self, dst: &mut BytesMut) {
        dst.put_u8(u8::from(self));
    }

    fn from_ne(src: &[u8]) -> Result<Self> {
        match src[0] {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(CodecError::Invalid(format!("bool byte {other}"))),
        }
    }
}

/// Appends encoded values to a byte buffer.
#[derive(Debug)]
pub struct Encoder<'a> {
    buf: &'a mut BytesMut,
    start: usize,
}

impl<'a> Encoder<'a> {
    pub fn new(buf: &'a mut BytesMut) -> Self {
        let start = buf.len();
        Self { buf, start }
    }

    /// Bytes written through this encoder.
    pub fn written(&self) -> usize {
        self.buf.len() - self.start
    }

    pub fn put<P: Primitive>(&mut self, value: P) {
        value.put_ne(self.buf);
    }

    pub fn put_tag(&mut self, tag: Tag) {
        self.buf.put_u8(tag.0);
    }

    /// Write a `u64` length or count prefix.
    pub fn put_len(&mut self, len: usize) {
        self.put(len as u64);
    }

    /// Length-prefixed raw bytes.
    pub fn put_bytes(&mut self, bytes: &[u8]) {
        self.put_len(bytes.len());
        self.buf.put_slice(bytes);
    }

    /// Length-prefixed string, written as its raw bytes.
    pub fn put_str(&mut self, value: &str) {
        self.put_bytes(value.as_bytes());
    }

    /// Count-prefixed wide string.
    pub fn put_wide(&mut self, value: &[WideChar]) {
        self.put_len(value.len());
        for unit in value {
            self.put(*unit);
        }
    }

    /// Count-prefixed set of primitives.
    pub fn put_set<P: Primitive + Ord>(&mut self, set: &BTreeSet<P>) {
        self.put_len(set.len());
        for value in set {
            self.put(*value);
        }
    }

    /// A nested object: its tag followed by its fields.
    pub fn put_object<S: Serializable + ?Sized>(&mut self, value: &S) {
        value.encode(self);
    }

    /// Count-prefixed set of objects.
    pub fn put_object_set<S: Serializable + Ord>(&mut self, set: &BTreeSet<S>) {
        self.put_len(set.len());
        for value in set {
            value.encode(self);
        }
    }
}

/// Reads encoded values from a byte slice with bounds checks.
#[derive(Debug, Clone)]
pub struct Decoder<'a> {
    src: &'a [u8],
    pos: usize,
}

impl<'a> Decoder<'a> {
    pub fn new(src: &'a [u8]) -> Self {
        Self { src, pos: 0 }
    }

    /// Bytes consumed so far.
    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.src.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    fn take(&mut self, needed: usize) -> Result<&'a [u8]> {
        let remaining = self.remaining();
        if needed > remaining {
            return Err(CodecError::UnexpectedEof { needed, remaining });
        }
        let src = self.src;
        let out = &src[self.pos..self.pos + needed];
        self.pos += needed;
        Ok(out)
    }

    pub fn get<P: Primitive>(&mut self) -> Result<P> {
        let raw = self.take(P::SIZE)?;
        P::from_ne(raw)
    }

    /// Read the leading tag without consuming it.
    pub fn peek_tag(&self) -> Result<Tag> {
        match self.src.get(self.pos) {
            Some(byte) => Ok(Tag(*byte)),
            None => Err(CodecError::UnexpectedEof {
                needed: 1,
                remaining: 0,
            }),
        }
    }

    pub fn get_tag(&mut self) -> Result<Tag> {
        Ok(Tag(self.get::<u8>()?))
    }

    /// Consume a tag and fail unless it is exactly `expected`.
    pub fn expect_tag(&mut self, expected: Tag) -> Result<()> {
        let found = self.get_tag()?;
        if found != expected {
            return Err(CodecError::TagMismatch { expected, found });
        }
        Ok(())
    }

    /// Read a `u64` length or count prefix.
    pub fn get_len(&mut self) -> Result<usize> {
        let raw = self.get::<u64>()?;
        usize::try_from(raw).map_err(|_| CodecError::LengthOverflow(raw))
    }

    /// Read a count prefix for elements of at least `min_size` bytes each,
    /// rejecting counts the remaining input cannot possibly hold.
    fn get_count(&mut self, min_size: usize) -> Result<usize> {
        let count = self.get_len()?;
        let needed = count
            .checked_mul(min_size)
            .ok_or(CodecError::LengthOverflow(count as u64))?;
        let remaining = self.remaining();
        if needed > remaining {
            return Err(CodecError::UnexpectedEof { needed, remaining });
        }
        Ok(count)
    }

    /// Length-prefixed raw bytes, borrowed from the input.
    pub fn get_bytes(&mut self) -> Result<&'a [u8]> {
        let len = self.get_len()?;
        self.take(len)
    }

    /// Length-prefixed string. The bytes must be valid UTF-8.
    pub fn get_string(&mut self) -> Result<String> {
        let bytes = self.get_bytes()?;
        Ok(String::from_utf8(bytes.to_vec())?)
    }

    /// Count-prefixed wide string.
    pub fn get_wide(&mut self) -> Result<Vec<WideChar>> {
        let count = self.get_count(WideChar::SIZE)?;
        let mut out = Vec::with_capacity(count);
        for _ in 0..count {
            out.push(self.get::<WideChar>()?);
        }
        Ok(out)
    }

    /// Count-prefixed set of primitives.
    pub fn get_set<P: Primitive + Ord>(&mut self) -> Result<BTreeSet<P>> {
        let count = self.get_count(P::SIZE)?;
        let mut out = BTreeSet::new();
        for _ in 0..count {
            out.insert(self.get::<P>()?);
        }
        Ok(out)
    }

    /// Decode a nested object into an existing instance.
    pub fn get_object_into<S: Serializable + ?Sized>(&mut self, value: &mut S) -> Result<()> {
        value.decode(self)
    }

    /// Decode a nested object of a statically known type.
    pub fn get_object<S: Serializable + Default>(&mut self) -> Result<S> {
        let mut value = S::default();
        value.decode(self)?;
        Ok(value)
    }

    /// Count-prefixed set of objects of a statically known type.
    pub fn get_object_set<S: Serializable + Default + Ord>(&mut self) -> Result<BTreeSet<S>> {
        // Every object carries at least its tag byte.
        let count = self.get_count(1)?;
        let mut out = BTreeSet::new();
        for _ in 0..count {
            out.insert(self.get_object::<S>()?);
        }
        Ok(out)
    }
}
