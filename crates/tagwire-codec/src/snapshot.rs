//! Un-framed whole-object dumps.
//!
//! A snapshot is exactly what [`Serializable::encode`] produces, with no
//! length header. It is meant for saving and loading a single root object
//! (usually one holding sets of records) to and from a file.

use std::io::{Read, Write};

use tracing::debug;

use crate::error::{CodecError, Result};
use crate::registry::TypeRegistry;
use crate::serializable::{encode_to_bytes, Serializable};

/// Write `value` to `dst`. Returns the number of bytes written.
pub fn write_snapshot<W, S>(dst: &mut W, value: &S) -> Result<usize>
where
    W: Write,
    S: Serializable + ?Sized,
{
    let bytes = encode_to_bytes(value);
    dst.write_all(&bytes)?;
    dst.flush()?;
    debug!(tag = %value.tag(), len = bytes.len(), "snapshot written");
    Ok(bytes.len())
}

/// Read one object from `src`, resolving its type through `registry`.
///
/// The whole source is consumed; trailing bytes after the object are an
/// error.
pub fn read_snapshot<R: Read>(
    src: &mut R,
    registry: &TypeRegistry,
) -> Result<Box<dyn Serializable>> {
    let mut bytes = Vec::new();
    src.read_to_end(&mut bytes)?;

    let mut dec = crate::binary::Decoder::new(&bytes);
    let value = registry.decode(&mut dec)?;
    if !dec.is_empty() {
        return Err(CodecError::Invalid(format!(
            "{} trailing bytes after snapshot object",
            dec.remaining()
        )));
    }
    debug!(tag = %value.tag(), len = bytes.len(), "snapshot loaded");
    Ok(value)
}
