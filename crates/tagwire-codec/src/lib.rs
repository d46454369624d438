//! Self-describing binary objects for tagwire.
//!
//! Every payload starts with a one-byte [`Tag`] naming its concrete type,
//! followed by its fields, base fields first. A [`TypeRegistry`] maps tags to
//! constructors and parent tags so a receiver can decode a payload without
//! knowing its type up front:
//!
//! ```
//! use bytes::BytesMut;
//! use tagwire_codec::{Encoder, Decoder, Ping, Serializable, TypeRegistry};
//!
//! let registry = TypeRegistry::with_builtins();
//!
//! let mut buf = BytesMut::new();
//! Ping::default().encode(&mut Encoder::new(&mut buf));
//!
//! let decoded = registry.decode(&mut Decoder::new(&buf)).unwrap();
//! assert!(decoded.downcast_ref::<Ping>().is_some());
//! ```
//!
//! Primitives are copied in native byte order. Peers must share the same
//! architecture.

pub mod binary;
pub mod error;
pub mod packet;
pub mod registry;
pub mod serializable;
pub mod snapshot;
pub mod tag;

pub use binary::{Decoder, Encoder, Primitive, WideChar};
pub use error::{CodecError, Result};
pub use packet::{Ping, PingReply, TrackablePacket, TransactionReply};
pub use registry::{global, install, Constructor, TypeInfo, TypeRegistry};
pub use serializable::{encode_to_bytes, AsAny, Serializable, Trackable, Transaction};
pub use snapshot::{read_snapshot, write_snapshot};
pub use tag::Tag;
