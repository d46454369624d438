use std::any::Any;
use std::fmt;

use bytes::{Bytes, BytesMut};

use crate::binary::{Decoder, Encoder};
use crate::error::Result;
use crate::tag::Tag;

/// Upcast to [`Any`] for checked downcasts from trait objects.
pub trait AsAny: Any {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// A self-describing payload.
///
/// `encode` writes the concrete tag, then base-type fields, then the
/// type's own fields. `decode` consumes the tag, fails with
/// [`CodecError::TagMismatch`](crate::CodecError::TagMismatch) unless it is
/// exactly [`tag`](Self::tag), and then reads the fields in the same order.
///
/// Types built on [`TrackablePacket`](crate::TrackablePacket) or
/// [`TransactionReply`](crate::TransactionReply) embed the base struct and
/// call its `encode_fields` / `decode_fields` first.
pub trait Serializable: AsAny + Send + Sync + fmt::Debug + 'static {
    /// This type's concrete tag.
    fn tag(&self) -> Tag;

    fn encode(&self, enc: &mut Encoder<'_>);

    fn decode(&mut self, dec: &mut Decoder<'_>) -> Result<()>;

    /// Request-id view, for payloads that carry one.
    fn as_trackable(&self) -> Option<&dyn Trackable> {
        None
    }

    fn as_trackable_mut(&mut self) -> Option<&mut dyn Trackable> {
        None
    }

    /// Success/error view, for transaction replies.
    fn as_transaction(&self) -> Option<&dyn Transaction> {
        None
    }
}

impl dyn Serializable {
    pub fn is<T: Serializable>(&self) -> bool {
        self.as_any().is::<T>()
    }

    pub fn downcast_ref<T: Serializable>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }

    pub fn downcast_mut<T: Serializable>(&mut self) -> Option<&mut T> {
        self.as_any_mut().downcast_mut::<T>()
    }

    /// Request id carried by this payload, if it has one.
    pub fn request_id(&self) -> Option<u32> {
        self.as_trackable().map(|t| t.request_id())
    }

    /// Encode into a fresh buffer.
    pub fn to_bytes(&self) -> Bytes {
        encode_to_bytes(self)
    }
}

/// Encode any payload into a fresh buffer.
pub fn encode_to_bytes<S: Serializable + ?Sized>(value: &S) -> Bytes {
    let mut buf = BytesMut::new();
    value.encode(&mut Encoder::new(&mut buf));
    buf.freeze()
}

/// A payload carrying a request id used to correlate replies.
pub trait Trackable {
    fn request_id(&self) -> u32;
    fn set_request_id(&mut self, request_id: u32);
}

/// A reply reporting whether the request it answers succeeded.
pub trait Transaction: Trackable {
    fn is_success(&self) -> bool;
    fn error_msg(&self) -> &str;
}
