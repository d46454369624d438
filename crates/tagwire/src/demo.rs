//! Echo request/reply payloads.
//!
//! `EchoRequest` is a trackable request carrying a message; `EchoReply`
//! answers it with the same message and the request's id.

use tagwire_codec::{
    CodecError, Decoder, Encoder, Serializable, Tag, Trackable, TrackablePacket, Transaction,
    TransactionReply, TypeRegistry,
};

pub const ECHO_REQUEST: Tag = Tag(Tag::USER_START.value());
pub const ECHO_REPLY: Tag = Tag(Tag::USER_START.value() + 1);

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EchoRequest {
    pub packet: TrackablePacket,
    pub message: String,
}

impl EchoRequest {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            packet: TrackablePacket::default(),
            message: message.into(),
        }
    }
}

impl Serializable for EchoRequest {
    fn tag(&self) -> Tag {
        ECHO_REQUEST
    }

    fn encode(&self, enc: &mut Encoder<'_>) {
        enc.put_tag(ECHO_REQUEST);
        self.packet.encode_fields(enc);
        enc.put_str(&self.message);
    }

    fn decode(&mut self, dec: &mut Decoder<'_>) -> tagwire_codec::Result<()> {
        dec.expect_tag(ECHO_REQUEST)?;
        self.packet.decode_fields(dec)?;
        self.message = dec.get_string()?;
        Ok(())
    }

    fn as_trackable(&self) -> Option<&dyn Trackable> {
        Some(&self.packet)
    }

    fn as_trackable_mut(&mut self) -> Option<&mut dyn Trackable> {
        Some(&mut self.packet)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EchoReply {
    pub reply: TransactionReply,
    pub message: String,
    /// Server-side id of the connection that answered.
    pub served_by: u64,
}

impl EchoReply {
    /// Answer `request`. Empty messages are rejected.
    pub fn answer(request: &EchoRequest, served_by: u64) -> Self {
        let mut reply = TransactionReply::ok(request.packet.request_id);
        if request.message.is_empty() {
            reply.set_error("empty message");
        }
        Self {
            reply,
            message: request.message.clone(),
            served_by,
        }
    }
}

impl Serializable for EchoReply {
    fn tag(&self) -> Tag {
        ECHO_REPLY
    }

    fn encode(&self, enc: &mut Encoder<'_>) {
        enc.put_tag(ECHO_REPLY);
        self.reply.encode_fields(enc);
        enc.put_str(&self.message);
        enc.put(self.served_by);
    }

    fn decode(&mut self, dec: &mut Decoder<'_>) -> tagwire_codec::Result<()> {
        dec.expect_tag(ECHO_REPLY)?;
        self.reply.decode_fields(dec)?;
        self.message = dec.get_string()?;
        self.served_by = dec.get()?;
        Ok(())
    }

    fn as_trackable(&self) -> Option<&dyn Trackable> {
        Some(&self.reply)
    }

    fn as_trackable_mut(&mut self) -> Option<&mut dyn Trackable> {
        Some(&mut self.reply)
    }

    fn as_transaction(&self) -> Option<&dyn Transaction> {
        Some(&self.reply)
    }
}

/// Add the echo payloads to `registry`.
pub fn register(registry: &mut TypeRegistry) -> Result<(), CodecError> {
    registry.register::<EchoRequest>(Tag::TRACKABLE_PACKET, "EchoRequest")?;
    registry.register::<EchoReply>(Tag::TRANSACTION_REPLY, "EchoReply")?;
    Ok(())
}

/// Built-in types plus the echo payloads.
pub fn registry() -> Result<TypeRegistry, CodecError> {
    let mut registry = TypeRegistry::with_builtins();
    register(&mut registry)?;
    Ok(registry)
}
