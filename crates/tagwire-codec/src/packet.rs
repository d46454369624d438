//! Built-in payloads and the base types user payloads are built on.

use crate::binary::{Decoder, Encoder};
use crate::error::Result;
use crate::serializable::{Serializable, Trackable, Transaction};
use crate::tag::Tag;

/// Base of payloads carrying a request id. Abstract on the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TrackablePacket {
    pub request_id: u32,
}

impl TrackablePacket {
    pub const TAG: Tag = Tag::TRACKABLE_PACKET;

    pub fn new(request_id: u32) -> Self {
        Self { request_id }
    }

    pub fn encode_fields(&self, enc: &mut Encoder<'_>) {
        enc.put(self.request_id);
    }

    pub fn decode_fields(&mut self, dec: &mut Decoder<'_>) -> Result<()> {
        self.request_id = dec.get()?;
        Ok(())
    }
}

impl Trackable for TrackablePacket {
    fn request_id(&self) -> u32 {
        self.request_id
    }

    fn set_request_id(&mut self, request_id: u32) {
        self.request_id = request_id;
    }
}

impl Serializable for TrackablePacket {
    fn tag(&self) -> Tag {
        Self::TAG
    }

    fn encode(&self, enc: &mut Encoder<'_>) {
        enc.put_tag(Self::TAG);
        self.encode_fields(enc);
    }

    fn decode(&mut self, dec: &mut Decoder<'_>) -> Result<()> {
        dec.expect_tag(Self::TAG)?;
        self.decode_fields(dec)
    }

    fn as_trackable(&self) -> Option<&dyn Trackable> {
        Some(self)
    }

    fn as_trackable_mut(&mut self) -> Option<&mut dyn Trackable> {
        Some(self)
    }
}

/// Base of replies: request id, success flag and error message.
/// Abstract on the wire.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TransactionReply {
    pub packet: TrackablePacket,
    pub success: bool,
    pub error_msg: String,
}

impl Default for TransactionReply {
    fn default() -> Self {
        Self::ok(0)
    }
}

impl TransactionReply {
    pub const TAG: Tag = Tag::TRANSACTION_REPLY;

    /// A successful reply.
    pub fn ok(request_id: u32) -> Self {
        Self {
            packet: TrackablePacket::new(request_id),
            success: true,
            error_msg: String::new(),
        }
    }

    /// A failed reply carrying an error message.
    pub fn failed(request_id: u32, error_msg: impl Into<String>) -> Self {
        Self {
            packet: TrackablePacket::new(request_id),
            success: false,
            error_msg: error_msg.into(),
        }
    }

    /// Record a failure. Clears the success flag.
    pub fn set_error(&mut self, error_msg: impl Into<String>) {
        self.success = false;
        self.error_msg = error_msg.into();
    }

    pub fn encode_fields(&self, enc: &mut Encoder<'_>) {
        self.packet.encode_fields(enc);
        enc.put(self.success);
        enc.put_str(&self.error_msg);
    }

    pub fn decode_fields(&mut self, dec: &mut Decoder<'_>) -> Result<()> {
        self.packet.decode_fields(dec)?;
        self.success = dec.get()?;
        self.error_msg = dec.get_string()?;
        Ok(())
    }
}

impl Trackable for TransactionReply {
    fn request_id(&self) -> u32 {
        self.packet.request_id
    }

    fn set_request_id(&mut self, request_id: u32) {
        self.packet.request_id = request_id;
    }
}

impl Transaction for TransactionReply {
    fn is_success(&self) -> bool {
        self.success
    }

    fn error_msg(&self) -> &str {
        &self.error_msg
    }
}

impl Serializable for TransactionReply {
    fn tag(&self) -> Tag {
        Self::TAG
    }

    fn encode(&self, enc: &mut Encoder<'_>) {
        enc.put_tag(Self::TAG);
        self.encode_fields(enc);
    }

    fn decode(&mut self, dec: &mut Decoder<'_>) -> Result<()> {
        dec.expect_tag(Self::TAG)?;
        self.decode_fields(dec)
    }

    fn as_trackable(&self) -> Option<&dyn Trackable> {
        Some(self)
    }

    fn as_trackable_mut(&mut self) -> Option<&mut dyn Trackable> {
        Some(self)
    }

    fn as_transaction(&self) -> Option<&dyn Transaction> {
        Some(self)
    }
}

/// Heartbeat. Carries no fields.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Ping;

impl Ping {
    pub const TAG: Tag = Tag::PING;
}

impl Serializable for Ping {
    fn tag(&self) -> Tag {
        Self::TAG
    }

    fn encode(&self, enc: &mut Encoder<'_>) {
        enc.put_tag(Self::TAG);
    }

    fn decode(&mut self, dec: &mut Decoder<'_>) -> Result<()> {
        dec.expect_tag(Self::TAG)
    }
}

/// Heartbeat acknowledgement. Carries no fields.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PingReply;

impl PingReply {
    pub const TAG: Tag = Tag::PING_REPLY;
}

impl Serializable for PingReply {
    fn tag(&self) -> Tag {
        Self::TAG
    }

    fn encode(&self, enc: &mut Encoder<'_>) {
        enc.put_tag(Self::TAG);
    }

    fn decode(&mut self, dec: &mut Decoder<'_>) -> Result<()> {
        dec.expect_tag(Self::TAG)
    }
}
