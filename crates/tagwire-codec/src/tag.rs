//! Type tags.
//!
//! Tags 0-4 are reserved for built-in types.
//! Tags 5-255 are available for application-defined payloads.

use std::fmt;

/// One-byte identifier of a concrete payload type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Tag(pub u8);

impl Tag {
    /// No type. Root of every parent chain.
    pub const UNKNOWN: Tag = Tag(0);

    /// Heartbeat.
    pub const PING: Tag = Tag(1);

    /// Heartbeat acknowledgement.
    pub const PING_REPLY: Tag = Tag(2);

    /// Abstract base of payloads carrying a request id.
    pub const TRACKABLE_PACKET: Tag = Tag(3);

    /// Abstract base of replies carrying a success flag and error message.
    pub const TRANSACTION_REPLY: Tag = Tag(4);

    /// First user-defined tag.
    pub const USER_START: Tag = Tag(5);

    pub const fn new(value: u8) -> Self {
        Self(value)
    }

    pub const fn value(self) -> u8 {
        self.0
    }

    /// Returns true if the tag is in the reserved range.
    pub const fn is_reserved(self) -> bool {
        self.0 < Self::USER_START.0
    }

    /// Name of a built-in tag, if it is one.
    pub fn builtin_name(self) -> Option<&'static str> {
        match self {
            Self::UNKNOWN => Some("Unknown"),
            Self::PING => Some("Ping"),
            Self::PING_REPLY => Some("PingReply"),
            Self::TRACKABLE_PACKET => Some("TrackablePacket"),
            Self::TRANSACTION_REPLY => Some("TransactionReply"),
            _ => None,
        }
    }
}

impl From<u8> for Tag {
    fn from(value: u8) -> Self {
        Self(value)
    }
}

impl From<Tag> for u8 {
    fn from(tag: Tag) -> Self {
        tag.0
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
