//! Self-describing binary objects over framed TCP connections.
//!
//! Every payload on the wire starts with a one-byte type tag. Both ends share
//! a registry that maps tags to constructors, so a receiver can rebuild the
//! concrete object without knowing in advance what will arrive.
//!
//! # Crate Structure
//!
//! - [`transport`]: TCP listener/stream wrappers
//! - [`frame`]: Length-prefixed framing over a byte stream
//! - [`codec`]: Binary encoding, type tags and the type registry
//! - [`peer`]: Connections, observers, heartbeat and server (behind `peer` feature)
//! - [`demo`]: Echo payloads used by the CLI and the bundled demos

pub mod demo;

/// Re-export transport types.
pub mod transport {
    pub use tagwire_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use tagwire_frame::*;
}

/// Re-export codec types.
pub mod codec {
    pub use tagwire_codec::*;
}

/// Re-export peer types (requires `peer` feature).
#[cfg(feature = "peer")]
pub mod peer {
    pub use tagwire_peer::*;
}
