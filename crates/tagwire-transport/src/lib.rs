//! Blocking TCP transport for tagwire.
//!
//! This is the lowest layer of tagwire. It owns socket setup (bind, accept,
//! connect, keepalive, timeouts) and hands out [`NetStream`] values that the
//! framing layer reads from and writes to.

pub mod error;
pub mod tcp;
pub mod traits;

pub use error::{Result, TransportError};
pub use tcp::{parse_addr, ListenerHandle, TcpTransport};
pub use traits::NetStream;
