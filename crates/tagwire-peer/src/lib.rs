//! Connection management for the tagwire object protocol.
//!
//! This is the "just works" layer. Open a [`Connection`] to a peer (or let a
//! [`Server`] accept them), write any [`Serializable`](tagwire_codec::Serializable)
//! payload, and receive decoded objects either call-by-call or on a
//! background reader that routes each payload to typed handlers.

pub mod connection;
pub mod data_bag;
pub mod error;
pub mod heartbeat;
pub mod observer;
pub mod request_id;
pub mod server;

mod sync;

pub use connection::{Connection, ConnectionConfig, ConnectionId, ConnectionState};
pub use data_bag::DataBag;
pub use error::{FailureClass, PeerError, Result};
pub use heartbeat::{HeartbeatService, DEFAULT_HEARTBEAT_INTERVAL};
pub use observer::{ConnectionObserver, Dispatcher};
pub use request_id::{RequestId, RequestIdGenerator};
pub use server::{Server, ServerConfig};
