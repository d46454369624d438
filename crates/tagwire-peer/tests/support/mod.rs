#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tagwire_codec::{
    Decoder, Encoder, Serializable, Tag, Trackable, TrackablePacket, Transaction,
    TransactionReply, TypeRegistry,
};
use tagwire_peer::{Connection, ConnectionConfig};
use tagwire_transport::{NetStream, TcpTransport};

pub const LOGIN: Tag = Tag(20);
pub const LOGIN_REPLY: Tag = Tag(21);

#[derive(Debug, Clone, Default)]
pub struct Login {
    pub packet: TrackablePacket,
    pub user: String,
}

impl Login {
    pub fn new(user: &str) -> Self {
        Self {
            packet: TrackablePacket::default(),
            user: user.to_string(),
        }
    }
}

impl Serializable for Login {
    fn tag(&self) -> Tag {
        LOGIN
    }

    fn encode(&self, enc: &mut Encoder<'_>) {
        enc.put_tag(LOGIN);
        self.packet.encode_fields(enc);
        enc.put_str(&self.user);
    }

    fn decode(&mut self, dec: &mut Decoder<'_>) -> tagwire_codec::Result<()> {
        dec.expect_tag(LOGIN)?;
        self.packet.decode_fields(dec)?;
        self.user = dec.get_string()?;
        Ok(())
    }

    fn as_trackable(&self) -> Option<&dyn Trackable> {
        Some(&self.packet)
    }

    fn as_trackable_mut(&mut self) -> Option<&mut dyn Trackable> {
        Some(&mut self.packet)
    }
}

#[derive(Debug, Clone, Default)]
pub struct LoginReply {
    pub reply: TransactionReply,
    pub session: u64,
}

impl Serializable for LoginReply {
    fn tag(&self) -> Tag {
        LOGIN_REPLY
    }

    fn encode(&self, enc: &mut Encoder<'_>) {
        enc.put_tag(LOGIN_REPLY);
        self.reply.encode_fields(enc);
        enc.put(self.session);
    }

    fn decode(&mut self, dec: &mut Decoder<'_>) -> tagwire_codec::Result<()> {
        dec.expect_tag(LOGIN_REPLY)?;
        self.reply.decode_fields(dec)?;
        self.session = dec.get()?;
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

pub fn registry() -> Arc<TypeRegistry> {
    let mut registry = TypeRegistry::with_builtins();
    registry
        .register::<Login>(Tag::TRACKABLE_PACKET, "Login")
        .expect("Login should register");
    registry
        .register::<LoginReply>(Tag::TRANSACTION_REPLY, "LoginReply")
        .expect("LoginReply should register");
    Arc::new(registry)
}

pub fn config() -> ConnectionConfig {
    ConnectionConfig::default()
        .with_registry(registry())
        .with_heartbeat(None)
}

pub fn loopback() -> SocketAddr {
    "127.0.0.1:0".parse().expect("loopback address should parse")
}

/// A connected client plus the raw accepted socket on the other end.
pub fn client_and_raw(config: ConnectionConfig) -> (Arc<Connection>, NetStream) {
    let listener = TcpTransport::bind(loopback()).expect("listener should bind");
    let addr = listener.local_addr();
    let accepting = thread::spawn(move || listener.accept().expect("accept should succeed"));
    let client = Connection::open(addr, config).expect("client should connect");
    let raw = accepting.join().expect("accept thread should not panic");
    (client, raw)
}

/// Two connected peers.
pub fn pair(client: ConnectionConfig, server: ConnectionConfig) -> (Arc<Connection>, Arc<Connection>) {
    let (client, raw) = client_and_raw(client);
    let accepted = Connection::new(server);
    accepted.attach(raw).expect("attach should succeed");
    (client, accepted)
}

pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    condition()
}
