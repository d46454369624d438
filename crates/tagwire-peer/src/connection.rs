use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, RwLock, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use bytes::BytesMut;
use tagwire_codec::{Encoder, Ping, Serializable, TypeRegistry};
use tagwire_frame::{FrameConfig, FrameError, FrameReader, FrameWriter};
use tagwire_transport::{NetStream, TcpTransport};
use tracing::{debug, info, warn};

use crate::data_bag::DataBag;
use crate::error::{PeerError, Result};
use crate::heartbeat::HeartbeatService;
use crate::observer::{ConnectionObserver, Dispatcher};
use crate::request_id::{RequestId, RequestIdGenerator};
use crate::sync::{lock, read, write};

/// Process-unique connection identifier. Never reused while the process lives.
pub type ConnectionId = u64;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Lifecycle of a [`Connection`]. `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Created, no socket yet.
    Idle,
    Connected,
    Closed,
}

/// Configuration for a connection.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Framing limits and socket timeouts.
    pub frame: FrameConfig,
    /// Types this connection can decode.
    pub registry: Arc<TypeRegistry>,
    /// Heartbeat service to join while connected. Default: the process-wide one.
    pub heartbeat: Option<Arc<HeartbeatService>>,
    /// Enable `SO_KEEPALIVE`. Default: true.
    pub keepalive: bool,
    /// Timeout for establishing outgoing connections.
    pub connect_timeout: Option<Duration>,
    /// Tear the connection down after this many undecodable frames in a row.
    /// Default: never.
    pub max_consecutive_decode_failures: Option<u32>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            frame: FrameConfig::default(),
            registry: tagwire_codec::global(),
            heartbeat: Some(HeartbeatService::global()),
            keepalive: true,
            connect_timeout: None,
            max_consecutive_decode_failures: None,
        }
    }
}

impl ConnectionConfig {
    pub fn with_registry(mut self, registry: Arc<TypeRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_heartbeat(mut self, heartbeat: Option<Arc<HeartbeatService>>) -> Self {
        self.heartbeat = heartbeat;
        self
    }

    pub fn with_frame_config(mut self, frame: FrameConfig) -> Self {
        self.frame = frame;
        self
    }

    pub fn with_read_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.frame.read_timeout = timeout;
        self
    }

    pub fn with_max_payload_size(mut self, max_payload_size: usize) -> Self {
        self.frame.max_payload_size = max_payload_size;
        self
    }

    pub fn with_keepalive(mut self, keepalive: bool) -> Self {
        self.keepalive = keepalive;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_max_consecutive_decode_failures(mut self, limit: Option<u32>) -> Self {
        self.max_consecutive_decode_failures = limit;
        self
    }
}

/// A framed, typed connection to one peer.
///
/// Connections are always handled through `Arc<Connection>`. The background
/// reader and the heartbeat service only hold weak references, so the last
/// strong handle decides when the socket is finally released.
///
/// Reads happen in one of two mutually exclusive modes: call-by-call through
/// [`read_sync`](Self::read_sync), or on a background thread started with
/// [`set_reading_async`](Self::set_reading_async) that hands every decoded
/// payload to the observers.
pub struct Connection {
    id: ConnectionId,
    this: Weak<Connection>,
    config: ConnectionConfig,
    state: Mutex<ConnectionState>,
    reader: Mutex<Option<FrameReader<NetStream>>>,
    writer: Mutex<Option<FrameWriter<NetStream>>>,
    control: Mutex<Option<NetStream>>,
    peer_addr: OnceLock<SocketAddr>,
    reading_async: AtomicBool,
    async_generation: AtomicU64,
    worker: Mutex<Option<JoinHandle<()>>>,
    observers: RwLock<Vec<Arc<dyn ConnectionObserver>>>,
    dispatcher: Dispatcher,
    request_ids: RequestIdGenerator,
    decode_failures: AtomicU32,
    data: Mutex<DataBag>,
}

impl Connection {
    /// Create an idle connection.
    pub fn new(config: ConnectionConfig) -> Arc<Self> {
        let id = NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed);
        Arc::new_cyclic(|this| Self {
            id,
            this: this.clone(),
            dispatcher: Dispatcher::new(Arc::clone(&config.registry)),
            config,
            state: Mutex::new(ConnectionState::Idle),
            reader: Mutex::new(None),
            writer: Mutex::new(None),
            control: Mutex::new(None),
            peer_addr: OnceLock::new(),
            reading_async: AtomicBool::new(false),
            async_generation: AtomicU64::new(0),
            worker: Mutex::new(None),
            observers: RwLock::new(Vec::new()),
            request_ids: RequestIdGenerator::new(),
            decode_failures: AtomicU32::new(0),
            data: Mutex::new(DataBag::new()),
        })
    }

    /// Create a connection and connect it to `addr`.
    pub fn open(addr: SocketAddr, config: ConnectionConfig) -> Result<Arc<Self>> {
        let connection = Self::new(config);
        connection.connect(addr)?;
        Ok(connection)
    }

    /// Connect to a listening peer.
    pub fn connect(&self, addr: SocketAddr) -> Result<ConnectionId> {
        self.ensure_idle()?;
        let stream = match self.config.connect_timeout {
            Some(timeout) => TcpTransport::connect_timeout(addr, timeout)?,
            None => TcpTransport::connect(addr)?,
        };
        self.attach(stream)
    }

    /// Take over an already connected socket, e.g. one returned by `accept`.
    ///
    /// Sends the initial heartbeat and fires `on_connected`. If the
    /// heartbeat cannot be sent the connection is closed and unusable.
    pub fn attach(&self, stream: NetStream) -> Result<ConnectionId> {
        let mut state = lock(&self.state);
        match *state {
            ConnectionState::Idle => {}
            ConnectionState::Connected => return Err(PeerError::AlreadyConnected),
            ConnectionState::Closed => return Err(PeerError::Closed),
        }

        if self.config.keepalive {
            if let Err(err) = stream.set_keepalive(true) {
                debug!(conn = self.id, %err, "could not enable keepalive");
            }
        }
        let peer = stream.peer_addr()?;
        let control = stream.try_clone()?;
        let reader = FrameReader::with_config_net(stream.try_clone()?, self.config.frame.clone())?;
        let writer = FrameWriter::with_config_net(stream, self.config.frame.clone())?;

        *lock(&self.reader) = Some(reader);
        *lock(&self.writer) = Some(writer);
        *lock(&self.control) = Some(control);
        let _ = self.peer_addr.set(peer);
        *state = ConnectionState::Connected;
        drop(state);

        if let (Some(heartbeat), Some(this)) = (&self.config.heartbeat, self.this.upgrade()) {
            heartbeat.subscribe(&this);
        }
        info!(conn = self.id, %peer, "connection established");

        if let Err(err) = self.write_sync(&Ping) {
            self.close_with(PeerError::HandshakeFailed(err.to_string()));
            return Err(PeerError::HandshakeFailed(err.to_string()));
        }

        for observer in self.observer_snapshot() {
            if !self.is_connected() {
                break;
            }
            observer.on_connected(self);
        }
        Ok(self.id)
    }

    fn ensure_idle(&self) -> Result<()> {
        match *lock(&self.state) {
            ConnectionState::Idle => Ok(()),
            ConnectionState::Connected => Err(PeerError::AlreadyConnected),
            ConnectionState::Closed => Err(PeerError::Closed),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn state(&self) -> ConnectionState {
        *lock(&self.state)
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr.get().copied()
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<TypeRegistry> {
        &self.config.registry
    }

    /// Typed handlers for payloads received on this connection.
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Per-connection scratch storage.
    pub fn data(&self) -> MutexGuard<'_, DataBag> {
        lock(&self.data)
    }

    /// Strong handle to this connection, if it is still referenced.
    pub fn handle(&self) -> Option<Arc<Connection>> {
        self.this.upgrade()
    }

    pub fn subscribe(&self, observer: Arc<dyn ConnectionObserver>) {
        write(&self.observers).push(observer);
    }

    /// Remove an observer previously passed to [`subscribe`](Self::subscribe).
    pub fn unsubscribe(&self, observer: &Arc<dyn ConnectionObserver>) -> bool {
        let mut observers = write(&self.observers);
        let before = observers.len();
        observers.retain(|existing| !Arc::ptr_eq(existing, observer));
        observers.len() != before
    }

    fn observer_snapshot(&self) -> Vec<Arc<dyn ConnectionObserver>> {
        read(&self.observers).clone()
    }

    /// Encode `payload` and send it as one frame. Returns the payload size.
    ///
    /// An oversized payload fails without sending anything and leaves the
    /// connection open. Any socket failure closes the connection.
    pub fn write_sync(&self, payload: &dyn Serializable) -> Result<usize> {
        if !self.is_connected() {
            return Err(PeerError::NotConnected);
        }

        let sent = {
            let mut guard = lock(&self.writer);
            let writer = guard.as_mut().ok_or(PeerError::NotConnected)?;
            writer.write_with(|buf: &mut BytesMut| {
                payload.encode(&mut Encoder::new(buf));
                Ok::<(), FrameError>(())
            })
        };

        match sent {
            Ok(size) => {
                for observer in self.observer_snapshot() {
                    observer.on_payload_sent(self, payload, size);
                }
                Ok(size)
            }
            Err(FrameError::PayloadTooLarge { size, max }) => {
                Err(PeerError::PayloadTooLarge { size, max })
            }
            Err(err) => {
                let err = PeerError::Frame(err);
                self.teardown(&err);
                Err(err)
            }
        }
    }

    /// Stamp `payload` with the next request id and send it.
    pub fn write_request_sync(&self, payload: &mut dyn Serializable) -> Result<RequestId> {
        let tag = payload.tag();
        let request_id = self.request_ids.next_id();
        payload
            .as_trackable_mut()
            .ok_or(PeerError::NotTrackable(tag))?
            .set_request_id(request_id);
        self.write_sync(payload)?;
        Ok(request_id)
    }

    /// Send a reply stamped with `request_id`. An id of 0 leaves the
    /// payload's own id untouched.
    pub fn write_reply_sync(
        &self,
        payload: &mut dyn Serializable,
        request_id: RequestId,
    ) -> Result<usize> {
        if request_id != 0 {
            let tag = payload.tag();
            payload
                .as_trackable_mut()
                .ok_or(PeerError::NotTrackable(tag))?
                .set_request_id(request_id);
        }
        self.write_sync(payload)
    }

    /// Send a reply stamped with the id of the request it answers.
    pub fn write_reply_to(
        &self,
        payload: &mut dyn Serializable,
        request: &dyn Serializable,
    ) -> Result<usize> {
        let request_id = request
            .request_id()
            .ok_or(PeerError::NotTrackable(request.tag()))?;
        self.write_reply_sync(payload, request_id)
    }

    /// The most recent request id issued by this connection.
    pub fn last_request_id(&self) -> RequestId {
        self.request_ids.last()
    }

    /// Block until one frame arrives and decode it.
    ///
    /// A payload that fails to decode is dropped and reported as
    /// [`PeerError::Decode`]; the connection stays open. Socket failures and
    /// oversized frames close the connection.
    pub fn read_sync(&self) -> Result<Arc<dyn Serializable>> {
        if self.reading_async.load(Ordering::Acquire) {
            return Err(PeerError::AsyncReadActive);
        }
        self.read_one()
    }

    fn read_one(&self) -> Result<Arc<dyn Serializable>> {
        if !self.is_connected() {
            return Err(PeerError::NotConnected);
        }

        let frame = {
            let mut guard = lock(&self.reader);
            let reader = guard.as_mut().ok_or(PeerError::NotConnected)?;
            reader.read_frame()
        };
        let frame = match frame {
            Ok(frame) => frame,
            Err(err) => {
                let err = PeerError::Frame(err);
                self.teardown(&err);
                return Err(err);
            }
        };

        let size = frame.len();
        match self.config.registry.decode_bytes(&frame.payload) {
            Ok(payload) => {
                self.decode_failures.store(0, Ordering::Relaxed);
                let payload: Arc<dyn Serializable> = Arc::from(payload);
                self.dispatcher.dispatch(self, payload.as_ref());
                for observer in self.observer_snapshot() {
                    observer.on_payload_received(self, &payload, size);
                }
                Ok(payload)
            }
            Err(err) => {
                let failures = self.decode_failures.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(conn = self.id, size, failures, %err, "dropping undecodable payload");
                if let Some(limit) = self.config.max_consecutive_decode_failures {
                    if failures >= limit {
                        let err = PeerError::TooManyDecodeFailures(failures);
                        self.teardown(&err);
                        return Err(err);
                    }
                }
                Err(PeerError::Decode(err))
            }
        }
    }

    pub fn is_reading_async(&self) -> bool {
        self.reading_async.load(Ordering::Acquire)
    }

    /// Switch between call-by-call reads and the background reader.
    ///
    /// Turning async off waits for the reader to finish its current frame,
    /// unless called from the reader itself (for example from a handler),
    /// in which case the reader stops after the current payload.
    pub fn set_reading_async(&self, enabled: bool) -> Result<()> {
        if !enabled {
            self.stop_reader();
            return Ok(());
        }

        let mut worker = lock(&self.worker);
        if !self.is_connected() {
            return Err(PeerError::NotConnected);
        }
        if worker.is_some() && self.reading_async.load(Ordering::Acquire) {
            return Ok(());
        }

        let generation = self.async_generation.fetch_add(1, Ordering::AcqRel) + 1;
        self.reading_async.store(true, Ordering::Release);
        let this = self.this.clone();
        let spawned = thread::Builder::new()
            .name(format!("tagwire-conn-{}", self.id))
            .spawn(move || read_loop(this, generation));

        match spawned {
            Ok(handle) => {
                *worker = Some(handle);
                debug!(conn = self.id, "background reader started");
                Ok(())
            }
            Err(err) => {
                self.reading_async.store(false, Ordering::Release);
                Err(PeerError::Spawn(err))
            }
        }
    }

    fn stop_reader(&self) {
        // Mode flag, generation and handle change together under `worker`.
        let handle = {
            let mut worker = lock(&self.worker);
            self.async_generation.fetch_add(1, Ordering::AcqRel);
            self.reading_async.store(false, Ordering::Release);
            worker.take()
        };
        if let Some(handle) = handle {
            join_or_detach(handle, self.id);
        }
    }

    /// Close the connection. Idempotent.
    pub fn close(&self) {
        self.close_with(PeerError::Closed);
    }

    /// Close the connection, reporting `reason` to observers.
    /// Returns false if it was not connected.
    pub fn close_with(&self, reason: PeerError) -> bool {
        self.teardown(&reason)
    }

    fn teardown(&self, reason: &PeerError) -> bool {
        {
            let mut state = lock(&self.state);
            let previous = *state;
            *state = ConnectionState::Closed;
            if previous != ConnectionState::Connected {
                return false;
            }
        }
        info!(conn = self.id, %reason, "connection closed");

        self.release_socket();
        self.stop_reader();
        lock(&self.writer).take();
        lock(&self.reader).take();

        for observer in self.observer_snapshot() {
            observer.on_disconnected(self, reason);
        }
        true
    }

    /// Abort pending I/O and leave the heartbeat rotation.
    fn release_socket(&self) {
        if let Some(control) = lock(&self.control).take() {
            if let Err(err) = control.shutdown() {
                debug!(conn = self.id, %err, "socket shutdown failed");
            }
        }
        if let Some(heartbeat) = &self.config.heartbeat {
            heartbeat.unsubscribe(self);
        }
    }
}

fn read_loop(this: Weak<Connection>, generation: u64) {
    loop {
        let Some(connection) = this.upgrade() else {
            break;
        };
        if connection.async_generation.load(Ordering::Acquire) != generation
            || !connection.is_connected()
        {
            break;
        }
        match connection.read_one() {
            Ok(_) | Err(PeerError::Decode(_)) => {}
            Err(err) => {
                debug!(conn = connection.id, %err, "background reader stopping");
                break;
            }
        }
    }
}

fn join_or_detach(handle: JoinHandle<()>, id: ConnectionId) {
    if handle.thread().id() == thread::current().id() {
        // Stopping from inside the reader: let it run out on its own.
        return;
    }
    if handle.join().is_err() {
        warn!(conn = id, "background reader panicked");
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        let state = self
            .state
            .get_mut()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if *state == ConnectionState::Connected {
            *state = ConnectionState::Closed;
            self.release_socket();
            self.stop_reader();
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("peer_addr", &self.peer_addr())
            .field("reading_async", &self.is_reading_async())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::sync::atomic::AtomicUsize;

    use tagwire_codec::{PingReply, TrackablePacket, TransactionReply};

    use super::*;
    use crate::error::FailureClass;

    fn config() -> ConnectionConfig {
        ConnectionConfig::default().with_heartbeat(None)
    }

    fn pair() -> (Arc<Connection>, Arc<Connection>) {
        let listener = TcpTransport::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let addr = listener.local_addr();
        let accepting = std::thread::spawn(move || listener.accept().unwrap());

        let client = Connection::open(addr, config()).unwrap();
        let server = Connection::new(config());
        server.attach(accepting.join().unwrap()).unwrap();
        (client, server)
    }

    #[derive(Default)]
    struct Counts {
        connected: AtomicUsize,
        disconnected: AtomicUsize,
        sent: AtomicUsize,
        received: AtomicUsize,
    }

    impl ConnectionObserver for Counts {
        fn on_connected(&self, _connection: &Connection) {
            self.connected.fetch_add(1, Ordering::SeqCst);
        }

        fn on_disconnected(&self, _connection: &Connection, _reason: &PeerError) {
            self.disconnected.fetch_add(1, Ordering::SeqCst);
        }

        fn on_payload_sent(&self, _connection: &Connection, _payload: &dyn Serializable, _size: usize) {
            self.sent.fetch_add(1, Ordering::SeqCst);
        }

        fn on_payload_received(
            &self,
            _connection: &Connection,
            _payload: &Arc<dyn Serializable>,
            _size: usize,
        ) {
            self.received.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn ids_are_unique_and_increasing() {
        let a = Connection::new(config());
        let b = Connection::new(config());
        assert!(b.id() > a.id());
    }

    #[test]
    fn idle_connection_rejects_io() {
        let connection = Connection::new(config());
        assert_eq!(connection.state(), ConnectionState::Idle);
        assert!(matches!(connection.write_sync(&Ping), Err(PeerError::NotConnected)));
        assert!(matches!(connection.read_sync(), Err(PeerError::NotConnected)));
        assert!(matches!(
            connection.set_reading_async(true),
            Err(PeerError::NotConnected)
        ));
    }

    #[test]
    fn connect_sends_initial_heartbeat() {
        let (client, server) = pair();
        assert!(client.is_connected());
        assert!(client.peer_addr().is_some());

        let first = server.read_sync().unwrap();
        assert!(first.is::<Ping>());
    }

    #[test]
    fn observers_see_connect_send_receive() {
        let listener = TcpTransport::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let addr = listener.local_addr();
        let accepting = std::thread::spawn(move || listener.accept().unwrap());

        let counts = Arc::new(Counts::default());
        let client = Connection::new(config());
        client.subscribe(counts.clone());
        client.connect(addr).unwrap();
        let server = Connection::new(config());
        server.attach(accepting.join().unwrap()).unwrap();

        assert_eq!(counts.connected.load(Ordering::SeqCst), 1);
        assert_eq!(counts.sent.load(Ordering::SeqCst), 1, "initial heartbeat");

        server.write_sync(&PingReply).unwrap();
        let _ = client.read_sync().unwrap();
        assert_eq!(counts.received.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn second_connect_is_rejected() {
        let (client, _server) = pair();
        let err = client.connect("127.0.0.1:1".parse().unwrap()).unwrap_err();
        assert!(matches!(err, PeerError::AlreadyConnected));
    }

    #[test]
    fn request_ids_stamped_and_replies_echo_them() {
        let (client, server) = pair();
        let _ = server.read_sync().unwrap();

        let mut request = TrackablePacket::default();
        let first = client.write_request_sync(&mut request).unwrap();
        let second = client.write_request_sync(&mut request).unwrap();
        assert_eq!((first, second), (1, 2));
        assert_eq!(client.last_request_id(), 2);

        // TrackablePacket is abstract in the builtin registry: the server
        // drops both frames but stays connected.
        assert!(matches!(server.read_sync(), Err(PeerError::Decode(_))));
        assert!(matches!(server.read_sync(), Err(PeerError::Decode(_))));
        assert!(server.is_connected());
    }

    #[test]
    fn write_request_requires_trackable_payload() {
        let (client, _server) = pair();
        let err = client.write_request_sync(&mut Ping).unwrap_err();
        assert!(matches!(err, PeerError::NotTrackable(tag) if tag == Ping::TAG));
    }

    #[test]
    fn reply_with_zero_id_is_left_unstamped() {
        let (client, _server) = pair();
        let mut reply = TransactionReply::ok(77);
        client.write_reply_sync(&mut reply, 0).unwrap();
        assert_eq!(reply.packet.request_id, 77);

        client.write_reply_sync(&mut reply, 5).unwrap();
        assert_eq!(reply.packet.request_id, 5);

        let request = TrackablePacket::new(9);
        client.write_reply_to(&mut reply, &request).unwrap();
        assert_eq!(reply.packet.request_id, 9);
    }

    #[test]
    fn oversized_write_fails_locally() {
        let listener = TcpTransport::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let addr = listener.local_addr();
        let accepting = std::thread::spawn(move || listener.accept().unwrap());

        let client = Connection::open(addr, config().with_max_payload_size(4)).unwrap();
        let _server = accepting.join().unwrap();

        let err = client
            .write_sync(&TransactionReply::failed(1, "far too long"))
            .unwrap_err();
        assert!(matches!(err, PeerError::PayloadTooLarge { max: 4, .. }));
        assert!(client.is_connected());
    }

    #[test]
    fn sync_read_rejected_while_async() {
        let (client, server) = pair();
        client.set_reading_async(true).unwrap();
        assert!(client.is_reading_async());
        assert!(matches!(client.read_sync(), Err(PeerError::AsyncReadActive)));

        // Release the background read so it can observe the stop request.
        let waker = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(100));
            server.write_sync(&Ping).unwrap();
        });
        client.set_reading_async(false).unwrap();
        waker.join().unwrap();
        assert!(!client.is_reading_async());
    }

    #[test]
    fn close_is_idempotent_and_notifies_once() {
        let (client, _server) = pair();
        let counts = Arc::new(Counts::default());
        client.subscribe(counts.clone());

        client.close();
        client.close();
        assert!(!client.close_with(PeerError::Disconnected("again".into())));

        assert_eq!(client.state(), ConnectionState::Closed);
        assert_eq!(counts.disconnected.load(Ordering::SeqCst), 1);
        assert!(matches!(client.write_sync(&Ping), Err(PeerError::NotConnected)));
        assert!(matches!(client.connect("127.0.0.1:1".parse().unwrap()), Err(PeerError::Closed)));
    }

    #[test]
    fn peer_close_tears_down_reader() {
        let (client, server) = pair();
        let _ = server.read_sync().unwrap();
        client.close();

        let err = server.read_sync().unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(server.state(), ConnectionState::Closed);
    }

    #[test]
    fn unsubscribe_removes_observer() {
        let connection = Connection::new(config());
        let observer: Arc<dyn ConnectionObserver> = Arc::new(Counts::default());
        connection.subscribe(Arc::clone(&observer));
        assert!(connection.unsubscribe(&observer));
        assert!(!connection.unsubscribe(&observer));
    }

    #[test]
    fn data_bag_is_per_connection() {
        let a = Connection::new(config());
        let b = Connection::new(config());
        a.data().put("role", "admin".to_string());
        assert!(a.data().contains("role"));
        assert!(!b.data().contains("role"));
    }

    #[test]
    fn decode_failures_escalate_when_configured() {
        let listener = TcpTransport::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let addr = listener.local_addr();
        let accepting = std::thread::spawn(move || listener.accept().unwrap());

        let client = Connection::open(addr, config()).unwrap();
        let server = Connection::new(config().with_max_consecutive_decode_failures(Some(2)));
        server.attach(accepting.join().unwrap()).unwrap();
        let _ = server.read_sync().unwrap();

        let mut packet = TrackablePacket::default();
        client.write_request_sync(&mut packet).unwrap();
        client.write_request_sync(&mut packet).unwrap();

        assert!(matches!(server.read_sync(), Err(PeerError::Decode(_))));
        assert!(server.is_connected());
        let err = server.read_sync().unwrap_err();
        assert!(matches!(err, PeerError::TooManyDecodeFailures(2)));
        assert!(err.is_fatal());
        assert!(!server.is_connected());
    }

    #[test]
    fn escalated_decode_failure_is_fatal() {
        let listener = TcpTransport::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let addr = listener.local_addr();
        let accepting = std::thread::spawn(move || listener.accept().unwrap());

        let client = Connection::open(
            addr,
            config().with_max_consecutive_decode_failures(Some(1)),
        )
        .unwrap();
        let mut raw = accepting.join().unwrap();

        // One-byte frame carrying an unregistered tag.
        raw.write_all(&1u64.to_ne_bytes()).unwrap();
        raw.write_all(&[0xEE]).unwrap();
        raw.flush().unwrap();

        let err = client.read_sync().unwrap_err();
        assert_eq!(err.class(), FailureClass::TransportFatal);
        assert!(err.is_fatal());
        assert!(!client.is_connected());
    }

    #[test]
    fn concurrent_async_toggles_keep_mode_and_reader_in_step() {
        let (client, server) = pair();
        let stop = Arc::new(AtomicBool::new(false));

        // Keep frames flowing so a stopping reader never waits on the timeout.
        let pinger = {
            let stop = Arc::clone(&stop);
            std::thread::spawn(move || {
                while !stop.load(Ordering::SeqCst) {
                    if server.write_sync(&Ping).is_err() {
                        break;
                    }
                    std::thread::sleep(Duration::from_millis(2));
                }
                server
            })
        };

        let togglers: Vec<_> = (0..2)
            .map(|_| {
                let client = Arc::clone(&client);
                std::thread::spawn(move || {
                    for _ in 0..50 {
                        client.set_reading_async(true).unwrap();
                        client.set_reading_async(false).unwrap();
                        client.set_reading_async(true).unwrap();
                    }
                })
            })
            .collect();
        for toggler in togglers {
            toggler.join().unwrap();
        }

        std::thread::sleep(Duration::from_millis(50));
        let reader_alive = lock(&client.worker)
            .as_ref()
            .is_some_and(|handle| !handle.is_finished());
        assert!(client.is_reading_async());
        assert!(reader_alive);

        client.set_reading_async(false).unwrap();
        assert!(lock(&client.worker).is_none());
        stop.store(true, Ordering::SeqCst);
        let server = pinger.join().unwrap();

        server.write_sync(&Ping).unwrap();
        assert!(client.read_sync().is_ok());
        assert!(client.is_connected());
    }
}
