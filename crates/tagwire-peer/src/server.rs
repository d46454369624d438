use std::collections::BTreeMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tagwire_codec::Serializable;
use tagwire_transport::{ListenerHandle, NetStream, TcpTransport, TransportError};
use tracing::{debug, info, warn};

use crate::connection::{Connection, ConnectionConfig, ConnectionId};
use crate::error::{PeerError, Result};
use crate::observer::{ConnectionObserver, Dispatcher};
use crate::sync::{lock, read, write};

/// Configuration for a [`Server`].
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Applied to every accepted connection. Accepted connections do not
    /// join a heartbeat service unless one is set here.
    pub connection: ConnectionConfig,
    /// Pause after a failed `accept` before trying again.
    pub accept_backoff: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            connection: ConnectionConfig::default().with_heartbeat(None),
            accept_backoff: Duration::from_millis(50),
        }
    }
}

impl ServerConfig {
    pub fn with_connection(mut self, connection: ConnectionConfig) -> Self {
        self.connection = connection;
        self
    }

    pub fn with_accept_backoff(mut self, backoff: Duration) -> Self {
        self.accept_backoff = backoff;
        self
    }
}

struct ServerShared {
    config: ServerConfig,
    running: AtomicBool,
    clients: Mutex<BTreeMap<ConnectionId, Arc<Connection>>>,
    observers: RwLock<Vec<Arc<dyn ConnectionObserver>>>,
    dispatcher: Dispatcher,
}

impl ServerShared {
    fn observer_snapshot(&self) -> Vec<Arc<dyn ConnectionObserver>> {
        read(&self.observers).clone()
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

/// Accepts TCP clients and keeps one [`Connection`] per client.
///
/// Every accepted connection reads in the background. Payloads from all
/// clients go through the server's [`Dispatcher`] first, then to the
/// server-level observers. A client is forgotten as soon as it disconnects.
pub struct Server {
    shared: Arc<ServerShared>,
    listener: Mutex<Option<ListenerHandle>>,
    listener_thread: Mutex<Option<JoinHandle<()>>>,
    local_addr: Mutex<Option<SocketAddr>>,
}

impl Server {
    pub fn new(config: ServerConfig) -> Self {
        let dispatcher = Dispatcher::new(Arc::clone(&config.connection.registry));
        Self {
            shared: Arc::new(ServerShared {
                config,
                running: AtomicBool::new(false),
                clients: Mutex::new(BTreeMap::new()),
                observers: RwLock::new(Vec::new()),
                dispatcher,
            }),
            listener: Mutex::new(None),
            listener_thread: Mutex::new(None),
            local_addr: Mutex::new(None),
        }
    }

    /// Bind to `addr` and start accepting. Returns the bound address.
    pub fn start(&self, addr: SocketAddr) -> Result<SocketAddr> {
        if self.shared.running.swap(true, Ordering::AcqRel) {
            return Err(PeerError::ServerRunning);
        }

        let bound = TcpTransport::bind(addr).and_then(|transport| {
            let handle = transport.handle()?;
            Ok((transport, handle))
        });
        let (transport, handle) = match bound {
            Ok(bound) => bound,
            Err(err) => {
                self.shared.running.store(false, Ordering::Release);
                return Err(err.into());
            }
        };

        let local_addr = transport.local_addr();
        let shared = Arc::clone(&self.shared);
        let spawned = thread::Builder::new()
            .name("tagwire-accept".to_string())
            .spawn(move || accept_loop(shared, transport));
        let thread = match spawned {
            Ok(thread) => thread,
            Err(err) => {
                self.shared.running.store(false, Ordering::Release);
                return Err(PeerError::Spawn(err));
            }
        };

        *lock(&self.listener) = Some(handle);
        *lock(&self.listener_thread) = Some(thread);
        *lock(&self.local_addr) = Some(local_addr);
        info!(%local_addr, "server started");
        Ok(local_addr)
    }

    /// Stop accepting and close every client. Idempotent.
    pub fn stop(&self) {
        if !self.shared.running.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(listener) = lock(&self.listener).take() {
            listener.close();
        }
        // The accept loop exits on its own once the listener is closed.
        drop(lock(&self.listener_thread).take());

        let clients = std::mem::take(&mut *lock(&self.shared.clients));
        for connection in clients.into_values() {
            connection.close();
        }
        info!("server stopped");
    }

    /// Block until the accept loop exits. Returns at once after [`stop`](Self::stop).
    pub fn join(&self) {
        let thread = lock(&self.listener_thread).take();
        if let Some(thread) = thread {
            if thread.join().is_err() {
                warn!("accept loop panicked");
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.shared.is_running()
    }

    /// Address of the listening socket, once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *lock(&self.local_addr)
    }

    pub fn config(&self) -> &ServerConfig {
        &self.shared.config
    }

    /// Handlers applied to payloads from every client.
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.shared.dispatcher
    }

    pub fn subscribe(&self, observer: Arc<dyn ConnectionObserver>) {
        write(&self.shared.observers).push(observer);
    }

    pub fn unsubscribe(&self, observer: &Arc<dyn ConnectionObserver>) -> bool {
        let mut observers = write(&self.shared.observers);
        let before = observers.len();
        observers.retain(|existing| !Arc::ptr_eq(existing, observer));
        observers.len() != before
    }

    /// Registered clients ordered by connection id.
    pub fn clients(&self) -> Vec<Arc<Connection>> {
        lock(&self.shared.clients).values().cloned().collect()
    }

    pub fn client(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        lock(&self.shared.clients).get(&id).cloned()
    }

    pub fn client_count(&self) -> usize {
        lock(&self.shared.clients).len()
    }

    /// Send `payload` to every client. Failures are skipped; returns how
    /// many clients it reached.
    pub fn write_to_all(&self, payload: &dyn Serializable) -> usize {
        let mut delivered = 0;
        for connection in self.clients() {
            match connection.write_sync(payload) {
                Ok(_) => delivered += 1,
                Err(err) => warn!(conn = connection.id(), %err, "broadcast skipped client"),
            }
        }
        delivered
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.stop();
    }
}

impl fmt::Debug for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server")
            .field("local_addr", &self.local_addr())
            .field("running", &self.is_running())
            .field("clients", &self.client_count())
            .finish()
    }
}

fn accept_loop(shared: Arc<ServerShared>, transport: TcpTransport) {
    while shared.is_running() {
        match transport.accept() {
            Ok(stream) => {
                let worker_shared = Arc::clone(&shared);
                let spawned = thread::Builder::new()
                    .name("tagwire-client".to_string())
                    .spawn(move || prepare_client(worker_shared, stream));
                if let Err(err) = spawned {
                    warn!(%err, "could not start client worker");
                }
            }
            Err(TransportError::Shutdown) => break,
            Err(err) => {
                if !shared.is_running() {
                    break;
                }
                warn!(%err, "accept failed");
                thread::sleep(shared.config.accept_backoff);
            }
        }
    }
    debug!("accept loop exited");
}

fn prepare_client(shared: Arc<ServerShared>, stream: NetStream) {
    let connection = Connection::new(shared.config.connection.clone());
    connection.subscribe(Arc::new(ServerLink {
        server: Arc::downgrade(&shared),
    }));

    if let Err(err) = connection.attach(stream) {
        debug!(conn = connection.id(), %err, "dropping client that failed to connect");
        return;
    }

    lock(&shared.clients).insert(connection.id(), Arc::clone(&connection));
    let ready = shared.is_running()
        && connection.is_connected()
        && connection.set_reading_async(true).is_ok();
    if !ready {
        lock(&shared.clients).remove(&connection.id());
        connection.close();
    }
}

/// Forwards one client's events to the server that accepted it.
struct ServerLink {
    server: Weak<ServerShared>,
}

impl ConnectionObserver for ServerLink {
    fn on_connected(&self, connection: &Connection) {
        if let Some(server) = self.server.upgrade() {
            for observer in server.observer_snapshot() {
                observer.on_connected(connection);
            }
        }
    }

    fn on_disconnected(&self, connection: &Connection, reason: &PeerError) {
        if let Some(server) = self.server.upgrade() {
            let removed = lock(&server.clients).remove(&connection.id());
            for observer in server.observer_snapshot() {
                observer.on_disconnected(connection, reason);
            }
            // The reader thread may be the one running this callback; the
            // last handle goes away with it.
            drop(removed);
        }
    }

    fn on_payload_sent(&self, connection: &Connection, payload: &dyn Serializable, size: usize) {
        if let Some(server) = self.server.upgrade() {
            for observer in server.observer_snapshot() {
                observer.on_payload_sent(connection, payload, size);
            }
        }
    }

    fn on_payload_received(
        &self,
        connection: &Connection,
        payload: &Arc<dyn Serializable>,
        size: usize,
    ) {
        if let Some(server) = self.server.upgrade() {
            server.dispatcher.dispatch(connection, payload.as_ref());
            for observer in server.observer_snapshot() {
                observer.on_payload_received(connection, payload, size);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::time::Instant;

    use tagwire_codec::{Ping, PingReply};

    use super::*;

    fn loopback() -> SocketAddr {
        "127.0.0.1:0".parse().unwrap()
    }

    fn client_config() -> ConnectionConfig {
        ConnectionConfig::default().with_heartbeat(None)
    }

    fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        condition()
    }

    #[test]
    fn start_twice_is_rejected() {
        let server = Server::new(ServerConfig::default());
        server.start(loopback()).unwrap();
        assert!(matches!(server.start(loopback()), Err(PeerError::ServerRunning)));
        server.stop();
        assert!(!server.is_running());
    }

    #[test]
    fn tracks_clients_until_they_leave() {
        let server = Server::new(ServerConfig::default());
        let addr = server.start(loopback()).unwrap();

        let client = Connection::open(addr, client_config()).unwrap();
        assert!(wait_until(|| server.client_count() == 1));
        let id = server.clients()[0].id();
        assert!(server.client(id).is_some());
        assert!(server.client(id).unwrap().is_reading_async());

        client.close();
        assert!(wait_until(|| server.client_count() == 0));
        assert!(server.client(id).is_none());
    }

    #[test]
    fn server_greets_and_broadcasts() {
        let server = Server::new(ServerConfig::default());
        let addr = server.start(loopback()).unwrap();

        let a = Connection::open(addr, client_config()).unwrap();
        let b = Connection::open(addr, client_config()).unwrap();
        assert!(wait_until(|| server.client_count() == 2));

        assert!(a.read_sync().unwrap().is::<Ping>());
        assert!(b.read_sync().unwrap().is::<Ping>());

        assert_eq!(server.write_to_all(&PingReply), 2);
        assert!(a.read_sync().unwrap().is::<PingReply>());
        assert!(b.read_sync().unwrap().is::<PingReply>());
    }

    #[test]
    fn server_dispatcher_sees_client_payloads() {
        let server = Server::new(ServerConfig::default());
        let hits = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&hits);
        server.dispatcher().add_handler::<PingReply, _>(move |_, _| {
            seen.fetch_add(1, Ordering::SeqCst);
        });
        let addr = server.start(loopback()).unwrap();

        let client = Connection::open(addr, client_config()).unwrap();
        client.write_sync(&PingReply).unwrap();
        assert!(wait_until(|| hits.load(Ordering::SeqCst) == 1));
    }

    #[test]
    fn stop_closes_clients() {
        let server = Server::new(ServerConfig::default());
        let addr = server.start(loopback()).unwrap();
        let client = Connection::open(addr, client_config()).unwrap();
        assert!(wait_until(|| server.client_count() == 1));
        let accepted = server.clients().remove(0);

        server.stop();
        server.join();
        assert_eq!(server.client_count(), 0);
        assert!(!accepted.is_connected());

        while client.read_sync().is_ok() {}
        assert!(!client.is_connected());
    }

    #[test]
    fn observers_hear_about_clients() {
        #[derive(Default)]
        struct Tally {
            connected: AtomicUsize,
            disconnected: AtomicUsize,
        }

        impl ConnectionObserver for Tally {
            fn on_connected(&self, _connection: &Connection) {
                self.connected.fetch_add(1, Ordering::SeqCst);
            }

            fn on_disconnected(&self, _connection: &Connection, _reason: &PeerError) {
                self.disconnected.fetch_add(1, Ordering::SeqCst);
            }
        }

        let server = Server::new(ServerConfig::default());
        let tally = Arc::new(Tally::default());
        server.subscribe(tally.clone());
        let addr = server.start(loopback()).unwrap();

        let client = Connection::open(addr, client_config()).unwrap();
        assert!(wait_until(|| tally.connected.load(Ordering::SeqCst) == 1));
        client.close();
        assert!(wait_until(|| tally.disconnected.load(Ordering::SeqCst) == 1));
    }
}
