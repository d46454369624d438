use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock, Weak};
use std::thread;
use std::time::Duration;

use tagwire_codec::Ping;
use tracing::{debug, info};

use crate::connection::Connection;
use crate::error::{PeerError, Result};
use crate::sync::lock;

/// Default period between heartbeat sweeps.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);

static GLOBAL: OnceLock<Arc<HeartbeatService>> = OnceLock::new();

/// Periodically sends a [`Ping`] to every subscribed connection.
///
/// Subscribers are held weakly. Connections join on connect and leave on
/// close; a dropped connection simply disappears from the next sweep.
#[derive(Debug)]
pub struct HeartbeatService {
    interval: Duration,
    running: AtomicBool,
    generation: AtomicU64,
    subscribers: Mutex<Vec<Weak<Connection>>>,
    sweeps: AtomicU64,
}

impl HeartbeatService {
    pub fn new(interval: Duration) -> Arc<Self> {
        Arc::new(Self {
            interval,
            running: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            subscribers: Mutex::new(Vec::new()),
            sweeps: AtomicU64::new(0),
        })
    }

    /// The process-wide service used by default connection configs.
    /// It is created stopped.
    pub fn global() -> Arc<Self> {
        Arc::clone(GLOBAL.get_or_init(|| Self::new(DEFAULT_HEARTBEAT_INTERVAL)))
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Start the sweep thread.
    pub fn start(self: &Arc<Self>) -> Result<()> {
        if self.running.swap(true, Ordering::AcqRel) {
            return Err(PeerError::HeartbeatRunning);
        }
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let service = Arc::downgrade(self);

        let spawned = thread::Builder::new()
            .name("tagwire-heartbeat".to_string())
            .spawn(move || run(service, generation));
        match spawned {
            Ok(_) => {
                info!(interval_ms = self.interval.as_millis() as u64, "heartbeat started");
                Ok(())
            }
            Err(err) => {
                self.running.store(false, Ordering::Release);
                Err(PeerError::Spawn(err))
            }
        }
    }

    /// Stop sweeping. Takes effect by the end of the current interval.
    pub fn stop(&self) {
        if self.running.swap(false, Ordering::AcqRel) {
            self.generation.fetch_add(1, Ordering::AcqRel);
            info!("heartbeat stopped");
        }
    }

    pub fn subscribe(&self, connection: &Arc<Connection>) {
        let mut subscribers = lock(&self.subscribers);
        subscribers.retain(|weak| weak.strong_count() > 0);
        let ptr = Arc::as_ptr(connection);
        if !subscribers.iter().any(|weak| weak.as_ptr() == ptr) {
            subscribers.push(Arc::downgrade(connection));
        }
    }

    pub fn unsubscribe(&self, connection: &Connection) {
        let ptr: *const Connection = connection;
        lock(&self.subscribers).retain(|weak| weak.strong_count() > 0 && weak.as_ptr() != ptr);
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        lock(&self.subscribers)
            .iter()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }

    /// Completed sweeps since creation.
    pub fn sweeps(&self) -> u64 {
        self.sweeps.load(Ordering::Relaxed)
    }

    /// Send one heartbeat to every live subscriber. Returns how many got it.
    pub fn sweep(&self) -> usize {
        let targets: Vec<Arc<Connection>> = lock(&self.subscribers)
            .iter()
            .filter_map(Weak::upgrade)
            .collect();

        let mut delivered = 0;
        for connection in targets {
            match connection.write_sync(&Ping) {
                Ok(_) => delivered += 1,
                Err(err) => debug!(conn = connection.id(), %err, "heartbeat not delivered"),
            }
        }
        self.sweeps.fetch_add(1, Ordering::Relaxed);
        delivered
    }

    fn is_current(&self, generation: u64) -> bool {
        self.is_running() && self.generation.load(Ordering::Acquire) == generation
    }
}

fn run(service: Weak<HeartbeatService>, generation: u64) {
    loop {
        let interval = match service.upgrade() {
            Some(service) if service.is_current(generation) => {
                service.sweep();
                service.interval
            }
            _ => break,
        };
        thread::sleep(interval);
    }
}
