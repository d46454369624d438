mod support;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use support::{config, pair, wait_until};
use tagwire_codec::{Ping, PingReply, Serializable};
use tagwire_peer::{Connection, ConnectionObserver, ConnectionState, PeerError};

#[derive(Default)]
struct Events {
    disconnected: AtomicUsize,
    received: AtomicUsize,
}

impl ConnectionObserver for Events {
    fn on_disconnected(&self, _connection: &Connection, _reason: &PeerError) {
        self.disconnected.fetch_add(1, Ordering::SeqCst);
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
fn toggling_async_hands_the_socket_back() {
    let (client, server) = pair(config(), config());
    let events = Arc::new(Events::default());
    client.subscribe(events.clone());

    client.set_reading_async(true).expect("async reader should start");
    // Greeting ping from the accepted side.
    assert!(wait_until(Duration::from_secs(5), || {
        events.received.load(Ordering::SeqCst) == 1
    }));

    // The background read is parked in the socket; a frame from the peer
    // lets it notice the stop request.
    let peer = Arc::clone(&server);
    let nudger = thread::spawn(move || {
        thread::sleep(Duration::from_millis(100));
        peer.write_sync(&Ping).expect("nudge should send");
    });
    client
        .set_reading_async(false)
        .expect("async reader should stop");
    nudger.join().expect("nudger should not panic");
    assert!(!client.is_reading_async());

    server.write_sync(&PingReply).expect("reply should send");
    let mut saw_reply = false;
    for _ in 0..2 {
        let payload = client.read_sync().expect("sync read should work again");
        if payload.is::<PingReply>() {
            saw_reply = true;
            break;
        }
    }
    assert!(saw_reply);
    assert!(client.is_connected());
}

#[test]
fn close_during_async_read_reports_one_disconnect() {
    let (client, _server) = pair(config(), config());
    let events = Arc::new(Events::default());
    client.subscribe(events.clone());
    client.set_reading_async(true).expect("async reader should start");
    thread::sleep(Duration::from_millis(50));

    client.close();
    assert_eq!(client.state(), ConnectionState::Closed);
    assert!(!client.is_reading_async());
    thread::sleep(Duration::from_millis(50));
    assert_eq!(events.disconnected.load(Ordering::SeqCst), 1);
}

#[test]
fn peer_hangup_ends_async_reader() {
    let (client, server) = pair(config(), config());
    let events = Arc::new(Events::default());
    client.subscribe(events.clone());
    client.set_reading_async(true).expect("async reader should start");

    server.close();
    assert!(wait_until(Duration::from_secs(5), || {
        events.disconnected.load(Ordering::SeqCst) == 1
    }));
    assert_eq!(client.state(), ConnectionState::Closed);
    assert!(matches!(
        client.set_reading_async(true),
        Err(PeerError::NotConnected)
    ));
}

#[test]
fn handler_may_stop_async_reading() {
    let (client, server) = pair(config(), config());
    let stopped = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&stopped);
    client
        .dispatcher()
        .add_handler::<PingReply, _>(move |connection: &Connection, _| {
            connection
                .set_reading_async(false)
                .expect("stop from handler");
            counter.fetch_add(1, Ordering::SeqCst);
        });
    client.set_reading_async(true).expect("async reader should start");

    server.write_sync(&PingReply).expect("reply should send");
    assert!(wait_until(Duration::from_secs(5), || {
        stopped.load(Ordering::SeqCst) == 1
    }));
    assert!(!client.is_reading_async());

    server.write_sync(&Ping).expect("ping should send");
    let payload = client.read_sync().expect("sync read after handler stop");
    assert!(payload.is::<Ping>());
}
