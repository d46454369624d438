mod support;

use std::thread;
use std::time::{Duration, Instant};

use support::{config, pair, wait_until};
use tagwire_codec::Ping;
use tagwire_peer::{ConnectionState, HeartbeatService, PeerError};

#[test]
fn subscribed_connection_receives_periodic_pings() {
    let interval = Duration::from_millis(50);
    let service = HeartbeatService::new(interval);
    let (client, server) = pair(
        config().with_heartbeat(Some(service.clone())),
        config(),
    );
    assert_eq!(service.subscriber_count(), 1);

    // The first ping is the greeting sent on connect.
    assert!(server.read_sync().expect("greeting").is::<Ping>());

    service.start().expect("heartbeat should start");
    let started = Instant::now();
    for _ in 0..3 {
        let payload = server.read_sync().expect("heartbeat should arrive");
        assert!(payload.is::<Ping>());
    }
    assert!(
        started.elapsed() < interval * 20,
        "three heartbeats took {:?}",
        started.elapsed()
    );

    service.stop();
    thread::sleep(interval * 2);
    let sweeps = service.sweeps();
    thread::sleep(interval * 4);
    assert_eq!(service.sweeps(), sweeps, "no sweeps after stop");
    assert!(!service.is_running());
    drop(client);
}

#[test]
fn closing_leaves_the_rotation() {
    let service = HeartbeatService::new(Duration::from_millis(20));
    let (client, _server) = pair(
        config().with_heartbeat(Some(service.clone())),
        config(),
    );
    assert_eq!(service.subscriber_count(), 1);

    client.close();
    assert_eq!(client.state(), ConnectionState::Closed);
    assert_eq!(service.subscriber_count(), 0);
}

#[test]
fn double_start_is_misuse() {
    let service = HeartbeatService::new(Duration::from_millis(20));
    service.start().expect("heartbeat should start");
    let err = service.start().expect_err("second start must fail");
    assert!(matches!(err, PeerError::HeartbeatRunning));
    assert!(!err.is_fatal());
    service.stop();
    assert!(wait_until(Duration::from_secs(1), || !service.is_running()));
}

#[test]
fn heartbeat_tolerates_dead_peers() {
    let service = HeartbeatService::new(Duration::from_millis(20));
    let (client, server) = pair(
        config().with_heartbeat(Some(service.clone())),
        config(),
    );
    server.close();
    drop(server);

    service.start().expect("heartbeat should start");
    // The write eventually fails, which closes the client and drops it
    // from the rotation.
    assert!(wait_until(Duration::from_secs(5), || !client.is_connected()));
    assert!(wait_until(Duration::from_secs(1), || service.subscriber_count() == 0));
    assert!(service.is_running());
    service.stop();
}
