mod support;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use support::{config, loopback, wait_until, Login, LoginReply};
use tagwire_codec::{Ping, Serializable};
use tagwire_peer::{Connection, Server, ServerConfig};

fn login_server() -> Server {
    let server = Server::new(ServerConfig::default().with_connection(config()));
    server
        .dispatcher()
        .add_handler::<Login, _>(|connection: &Connection, login: &Login| {
            let mut reply = LoginReply::default();
            if login.user.is_empty() {
                reply.reply.set_error("empty user name");
            } else {
                reply.session = 4242;
            }
            connection
                .write_reply_to(&mut reply, login)
                .expect("reply should send");
        });
    server
}

fn next_reply(client: &Connection) -> LoginReply {
    loop {
        let payload = client.read_sync().expect("client should receive");
        if payload.is::<Ping>() {
            continue;
        }
        return payload
            .downcast_ref::<LoginReply>()
            .expect("payload should be a LoginReply")
            .clone();
    }
}

#[test]
fn reply_carries_request_id() {
    let server = login_server();
    let addr = server.start(loopback()).expect("server should start");
    let client = Connection::open(addr, config()).expect("client should connect");

    let mut login = Login::new("ada");
    let id = client
        .write_request_sync(&mut login)
        .expect("request should send");
    assert_eq!(id, 1);

    let reply = next_reply(&client);
    assert_eq!(reply.reply.packet.request_id, id);
    assert!(reply.reply.success);
    assert_eq!(reply.session, 4242);

    let payload: &dyn Serializable = &reply;
    let status = payload.as_transaction().expect("reply is a transaction");
    assert!(status.is_success());
}

#[test]
fn failed_reply_reports_error() {
    let server = login_server();
    let addr = server.start(loopback()).expect("server should start");
    let client = Connection::open(addr, config()).expect("client should connect");

    client
        .write_request_sync(&mut Login::new("first"))
        .expect("request should send");
    let second = client
        .write_request_sync(&mut Login::new(""))
        .expect("request should send");

    let first_reply = next_reply(&client);
    assert!(first_reply.reply.success);
    let second_reply = next_reply(&client);
    assert_eq!(second_reply.reply.packet.request_id, second);
    assert!(!second_reply.reply.success);
    assert_eq!(second_reply.reply.error_msg, "empty user name");
}

#[test]
fn async_client_handles_replies() {
    let server = login_server();
    let addr = server.start(loopback()).expect("server should start");
    let client = Connection::open(addr, config()).expect("client should connect");

    let replies = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&replies);
    client
        .dispatcher()
        .add_handler::<LoginReply, _>(move |_, reply: &LoginReply| {
            sink.lock()
                .expect("lock")
                .push(reply.reply.packet.request_id);
        });
    client
        .set_reading_async(true)
        .expect("async reader should start");

    let mut ids = Vec::new();
    for user in ["a", "b", "c"] {
        ids.push(
            client
                .write_request_sync(&mut Login::new(user))
                .expect("request should send"),
        );
    }

    assert!(wait_until(Duration::from_secs(5), || {
        replies.lock().expect("lock").len() == 3
    }));
    assert_eq!(*replies.lock().expect("lock"), ids);
}

#[test]
fn handlers_only_fire_for_their_exact_tag() {
    let server = login_server();
    let logins = Arc::new(AtomicUsize::new(0));
    let counted = Arc::clone(&logins);
    server.dispatcher().add_handler::<Login, _>(move |_, _| {
        counted.fetch_add(1, Ordering::SeqCst);
    });
    let addr = server.start(loopback()).expect("server should start");
    let client = Connection::open(addr, config()).expect("client should connect");

    client.write_sync(&Ping).expect("ping should send");
    client
        .write_request_sync(&mut Login::new("ada"))
        .expect("request should send");
    let _ = next_reply(&client);

    assert_eq!(logins.load(Ordering::SeqCst), 1);
}
