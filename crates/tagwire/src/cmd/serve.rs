use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use serde::Serialize;
use tagwire::demo::{self, EchoReply, EchoRequest};
use tagwire_peer::{
    Connection, ConnectionConfig, ConnectionObserver, HeartbeatService, PeerError, Server,
    ServerConfig,
};

use crate::cmd::{parse_duration, parse_socket_addr, ServeArgs};
use crate::exit::{codec_error, peer_error, CliError, CliResult, INTERNAL, SUCCESS};
use crate::output::{now_unix_seconds, print_json, table, OutputFormat};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Serialize)]
struct ListeningEvent {
    event: &'static str,
    addr: String,
    heartbeat_ms: Option<u64>,
}

#[derive(Serialize)]
struct EchoEvent {
    event: &'static str,
    connection: u64,
    peer: String,
    request_id: u32,
    message: String,
    success: bool,
    timestamp: String,
}

pub fn run(args: ServeArgs, format: OutputFormat) -> CliResult<i32> {
    let addr = parse_socket_addr(&args.addr)?;
    let registry =
        Arc::new(demo::registry().map_err(|err| codec_error("registry setup failed", err))?);

    let heartbeat = match &args.heartbeat {
        Some(interval) => Some(HeartbeatService::new(parse_duration(interval)?)),
        None => None,
    };
    let mut connection = ConnectionConfig::default()
        .with_registry(registry)
        .with_heartbeat(heartbeat.clone());
    if let Some(max) = args.max_payload {
        connection = connection.with_max_payload_size(max);
    }

    let server = Server::new(ServerConfig::default().with_connection(connection));
    server.subscribe(Arc::new(ClientLog));

    let answered = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&answered);
    server
        .dispatcher()
        .add_handler::<EchoRequest, _>(move |connection: &Connection, request: &EchoRequest| {
            let mut reply = EchoReply::answer(request, connection.id());
            match connection.write_reply_to(&mut reply, request) {
                Ok(_) => {
                    counter.fetch_add(1, Ordering::SeqCst);
                    print_echo(&echo_event(connection, &reply), format);
                }
                Err(err) => tracing::warn!(conn = connection.id(), error = %err, "reply failed"),
            }
        });

    let bound = server
        .start(addr)
        .map_err(|err| peer_error("server start failed", err))?;
    if let Some(service) = &heartbeat {
        service
            .start()
            .map_err(|err| peer_error("heartbeat start failed", err))?;
    }
    print_listening(
        &ListeningEvent {
            event: "listening",
            addr: bound.to_string(),
            heartbeat_ms: heartbeat
                .as_ref()
                .map(|service| service.interval().as_millis() as u64),
        },
        format,
    );

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    while !should_exit(&running, &answered, args.count) {
        thread::sleep(POLL_INTERVAL);
    }

    server.stop();
    if let Some(service) = &heartbeat {
        service.stop();
    }
    tracing::info!(answered = answered.load(Ordering::SeqCst), "server exiting");
    Ok(SUCCESS)
}

fn should_exit(running: &AtomicBool, answered: &AtomicUsize, count: Option<usize>) -> bool {
    if !running.load(Ordering::SeqCst) {
        return true;
    }
    count.is_some_and(|limit| answered.load(Ordering::SeqCst) >= limit)
}

fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}

fn echo_event(connection: &Connection, reply: &EchoReply) -> EchoEvent {
    EchoEvent {
        event: "echo",
        connection: connection.id(),
        peer: connection
            .peer_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_else(|| "-".to_string()),
        request_id: reply.reply.packet.request_id,
        message: reply.message.clone(),
        success: reply.reply.success,
        timestamp: now_unix_seconds(),
    }
}

fn print_listening(event: &ListeningEvent, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(event),
        OutputFormat::Table | OutputFormat::Pretty => match event.heartbeat_ms {
            Some(ms) => println!("listening on {} (heartbeat every {ms}ms)", event.addr),
            None => println!("listening on {}", event.addr),
        },
    }
}

fn print_echo(event: &EchoEvent, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(event),
        OutputFormat::Table => {
            let rendered = table(
                &["CONN", "PEER", "REQUEST", "OK", "MESSAGE"],
                [vec![
                    event.connection.to_string(),
                    event.peer.clone(),
                    event.request_id.to_string(),
                    event.success.to_string(),
                    event.message.clone(),
                ]],
            );
            println!("{rendered}");
        }
        OutputFormat::Pretty => println!(
            "echo conn={} peer={} request={} ok={} message={}",
            event.connection, event.peer, event.request_id, event.success, event.message
        ),
    }
}

/// Logs client arrivals and departures.
struct ClientLog;

impl ConnectionObserver for ClientLog {
    fn on_connected(&self, connection: &Connection) {
        tracing::info!(
            conn = connection.id(),
            peer = ?connection.peer_addr(),
            "client connected"
        );
    }

    fn on_disconnected(&self, connection: &Connection, reason: &PeerError) {
        tracing::info!(conn = connection.id(), %reason, "client disconnected");
    }
}
