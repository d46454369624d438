use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tagwire::demo::{self, EchoReply, EchoRequest};
use tagwire_codec::Serializable;
use tagwire_peer::{Connection, ConnectionConfig, PeerError, RequestId};

use crate::cmd::{parse_duration, parse_socket_addr, SendArgs};
use crate::exit::{codec_error, peer_error, CliError, CliResult, FAILURE, SUCCESS, USAGE};
use crate::output::{print_json, table, OutputFormat};

#[derive(Serialize)]
struct ReplyOutput {
    request_id: u32,
    success: bool,
    error: Option<String>,
    message: String,
    served_by: u64,
    latency_ms: f64,
}

pub fn run(args: SendArgs, format: OutputFormat) -> CliResult<i32> {
    if args.count == 0 {
        return Err(CliError::new(USAGE, "--count must be greater than zero"));
    }
    let addr = parse_socket_addr(&args.addr)?;
    let timeout = parse_duration(&args.timeout)?;
    let registry =
        Arc::new(demo::registry().map_err(|err| codec_error("registry setup failed", err))?);

    let config = ConnectionConfig::default()
        .with_registry(registry)
        .with_heartbeat(None)
        .with_connect_timeout(Some(timeout))
        .with_read_timeout(Some(timeout));
    let connection =
        Connection::open(addr, config).map_err(|err| peer_error("connect failed", err))?;

    let mut outputs = Vec::new();
    for _ in 0..args.count {
        let mut request = EchoRequest::new(args.message.clone());
        let started = Instant::now();
        let request_id = connection
            .write_request_sync(&mut request)
            .map_err(|err| peer_error("send failed", err))?;
        let reply = wait_for_reply(connection.as_ref(), request_id)
            .map_err(|err| peer_error("receive failed", err))?;
        outputs.push(ReplyOutput {
            request_id,
            success: reply.reply.success,
            error: (!reply.reply.success).then(|| reply.reply.error_msg.clone()),
            message: reply.message,
            served_by: reply.served_by,
            latency_ms: (started.elapsed().as_secs_f64() * 1000.0 * 100.0).round() / 100.0,
        });
    }
    connection.close();

    print_replies(&outputs, format);
    if outputs.iter().all(|out| out.success) {
        Ok(SUCCESS)
    } else {
        Ok(FAILURE)
    }
}

trait PayloadSource {
    fn next_payload(&self) -> Result<Arc<dyn Serializable>, PeerError>;
}

impl PayloadSource for Connection {
    fn next_payload(&self) -> Result<Arc<dyn Serializable>, PeerError> {
        self.read_sync()
    }
}

/// Read until the reply to `request_id` arrives. Heartbeats, stray replies
/// and undecodable frames are skipped.
fn wait_for_reply<S: PayloadSource + ?Sized>(
    source: &S,
    request_id: RequestId,
) -> Result<EchoReply, PeerError> {
    loop {
        let payload = match source.next_payload() {
            Ok(payload) => payload,
            Err(PeerError::Decode(err)) => {
                tracing::warn!(error = %err, "skipping undecodable payload");
                continue;
            }
            Err(err) => return Err(err),
        };
        match payload.downcast_ref::<EchoReply>() {
            Some(reply) if reply.reply.packet.request_id == request_id => {
                return Ok(reply.clone());
            }
            Some(reply) => tracing::debug!(
                expected = request_id,
                got = reply.reply.packet.request_id,
                "skipping reply to another request"
            ),
            None => tracing::debug!(tag = %payload.tag(), "skipping payload"),
        }
    }
}

fn print_replies(outputs: &[ReplyOutput], format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            for out in outputs {
                print_json(out);
            }
        }
        OutputFormat::Table => {
            let rendered = table(
                &["REQUEST", "OK", "MESSAGE", "SERVED BY", "LATENCY"],
                outputs.iter().map(|out| {
                    vec![
                        out.request_id.to_string(),
                        match &out.error {
                            Some(error) => format!("false ({error})"),
                            None => "true".to_string(),
                        },
                        out.message.clone(),
                        out.served_by.to_string(),
                        format!("{:.2}ms", out.latency_ms),
                    ]
                }),
            );
            println!("{rendered}");
        }
        OutputFormat::Pretty => {
            for out in outputs {
                match &out.error {
                    Some(error) => println!("#{} failed: {error}", out.request_id),
                    None => println!(
                        "#{} {} ({:.2}ms, conn {})",
                        out.request_id, out.message, out.latency_ms, out.served_by
                    ),
                }
            }
        }
    }
}
