//! Echo server: answers every `EchoRequest` with an `EchoReply`.
//!
//! Run with:
//!   cargo run -p tagwire --example echo-server -- 127.0.0.1:7000
//!
//! In another terminal:
//!   cargo run -p tagwire --example echo-client -- 127.0.0.1:7000 hello

use std::sync::Arc;

use tagwire::demo::{self, EchoReply, EchoRequest};
use tagwire::peer::{Connection, ConnectionConfig, Server, ServerConfig};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let addr = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "127.0.0.1:7000".to_string())
        .parse()?;

    let config = ConnectionConfig::default()
        .with_registry(Arc::new(demo::registry()?))
        .with_heartbeat(None);
    let server = Server::new(ServerConfig::default().with_connection(config));

    server
        .dispatcher()
        .add_handler::<EchoRequest, _>(|connection: &Connection, request: &EchoRequest| {
            eprintln!(
                "#{} from connection {}: {}",
                request.packet.request_id,
                connection.id(),
                request.message
            );
            let mut reply = EchoReply::answer(request, connection.id());
            if let Err(err) = connection.write_reply_to(&mut reply, request) {
                eprintln!("reply failed: {err}");
            }
        });

    let bound = server.start(addr)?;
    eprintln!("Listening on {bound}");
    server.join();
    Ok(())
}
