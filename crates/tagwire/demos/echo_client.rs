//! Echo client: sends one `EchoRequest` and waits for the matching reply.

use std::sync::Arc;

use tagwire::demo::{self, EchoReply, EchoRequest};
use tagwire::peer::{Connection, ConnectionConfig};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut args = std::env::args().skip(1);
    let addr = args
        .next()
        .unwrap_or_else(|| "127.0.0.1:7000".to_string())
        .parse()?;
    let message = args.next().unwrap_or_else(|| "hello".to_string());

    let config = ConnectionConfig::default()
        .with_registry(Arc::new(demo::registry()?))
        .with_heartbeat(None);
    let connection = Connection::open(addr, config)?;

    let mut request = EchoRequest::new(message);
    let request_id = connection.write_request_sync(&mut request)?;

    loop {
        let payload = connection.read_sync()?;
        if let Some(reply) = payload.downcast_ref::<EchoReply>() {
            if reply.reply.packet.request_id == request_id {
                println!("{} (served by connection {})", reply.message, reply.served_by);
                break;
            }
        }
    }

    connection.close();
    Ok(())
}
