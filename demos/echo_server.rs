//! Minimal echo server: accepts WebSocket connections on 127.0.0.1:9002 and writes
//! back whatever each client pushes, on the same opcode it arrived as.

use std::thread;
use std::time::Duration;

use log::*;
use wsembed::{Opcode, ServerConfig, WebSocketServer};

fn main() {
    env_logger::init();

    let mut server = WebSocketServer::new(ServerConfig::default());
    server.start(9002).expect("failed to bind 127.0.0.1:9002");
    info!("listening on 127.0.0.1:9002");

    loop {
        for client in server.enumerate_clients().iter() {
            if !client.is_connected() {
                continue;
            }
            let Some((opcode, len)) = client.peek_opcode() else {
                continue;
            };
            if len == 0 && !matches!(opcode, Opcode::Text | Opcode::Binary) {
                continue;
            }
            let mut buf = vec![0u8; len];
            if client.pop(&mut buf) == len {
                debug!("client {} sent {} bytes, echoing back", client.id(), len);
                client.push_with_opcode(&buf, opcode);
            }
        }
        thread::sleep(Duration::from_millis(10));
    }
}
