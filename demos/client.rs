//! Minimal client: connects to a WebSocket server on 127.0.0.1:9002, sends a
//! handful of text messages, and prints whatever comes back.

use std::thread;
use std::time::Duration;

use log::*;
use wsembed::{Client, ClientConfig};

fn main() {
    env_logger::init();

    let client = Client::connect("127.0.0.1:9002", ClientConfig::default())
        .expect("failed to connect to 127.0.0.1:9002");
    info!("connected, id={}", client.id());

    for i in 0..3 {
        client.push_text(&format!("hello #{i}"));
        thread::sleep(Duration::from_millis(200));

        let len = client.peek();
        if len > 0 {
            let mut buf = vec![0u8; len];
            client.pop(&mut buf);
            println!("received: {}", String::from_utf8_lossy(&buf));
        }
    }

    client.disconnect();
}
