//! The HTTP/1.1 Upgrade exchange that promotes a raw TCP connection to a WebSocket
//! (RFC 6455 §1.3), on both the accepting (server) and dialing (client) side.
//!
//! SHA-1 and Base64 are the two leaf components the rest of this module is built on —
//! both delegated to the `sha1`/`base64` crates rather than hand-rolled, the same way
//! the teacher crate uses them.

use std::io::{Read, Write};
use std::net::TcpStream;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand::Rng;
use sha1::{Digest, Sha1};

use crate::error::{Error, Result};
use crate::socket;

const GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";
const SEC_WEBSOCKET_KEY_PREFIX: &str = "Sec-WebSocket-Key:";
const SEC_WEBSOCKET_ACCEPT_PREFIX: &str = "Sec-WebSocket-Accept:";

/// Computes `Base64(SHA-1(client_key + GUID))`, the value both sides independently
/// derive to agree the upgrade succeeded.
pub fn accept_key(client_key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(client_key.as_bytes());
    hasher.update(GUID.as_bytes());
    BASE64.encode(hasher.finalize())
}

/// Generates a fresh client-role `Sec-WebSocket-Key`: 16 random bytes, Base64-encoded.
pub fn generate_client_key() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill(&mut bytes);
    BASE64.encode(bytes)
}

/// Server-side half of the handshake: reads request lines until the blank line that
/// terminates the headers, picks out `Sec-WebSocket-Key`, and replies with the 101
/// upgrade response. Any other header is ignored.
///
/// The reader is tolerant of both CRLF and bare LF line endings (see [`socket::read_line`]);
/// the response is always emitted with LF only, matching SPEC_FULL.md §4.9.
pub fn accept(stream: &mut TcpStream) -> Result<()> {
    let key = read_client_key(stream)?;
    let accept_value = accept_key(&key);
    let response = format!(
        "HTTP/1.1 101 Switching Protocols\nUpgrade: websocket\nConnection: Upgrade\nSec-WebSocket-Accept: {}\n\n",
        accept_value
    );
    let bytes = response.as_bytes();
    let written = stream.write(bytes)?;
    if written != bytes.len() {
        return Err(Error::ShortWrite);
    }
    Ok(())
}

fn read_client_key<R: Read>(reader: &mut R) -> Result<String> {
    let mut key = None;
    loop {
        let line = socket::read_line(reader)?;
        if line.is_empty() {
            break;
        }
        if let Some(value) = line.strip_prefix(SEC_WEBSOCKET_KEY_PREFIX) {
            key = Some(value.trim().to_string());
        }
    }
    key.ok_or(Error::NoSecWebSocketKey)
}

/// Client-role dial: writes a GET-Upgrade request with a fresh `Sec-WebSocket-Key` to
/// `stream`, then reads and validates the server's response. Returns the key, so the
/// caller doesn't have to generate it twice.
pub fn connect_request(stream: &mut TcpStream, host: &str, path: &str) -> Result<String> {
    let key = generate_client_key();
    let request = format!(
        "GET {path} HTTP/1.1\r\nHost: {host}\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Key: {key}\r\nSec-WebSocket-Version: 13\r\n\r\n",
        path = path,
        host = host,
        key = key,
    );
    stream.write_all(request.as_bytes())?;
    validate_response(stream, &key)?;
    Ok(key)
}

fn validate_response<R: Read>(reader: &mut R, client_key: &str) -> Result<()> {
    let status_line = socket::read_line(reader)?;
    if !status_line.contains("101") {
        return Err(Error::HandshakeRejected);
    }

    let expected = accept_key(client_key);
    let mut accept_value = None;
    loop {
        let line = socket::read_line(reader)?;
        if line.is_empty() {
            break;
        }
        if let Some(value) = line.strip_prefix(SEC_WEBSOCKET_ACCEPT_PREFIX) {
            accept_value = Some(value.trim().to_string());
        }
    }

    match accept_value {
        Some(value) if value == expected => Ok(()),
        _ => Err(Error::InvalidAcceptKey),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rfc6455_example_vector() {
        // RFC 6455 §1.3 worked example.
        assert_eq!(
            accept_key("dGhlIHNhbXBsZSBub25jZQ=="),
            "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
        );
    }

    #[test]
    fn reads_key_ignoring_other_headers() {
        let request = b"GET / HTTP/1.1\r\nHost: x\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\r\n".to_vec();
        let mut cursor = std::io::Cursor::new(request);
        let key = read_client_key(&mut cursor).unwrap();
        assert_eq!(key, "dGhlIHNhbXBsZSBub25jZQ==");
    }

    #[test]
    fn missing_key_is_rejected() {
        let request = b"GET / HTTP/1.1\r\nHost: x\r\n\r\n".to_vec();
        let mut cursor = std::io::Cursor::new(request);
        assert!(read_client_key(&mut cursor).is_err());
    }

    #[test]
    fn validate_response_accepts_matching_key() {
        let key = "dGhlIHNhbXBsZSBub25jZQ==";
        let response =
            b"HTTP/1.1 101 Switching Protocols\r\nSec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n\r\n".to_vec();
        let mut cursor = std::io::Cursor::new(response);
        assert!(validate_response(&mut cursor, key).is_ok());
    }

    #[test]
    fn validate_response_rejects_mismatched_key() {
        let response =
            b"HTTP/1.1 101 Switching Protocols\r\nSec-WebSocket-Accept: not-the-right-value\r\n\r\n".to_vec();
        let mut cursor = std::io::Cursor::new(response);
        assert!(validate_response(&mut cursor, "dGhlIHNhbXBsZSBub25jZQ==").is_err());
    }
}
