//! Thin blocking TCP helpers shared by the handshake and the client-role dialer.
//!
//! Everything here is a direct wrapper around `std::net::TcpStream`; the point is a
//! single place that knows how to read a CRLF/LF-tolerant line for the HTTP upgrade
//! exchange, which both [`crate::server`]'s accept path and [`crate::client`]'s
//! connect path need.

use std::io::{self, Read};
use std::net::{TcpStream, ToSocketAddrs};

/// Connects to `addr`, disabling Nagle's algorithm — frames are already batched by the
/// writer worker (see [`crate::client`]), so there is nothing to gain from further
/// coalescing at the kernel level.
pub fn connect<A: ToSocketAddrs>(addr: A) -> io::Result<TcpStream> {
    let stream = TcpStream::connect(addr)?;
    stream.set_nodelay(true)?;
    Ok(stream)
}

/// Reads one line, byte at a time, stopping at `\n` and stripping a trailing lone `\r`.
/// Returns an empty string on a blank line (the handshake's end-of-headers marker) or
/// on EOF.
pub fn read_line<R: Read>(reader: &mut R) -> io::Result<String> {
    let mut line = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        match reader.read(&mut byte)? {
            0 => break,
            _ if byte[0] == b'\n' => break,
            _ => line.push(byte[0]),
        }
    }
    if line.last() == Some(&b'\r') {
        line.pop();
    }
    Ok(String::from_utf8_lossy(&line).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn read_line_strips_crlf() {
        let mut cursor = Cursor::new(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n".to_vec());
        assert_eq!(read_line(&mut cursor).unwrap(), "GET / HTTP/1.1");
        assert_eq!(read_line(&mut cursor).unwrap(), "Host: x");
        assert_eq!(read_line(&mut cursor).unwrap(), "");
    }

    #[test]
    fn read_line_tolerates_lone_lf() {
        let mut cursor = Cursor::new(b"line one\nline two\n".to_vec());
        assert_eq!(read_line(&mut cursor).unwrap(), "line one");
        assert_eq!(read_line(&mut cursor).unwrap(), "line two");
    }

    #[test]
    fn read_line_on_eof_returns_empty() {
        let mut cursor = Cursor::new(Vec::new());
        assert_eq!(read_line(&mut cursor).unwrap(), "");
    }
}
