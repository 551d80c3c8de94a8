use std::io;
use std::string::FromUtf8Error;
use thiserror::Error;

/// Failure taxonomy for the handshake, frame codec and worker loops.
///
/// Errors raised here never unwind across the reader/writer thread boundary into the
/// owning [`crate::client::Client`]; worker loops fold them into cooperative teardown
/// instead of propagating.
#[derive(Error, Debug)]
pub enum Error {
    #[error("{source}")]
    Io {
        #[from]
        source: io::Error,
    },

    #[error("{source}")]
    FromUtf8 {
        #[from]
        source: FromUtf8Error,
    },

    #[error("no Sec-WebSocket-Key header present in the request")]
    NoSecWebSocketKey,

    #[error("handshake response was not written in a single write")]
    ShortWrite,

    #[error("handshake response did not carry a 101 Switching Protocols status")]
    HandshakeRejected,

    #[error("Sec-WebSocket-Accept value returned by the peer did not match")]
    InvalidAcceptKey,

    #[error("invalid or unsupported opcode: {0:#x}")]
    InvalidOpcode(u8),

    #[error("frame header malformed: {0}")]
    ProtocolError(&'static str),

    #[error("failed to bind listening socket: {0}")]
    BindFailed(io::Error),

    #[error("failed to listen on bound socket: {0}")]
    ListenFailed(io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
