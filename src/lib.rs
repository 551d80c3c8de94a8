//! A minimal, embeddable WebSocket server/client implementation over blocking TCP.
//!
//! This crate implements the core of [RFC 6455](https://datatracker.ietf.org/doc/html/rfc6455):
//! the HTTP/1.1 Upgrade handshake, frame parsing/emission (including 16/64-bit
//! extended payload lengths and masking), and multi-frame message reassembly, running
//! each connection's I/O on a pair of blocking OS threads rather than an async runtime.
//!
//! The application-facing surface is deliberately small: [`client::Client`] exposes
//! `push`/`peek`/`pop`/`disconnect`, and [`server::WebSocketServer`] exposes
//! `start`/`stop`/`enumerate_clients`. Framing, masking and message reassembly all
//! happen on background reader/writer threads the application never touches directly.

pub mod client;
pub mod config;
pub mod error;
pub mod frame;
pub mod handshake;
pub mod message;
pub mod server;
mod socket;
mod sync;
mod wsio;

pub use client::Client;
pub use config::{ClientConfig, ServerConfig};
pub use error::{Error, Result};
pub use frame::Opcode;
pub use server::{Handshake, Server, ServerEvents, WebSocketServer};
