//! The asynchronous client engine: two worker threads (reader, writer) bridging a raw
//! `TcpStream` to the `push`/`peek`/`pop` API the application actually uses.
//!
//! Grounded on the teacher's `read.rs`/`write.rs`/`connection.rs` split, reworked from
//! per-connection `tokio` tasks operating on split async halves to blocking OS threads
//! (`std::thread::spawn`) operating on independent `TcpStream` clones, per SPEC_FULL.md
//! §4.4.

use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use log::{debug, trace, warn};

use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::frame::Opcode;
use crate::handshake;
use crate::message::MessageBuffer;
use crate::socket;
use crate::sync::{Semaphore, SpinLock};
use crate::wsio::{self, ConsumeOutcome, FrameAssembler, Role};

/// State shared between a [`Client`] handle and its reader/writer threads.
struct Shared {
    id: u64,
    role: Role,
    peer_addr: SocketAddr,
    max_frame_payload: usize,
    connected: AtomicBool,
    read_buf: SpinLock<MessageBuffer>,
    write_buf: SpinLock<MessageBuffer>,
    write_signal: Semaphore,
    /// The owning [`crate::server::Server`]'s reaper semaphore, notified whenever this
    /// client transitions to disconnected so the reaper wakes and collects it. `None`
    /// for a client-role [`Client`] created via [`Client::connect`], which has no
    /// registry to be collected from.
    reaper_signal: Option<Arc<Semaphore>>,
}

/// A single WebSocket connection, server- or client-role. Owns its reader and writer
/// threads and the two message buffers they feed; the application only ever touches
/// `push`/`peek`/`pop`/`disconnect`/`is_connected`.
pub struct Client {
    shared: Arc<Shared>,
    /// Kept solely so `disconnect`/`Drop` can shut the socket down from outside either
    /// worker thread; neither worker reads or writes through this clone.
    control_stream: TcpStream,
    reader_handle: Option<JoinHandle<()>>,
    writer_handle: Option<JoinHandle<()>>,
}

impl Client {
    /// Dials `addr` as a client, performing the HTTP Upgrade handshake before handing
    /// back a running connection. Per SPEC_FULL.md §4.10, a client-role `Client` masks
    /// its outgoing frames; otherwise its API is identical to a server-accepted one.
    pub fn connect<A: ToSocketAddrs>(addr: A, config: ClientConfig) -> Result<Client> {
        let mut stream = socket::connect(addr)?;
        let peer_addr = stream.peer_addr()?;
        let host = peer_addr.ip().to_string();
        handshake::connect_request(&mut stream, &host, "/")?;
        debug!(target: "wsembed::client", "handshake accepted by {peer_addr}");
        Client::from_stream(stream, Role::Client, 0, config.initial_buffer_size, config.max_frame_payload, None)
    }

    /// Wraps an already-upgraded socket in a running `Client`, spawning its reader and
    /// writer threads. Used both by [`Client::connect`] and by the server's accept
    /// path once `crate::handshake::accept` has succeeded. Takes the buffer-sizing
    /// knobs directly rather than a concrete config type so it's usable from both
    /// [`ClientConfig`] and [`crate::config::ServerConfig`] callers. `reaper_signal` is
    /// `Some` for a server-owned client, so its disconnection wakes the server's reaper.
    pub(crate) fn from_stream(
        stream: TcpStream,
        role: Role,
        id: u64,
        initial_buffer_size: usize,
        max_frame_payload: usize,
        reaper_signal: Option<Arc<Semaphore>>,
    ) -> Result<Client> {
        stream.set_nodelay(true)?;
        let peer_addr = stream.peer_addr()?;
        let reader_stream = stream.try_clone()?;
        let writer_stream = stream.try_clone()?;

        let shared = Arc::new(Shared {
            id,
            role,
            peer_addr,
            max_frame_payload,
            connected: AtomicBool::new(true),
            read_buf: SpinLock::new(MessageBuffer::new()),
            write_buf: SpinLock::new(MessageBuffer::new()),
            write_signal: Semaphore::new(),
            reaper_signal,
        });

        let initial_buffer_size = initial_buffer_size.max(MIN_BUFFER_SIZE);

        let reader_handle = {
            let shared = Arc::clone(&shared);
            thread::Builder::new()
                .name(format!("wsembed-reader-{id}"))
                .spawn(move || reader_thread(shared, reader_stream, initial_buffer_size))
                .map_err(Error::from)?
        };
        let writer_handle = {
            let shared = Arc::clone(&shared);
            thread::Builder::new()
                .name(format!("wsembed-writer-{id}"))
                .spawn(move || writer_thread(shared, writer_stream, initial_buffer_size))
                .map_err(Error::from)?
        };

        Ok(Client {
            shared,
            control_stream: stream,
            reader_handle: Some(reader_handle),
            writer_handle: Some(writer_handle),
        })
    }

    pub fn id(&self) -> u64 {
        self.shared.id
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.shared.peer_addr
    }

    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::Acquire)
    }

    /// Buffers `bytes` as a Binary message.
    pub fn push(&self, bytes: &[u8]) {
        self.push_with_opcode(bytes, Opcode::Binary);
    }

    /// Buffers `text` as a Text message. Unlike the reference implementation's
    /// `const char *`-based overload, a Rust `&str` already carries its own length, so
    /// there's no terminator to scan for (SPEC_FULL.md §9).
    pub fn push_text(&self, text: &str) {
        self.push_with_opcode(text.as_bytes(), Opcode::Text);
    }

    /// Buffers `bytes` with a caller-chosen opcode.
    pub fn push_with_opcode(&self, bytes: &[u8], opcode: Opcode) {
        {
            let mut write_buf = self.shared.write_buf.lock();
            write_buf.block_begin(opcode);
            write_buf.write(bytes);
            write_buf.block_end();
        }
        self.shared.write_signal.notify();
    }

    /// Length of the next completed message, 0 if none.
    pub fn peek(&self) -> usize {
        self.shared.read_buf.lock().peek().map_or(0, |(_, len)| len)
    }

    /// As [`Client::peek`], but also reports the opcode of the next completed message.
    pub fn peek_opcode(&self) -> Option<(Opcode, usize)> {
        self.shared.read_buf.lock().peek()
    }

    /// Drains up to `dst.len()` bytes from the head message. A partial drain leaves the
    /// remainder under a `Continuation` opcode, visible to a subsequent `peek`/`pop` of
    /// the same logical message.
    pub fn pop(&self, dst: &mut [u8]) -> usize {
        self.shared.read_buf.lock().read(dst)
    }

    /// Closes the underlying socket. Returns `true` iff this call performed the
    /// connected-to-disconnected transition (idempotent otherwise).
    pub fn disconnect(&self) -> bool {
        kill_threads(&self.shared, &self.control_stream, true)
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        kill_threads(&self.shared, &self.control_stream, true);
        if let Some(handle) = self.reader_handle.take() {
            let _ = handle.join();
        }
        if let Some(handle) = self.writer_handle.take() {
            let _ = handle.join();
        }
    }
}

const MIN_BUFFER_SIZE: usize = crate::frame::MAX_HEADER_LEN + 1;

/// Flips `connected` false (reporting whether this call made the transition),
/// shuts the socket down so any in-flight `recv`/`send` unblocks with an error, and
/// nudges the writer's semaphore so it observes the new state even if nothing is
/// buffered for it to send. Safe to call from either worker thread or from the owning
/// `Client` handle; an extra nudge after the writer has already exited is harmless.
fn kill_threads(shared: &Shared, stream: &TcpStream, nudge_writer: bool) -> bool {
    let was_connected = shared.connected.swap(false, Ordering::AcqRel);
    if was_connected {
        let _ = stream.shutdown(Shutdown::Both);
        debug!(target: "wsembed::client", "client {} disconnected", shared.id);
        if let Some(reaper) = &shared.reaper_signal {
            reaper.notify();
        }
    }
    if nudge_writer {
        shared.write_signal.notify();
    }
    was_connected
}

fn reader_thread(shared: Arc<Shared>, mut stream: TcpStream, initial_buffer_size: usize) {
    use std::io::Read;

    let mut buf = vec![0u8; initial_buffer_size];
    let mut filled = 0usize;
    let mut progressed = true;
    let mut assembler = FrameAssembler::new();

    loop {
        if filled == 0 || !progressed {
            if filled == buf.len() {
                buf.resize(buf.len() * 2, 0);
            }
            match stream.read(&mut buf[filled..]) {
                Ok(0) => {
                    trace!(target: "wsembed::client", "client {} read EOF", shared.id);
                    break;
                }
                Ok(n) => filled += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!(target: "wsembed::client", "client {} read error: {e}", shared.id);
                    break;
                }
            }
        }

        let result = {
            let mut read_buf = shared.read_buf.lock();
            let mut write_buf = shared.write_buf.lock();
            assembler.consume(
                &buf[..filled],
                shared.max_frame_payload,
                &mut read_buf,
                &mut write_buf,
                &shared.write_signal,
            )
        };

        match result {
            Ok((consumed, outcome)) => {
                if consumed > 0 {
                    buf.copy_within(consumed..filled, 0);
                    filled -= consumed;
                    progressed = true;
                } else {
                    progressed = false;
                }
                if outcome == ConsumeOutcome::PeerClosed {
                    trace!(target: "wsembed::client", "client {} received Close", shared.id);
                    break;
                }
            }
            Err(e) => {
                warn!(target: "wsembed::client", "client {} protocol error: {e}", shared.id);
                break;
            }
        }
    }

    kill_threads(&shared, &stream, true);
}

fn writer_thread(shared: Arc<Shared>, mut stream: TcpStream, initial_buffer_size: usize) {
    use std::io::Write;

    // The writer buffer must start large enough to fit one full-size frame (header +
    // `max_frame_payload`), or `fill_outgoing` caps every frame to whatever shrunk
    // space is left in it and a large `push` never reaches the 128 KiB ceiling it's
    // supposed to fragment at (SPEC_FULL.md §8 scenario 4) — it only grows on a
    // zero-progress pass, which a merely-small-but-nonzero buffer never triggers. The
    // reference implementation sizes its write thread's buffer the same way
    // (`HeadSocket.h`'s `writeThread`, 1 MiB fixed).
    let writer_buffer_size = initial_buffer_size.max(shared.max_frame_payload + crate::frame::MAX_HEADER_LEN);
    let mut buf = vec![0u8; writer_buffer_size];

    loop {
        shared.write_signal.wait();
        if !shared.connected.load(Ordering::Acquire) {
            break;
        }

        loop {
            let (written, has_more) = {
                let mut write_buf = shared.write_buf.lock();
                let written = wsio::fill_outgoing(
                    &mut write_buf,
                    &mut buf,
                    shared.role,
                    shared.max_frame_payload,
                    &shared.write_signal,
                );
                (written, write_buf.peek().is_some())
            };

            if written == 0 {
                if has_more {
                    buf.resize(buf.len() * 2, 0);
                    continue;
                }
                break;
            }

            if let Err(e) = stream.write_all(&buf[..written]) {
                warn!(target: "wsembed::client", "client {} write error: {e}", shared.id);
                kill_threads(&shared, &stream, false);
                return;
            }
        }
    }

    kill_threads(&shared, &stream, false);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::time::{Duration, Instant};

    fn accept_one(listener: TcpListener, config: ClientConfig) -> Client {
        let (mut stream, _) = listener.accept().unwrap();
        handshake::accept(&mut stream).unwrap();
        Client::from_stream(stream, Role::Server, 1, config.initial_buffer_size, config.max_frame_payload, None).unwrap()
    }

    fn wait_for<F: Fn() -> bool>(condition: F) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !condition() {
            assert!(Instant::now() < deadline, "timed out waiting for condition");
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn push_pop_roundtrip_over_real_sockets() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let config = ClientConfig::default();

        let server_config = config.clone();
        let server_thread = thread::spawn(move || accept_one(listener, server_config));

        let client = Client::connect(addr, config).unwrap();
        let server = server_thread.join().unwrap();

        client.push(b"hello from client");
        wait_for(|| server.peek() > 0);
        let mut out = vec![0u8; server.peek()];
        assert_eq!(server.pop(&mut out), out.len());
        assert_eq!(&out, b"hello from client");

        server.push_text("hi back");
        wait_for(|| client.peek() > 0);
        let mut out2 = vec![0u8; client.peek()];
        assert_eq!(client.pop(&mut out2), out2.len());
        // Text carries the non-standard trailing NUL (SPEC_FULL.md §9).
        assert_eq!(&out2, b"hi back\0");
    }

    #[test]
    fn disconnect_is_observed_by_the_peer() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let config = ClientConfig::default();

        let server_config = config.clone();
        let server_thread = thread::spawn(move || accept_one(listener, server_config));

        let client = Client::connect(addr, config).unwrap();
        let server = server_thread.join().unwrap();

        assert!(client.is_connected());
        assert!(client.disconnect());
        assert!(!client.disconnect(), "second disconnect must be a no-op");

        wait_for(|| !server.is_connected());
    }

    #[test]
    fn large_push_is_delivered_whole_despite_wire_fragmentation() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let config = ClientConfig::default();

        let server_config = config.clone();
        let server_thread = thread::spawn(move || accept_one(listener, server_config));

        let client = Client::connect(addr, config).unwrap();
        let server = server_thread.join().unwrap();

        let payload = vec![0xab; 512 * 1024];
        server.push(&payload);

        wait_for(|| client.peek() >= payload.len());
        let mut out = vec![0u8; client.peek()];
        assert_eq!(client.pop(&mut out), payload.len());
        assert_eq!(out, payload);
    }
}
