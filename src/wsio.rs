//! The frame-level read and write paths: turning wire bytes into [`MessageBuffer`]
//! blocks and back again.
//!
//! This is the piece the teacher's `read.rs`/`write.rs` occupied, reworked for a
//! pull-based, stateful byte-buffer interface instead of an `async` socket half —
//! [`crate::client`]'s reader/writer threads own the actual `recv`/`send` calls and
//! feed their bytes through [`FrameAssembler::consume`] and [`fill_outgoing`].

use crate::error::{Error, Result};
use crate::frame::{self, FrameHeader, Opcode, ParsedHeader, WrittenHeader, MAX_HEADER_LEN};
use crate::message::MessageBuffer;
use crate::sync::Semaphore;

/// Which side of the connection a [`FrameAssembler`]/[`fill_outgoing`] pair is serving.
/// Only the client role masks outgoing frames — see SPEC_FULL.md §4.2, grounded on the
/// teacher's `WriterKind`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Server,
    Client,
}

impl Role {
    fn masks_outgoing(self) -> bool {
        matches!(self, Role::Client)
    }
}

/// A frame in progress: its header has been parsed but its payload hasn't fully
/// arrived yet. Carried across [`FrameAssembler::consume`] calls so a frame can
/// straddle any number of `recv`s.
struct PendingFrame {
    header: FrameHeader,
    /// The message-level opcode this frame's payload belongs to: itself for a
    /// Text/Binary/control frame, or the opcode of the message a `Continuation`
    /// frame extends.
    block_opcode: Opcode,
    remaining: u64,
    payload_offset: u64,
}

/// Per-connection frame reassembly state for the read direction.
///
/// Control-frame payloads (always small, never fragmented per RFC 6455) are held in a
/// scratch vector rather than routed through the read [`MessageBuffer`], so a Ping or
/// Close never surfaces to the application via `peek`/`pop`.
#[derive(Default)]
pub struct FrameAssembler {
    pending: Option<PendingFrame>,
    control_scratch: Vec<u8>,
}

/// What the caller should do after a [`FrameAssembler::consume`] call, beyond the
/// bytes it already appended to `read_buf`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumeOutcome {
    /// Nothing unusual; keep reading.
    Continue,
    /// A Close frame was fully received. The caller has already had its own Close
    /// frame queued onto `write_buf` if one hadn't been sent yet; it should flush the
    /// writer and tear the connection down.
    PeerClosed,
}

impl FrameAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consumes as many complete frames as `input` holds, in order, appending their
    /// payloads into `read_buf` (auto-replying to Ping via `write_buf`/`write_signal`,
    /// and reporting a Close). Returns the number of bytes consumed from the front of
    /// `input` and the outcome of the last frame completed, if any.
    ///
    /// A return of `0` consumed with no frame completed means `input` doesn't even
    /// hold a full header yet; the caller should grow its receive buffer and read more
    /// before calling again, per SPEC_FULL.md §4.4's "no-progress" rule.
    pub fn consume(
        &mut self,
        input: &[u8],
        max_frame_payload: usize,
        read_buf: &mut MessageBuffer,
        write_buf: &mut MessageBuffer,
        write_signal: &Semaphore,
    ) -> Result<(usize, ConsumeOutcome)> {
        let mut consumed = 0usize;
        let mut outcome = ConsumeOutcome::Continue;

        loop {
            if self.pending.is_none() {
                match frame::parse_frame_header(&input[consumed..])? {
                    ParsedHeader::NeedMore => break,
                    ParsedHeader::Complete { consumed: header_len, header } => {
                        if header.payload_length as usize > max_frame_payload && !header.opcode.is_control() {
                            return Err(Error::ProtocolError("frame payload exceeds configured maximum"));
                        }
                        consumed += header_len;

                        let block_opcode = if header.opcode == Opcode::Continuation {
                            read_buf
                                .open_opcode()
                                .ok_or(Error::ProtocolError("continuation frame with no message in progress"))?
                        } else {
                            if !header.opcode.is_control() {
                                read_buf.block_begin(header.opcode);
                            } else {
                                self.control_scratch.clear();
                            }
                            header.opcode
                        };

                        let remaining = header.payload_length;
                        self.pending = Some(PendingFrame {
                            header,
                            block_opcode,
                            remaining,
                            payload_offset: 0,
                        });
                    }
                }
            }

            let pending = self.pending.as_mut().expect("just ensured Some above");
            let available = input.len() - consumed;
            let to_take = available.min(pending.remaining as usize);
            if to_take == 0 && pending.remaining > 0 {
                break;
            }

            let chunk_start = consumed;
            consumed += to_take;
            let chunk = &input[chunk_start..consumed];

            if pending.header.opcode.is_control() {
                self.control_scratch.extend_from_slice(chunk);
                if let Some(key) = pending.header.masking_key {
                    let tail_start = self.control_scratch.len() - to_take;
                    let start = pending.payload_offset as usize;
                    frame::mask_cycle_from(&mut self.control_scratch[tail_start..], &key, start);
                }
            } else {
                read_buf.write(chunk);
                if let Some(key) = pending.header.masking_key {
                    read_buf.mask_tail(to_take, &key, pending.payload_offset as usize);
                }
            }

            pending.remaining -= to_take as u64;
            pending.payload_offset += to_take as u64;

            if pending.remaining == 0 {
                let finished = self.pending.take().expect("checked above");
                outcome = self.finish_frame(finished, read_buf, write_buf, write_signal)?;
            } else {
                break;
            }
        }

        Ok((consumed, outcome))
    }

    fn finish_frame(
        &mut self,
        frame: PendingFrame,
        read_buf: &mut MessageBuffer,
        write_buf: &mut MessageBuffer,
        write_signal: &Semaphore,
    ) -> Result<ConsumeOutcome> {
        if frame.header.opcode.is_control() {
            match frame.header.opcode {
                Opcode::Ping => {
                    write_buf.block_begin(Opcode::Pong);
                    write_buf.write(&self.control_scratch);
                    write_buf.block_end();
                    write_signal.notify();
                    Ok(ConsumeOutcome::Continue)
                }
                Opcode::ConnectionClose => Ok(ConsumeOutcome::PeerClosed),
                _ => Ok(ConsumeOutcome::Continue), // Pong: absorbed, nothing further to do
            }
        } else if frame.header.fin {
            if frame.block_opcode == Opcode::Text {
                // Non-standard trailing NUL terminator preserved from the reference
                // implementation (SPEC_FULL.md §9) so text payloads double as C strings.
                read_buf.write(&[0u8]);
            }
            read_buf.block_end();
            Ok(ConsumeOutcome::Continue)
        } else {
            // More continuation frames still to come; leave the block open.
            Ok(ConsumeOutcome::Continue)
        }
    }
}

/// Drains `write_buf` into `out`, framing each buffered message (and fragmenting it if
/// it doesn't fit in the space available), until either `out` or `write_buf` runs dry.
/// Returns the number of bytes written.
///
/// A return of `0` with messages still queued means `out` isn't even large enough for
/// one frame header; the caller should grow its send buffer and call again.
pub fn fill_outgoing(
    write_buf: &mut MessageBuffer,
    out: &mut [u8],
    role: Role,
    max_frame_payload: usize,
    write_signal: &Semaphore,
) -> usize {
    let mut written = 0usize;

    loop {
        let Some((opcode, remaining_len)) = write_buf.peek() else {
            break;
        };

        let space = out.len() - written;
        if space <= MAX_HEADER_LEN {
            break;
        }

        let to_send = (space - MAX_HEADER_LEN).min(max_frame_payload).min(remaining_len);
        if to_send == 0 && remaining_len > 0 {
            break;
        }

        let fin = to_send == remaining_len;
        let masked = role.masks_outgoing();
        let masking_key = masked.then(random_mask);
        let header = FrameHeader {
            fin,
            opcode,
            masked,
            payload_length: to_send as u64,
            masking_key,
        };

        let header_len = match frame::write_frame_header(&mut out[written..], &header) {
            WrittenHeader::Complete { consumed } => consumed,
            WrittenHeader::NeedMore => break,
        };
        written += header_len;

        let copied = write_buf.read(&mut out[written..written + to_send]);
        debug_assert_eq!(copied, to_send);
        if let Some(key) = masking_key {
            frame::mask_cycle(&mut out[written..written + to_send], &key);
        }
        written += to_send;

        if fin {
            write_signal.consume();
        }
    }

    written
}

fn random_mask() -> [u8; 4] {
    use rand::Rng;
    let mut key = [0u8; 4];
    rand::thread_rng().fill(&mut key);
    key
}
