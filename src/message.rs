//! Ordered queue of logical message blocks laid out over a single growable byte arena.
//!
//! A [`MessageBuffer`] backs both the read side (frames reassembled into messages for
//! the application to `pop`) and the write side (messages chunked into frames for the
//! wire) of a [`crate::client::Client`]. It is not thread-safe on its own — callers
//! serialize access through [`crate::sync::SpinLock`].

use std::collections::VecDeque;

use crate::frame::Opcode;

/// One logical message (or, mid-assembly, one fragment of one) living in a
/// [`MessageBuffer`]'s arena.
#[derive(Debug, Clone, Copy)]
pub struct MessageBlock {
    pub opcode: Opcode,
    pub offset: usize,
    pub length: usize,
    pub completed: bool,
}

/// A FIFO sequence of [`MessageBlock`]s over a shared byte arena.
///
/// Invariants maintained by every method below:
/// - block offsets are monotonically non-decreasing;
/// - `[offset, offset + length)` always lies within the arena;
/// - at most the last block is incomplete.
#[derive(Default)]
pub struct MessageBuffer {
    arena: Vec<u8>,
    blocks: VecDeque<MessageBlock>,
}

impl MessageBuffer {
    pub fn new() -> Self {
        Self {
            arena: Vec::new(),
            blocks: VecDeque::new(),
        }
    }

    /// Opens a new incomplete block at the current end of the arena.
    ///
    /// Panics if a block is already open; callers must `block_end` (or `block_remove`)
    /// before starting another — this mirrors the single-fragmented-message-in-flight
    /// rule the frame consumer in [`crate::wsio`] already enforces.
    pub fn block_begin(&mut self, opcode: Opcode) {
        assert!(
            self.blocks.back().map_or(true, |b| b.completed),
            "block_begin called while a block is still open"
        );
        let offset = self.arena.len();
        self.blocks.push_back(MessageBlock {
            opcode,
            offset,
            length: 0,
            completed: false,
        });
    }

    /// Appends `bytes` to the arena and extends the open block. No-op on an empty slice.
    pub fn write(&mut self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        self.arena.extend_from_slice(bytes);
        let block = self
            .blocks
            .back_mut()
            .expect("write called with no open block");
        block.length += bytes.len();
    }

    /// Marks the currently open block as completed and visible to `peek`/`read`.
    pub fn block_end(&mut self) {
        let block = self
            .blocks
            .back_mut()
            .expect("block_end called with no open block");
        block.completed = true;
    }

    /// Drops the most recently opened block and truncates the arena back to where it
    /// began. Used to discard a message the application decided not to keep.
    pub fn block_remove(&mut self) {
        let block = self
            .blocks
            .pop_back()
            .expect("block_remove called with no block");
        self.arena.truncate(block.offset);
    }

    /// Returns the head block's opcode and remaining length, iff the head block is
    /// completed. An incomplete head means the logical message isn't done arriving yet.
    pub fn peek(&self) -> Option<(Opcode, usize)> {
        let front = self.blocks.front()?;
        front.completed.then_some((front.opcode, front.length))
    }

    /// Copies up to `dst.len()` bytes out of the head completed block, compacting the
    /// arena from the front and sliding every remaining block's offset down by the same
    /// amount. Returns the number of bytes copied (0 if the head block isn't completed,
    /// or there is none).
    ///
    /// A completed, fully-drained head block is popped even when that takes zero bytes
    /// (an empty message) — `to_copy == front_length` covers the `front_length == 0`
    /// case, so an empty completed message is retired on the first call regardless of
    /// `dst`'s length.
    ///
    /// A partial drain rewrites the head block's opcode to [`Opcode::Continuation`] so a
    /// later full drain is presented to the caller as a continuation of the same
    /// logical message, per the spec's `pop` semantics.
    pub fn read(&mut self, dst: &mut [u8]) -> usize {
        let front_length = match self.blocks.front() {
            Some(block) if block.completed => block.length,
            _ => return 0,
        };

        let to_copy = dst.len().min(front_length);
        if to_copy > 0 {
            dst[..to_copy].copy_from_slice(&self.arena[..to_copy]);
            self.arena.drain(0..to_copy);
            for block in self.blocks.iter_mut().skip(1) {
                block.offset -= to_copy;
            }
        }

        let front = self.blocks.front_mut().expect("checked above");
        if to_copy == front_length {
            self.blocks.pop_front();
        } else if to_copy > 0 {
            front.length -= to_copy;
            front.opcode = Opcode::Continuation;
        }

        to_copy
    }

    /// The opcode of the currently open (incomplete) block, if any. Used by the frame
    /// consumer to resolve a `Continuation` frame back to the logical message it
    /// extends.
    pub fn open_opcode(&self) -> Option<Opcode> {
        self.blocks.back().filter(|b| !b.completed).map(|b| b.opcode)
    }

    /// XORs the last `len` bytes of the arena in place against `key`, with the cycle
    /// starting at `key[start % 4]`. Used by the frame consumer to unmask a payload
    /// chunk immediately after appending it, where `start` is that chunk's offset
    /// within the whole (possibly multi-read) frame payload.
    pub fn mask_tail(&mut self, len: usize, key: &[u8; 4], start: usize) {
        let arena_len = self.arena.len();
        crate::frame::mask_cycle_from(&mut self.arena[arena_len - len..], key, start);
    }

    #[cfg(test)]
    fn check_invariants(&self) {
        let mut prev_offset = 0usize;
        for (i, block) in self.blocks.iter().enumerate() {
            assert!(block.offset >= prev_offset);
            assert!(block.offset + block.length <= self.arena.len());
            if i + 1 < self.blocks.len() {
                assert!(block.completed, "only the last block may be incomplete");
            }
            prev_offset = block.offset;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_read_single_message() {
        let mut buf = MessageBuffer::new();
        buf.block_begin(Opcode::Text);
        buf.write(b"hello");
        buf.block_end();
        buf.check_invariants();

        assert_eq!(buf.peek(), Some((Opcode::Text, 5)));
        let mut out = [0u8; 5];
        assert_eq!(buf.read(&mut out), 5);
        assert_eq!(&out, b"hello");
        assert_eq!(buf.peek(), None);
    }

    #[test]
    fn partial_drain_becomes_continuation() {
        let mut buf = MessageBuffer::new();
        buf.block_begin(Opcode::Binary);
        buf.write(b"0123456789");
        buf.block_end();

        let mut out = [0u8; 4];
        assert_eq!(buf.read(&mut out), 4);
        assert_eq!(&out, b"0123");
        assert_eq!(buf.peek(), Some((Opcode::Continuation, 6)));

        let mut out2 = [0u8; 6];
        assert_eq!(buf.read(&mut out2), 6);
        assert_eq!(&out2, b"456789");
        assert_eq!(buf.peek(), None);
    }

    #[test]
    fn incomplete_head_blocks_read_and_peek() {
        let mut buf = MessageBuffer::new();
        buf.block_begin(Opcode::Text);
        buf.write(b"partial");
        buf.check_invariants();

        assert_eq!(buf.peek(), None);
        let mut out = [0u8; 16];
        assert_eq!(buf.read(&mut out), 0);
    }

    #[test]
    fn multiple_messages_preserve_order_and_offsets() {
        let mut buf = MessageBuffer::new();
        buf.block_begin(Opcode::Text);
        buf.write(b"AAA");
        buf.block_end();
        buf.block_begin(Opcode::Binary);
        buf.write(b"BBBBB");
        buf.block_end();
        buf.check_invariants();

        let mut out = [0u8; 3];
        assert_eq!(buf.read(&mut out), 3);
        assert_eq!(&out, b"AAA");
        buf.check_invariants();

        assert_eq!(buf.peek(), Some((Opcode::Binary, 5)));
        let mut out2 = [0u8; 5];
        assert_eq!(buf.read(&mut out2), 5);
        assert_eq!(&out2, b"BBBBB");
    }

    #[test]
    fn block_remove_discards_uncommitted_message() {
        let mut buf = MessageBuffer::new();
        buf.block_begin(Opcode::Text);
        buf.write(b"keep");
        buf.block_end();

        buf.block_begin(Opcode::Binary);
        buf.write(b"scratch");
        buf.block_remove();
        buf.check_invariants();

        assert_eq!(buf.peek(), Some((Opcode::Text, 4)));
    }

    #[test]
    fn zero_length_write_is_noop() {
        let mut buf = MessageBuffer::new();
        buf.block_begin(Opcode::Binary);
        buf.write(b"");
        buf.block_end();
        assert_eq!(buf.peek(), Some((Opcode::Binary, 0)));
    }

    #[test]
    fn empty_completed_message_is_popped_by_read() {
        let mut buf = MessageBuffer::new();
        buf.block_begin(Opcode::Text);
        buf.block_end();
        buf.block_begin(Opcode::Binary);
        buf.write(b"next");
        buf.block_end();

        assert_eq!(buf.read(&mut []), 0);
        assert_eq!(buf.peek(), Some((Opcode::Binary, 4)));
    }

    #[test]
    fn open_opcode_reports_incomplete_block() {
        let mut buf = MessageBuffer::new();
        assert_eq!(buf.open_opcode(), None);
        buf.block_begin(Opcode::Text);
        assert_eq!(buf.open_opcode(), Some(Opcode::Text));
        buf.block_end();
        assert_eq!(buf.open_opcode(), None);
    }
}
