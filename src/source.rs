// source.rs - Byte-level input shared by the loader, the Forth VM and the C compiler

use std::collections::VecDeque;
use std::io::Read;

/// Maximum number of bytes that can be pushed back at once. The Forth word
/// scanner needs one slot; the C lexer needs two.
pub const PUSHBACK_SLOTS: usize = 2;

/// A pull-based byte source. Bytes come, in order, from the pushback slots,
/// then from the preload queue, then from the underlying reader (if any).
///
/// The preload queue is how Forth source gets fed ahead of stdin (the
/// extensions file, REPL lines) without a second stream.
pub struct Source {
    reader: Option<Box<dyn Read>>,
    queue: VecDeque<u8>,
    pushback: [u8; PUSHBACK_SLOTS],
    pushed: usize,
}

impl Source {
    /// A source backed by a reader (normally stdin).
    pub fn from_reader(reader: Box<dyn Read>) -> Self {
        Source {
            reader: Some(reader),
            queue: VecDeque::new(),
            pushback: [0; PUSHBACK_SLOTS],
            pushed: 0,
        }
    }

    /// A source over a fixed byte string.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut src = Source::empty();
        src.push_bytes(bytes);
        src
    }

    /// A source with no backing reader; bytes arrive via `push_bytes`.
    pub fn empty() -> Self {
        Source {
            reader: None,
            queue: VecDeque::new(),
            pushback: [0; PUSHBACK_SLOTS],
            pushed: 0,
        }
    }

    /// Append bytes to the preload queue. Queued bytes are consumed before
    /// anything is read from the underlying reader.
    pub fn push_bytes(&mut self, bytes: &[u8]) {
        self.queue.extend(bytes.iter().copied());
    }

    /// Next byte, or None at end of input.
    pub fn read_byte(&mut self) -> Option<u8> {
        if self.pushed > 0 {
            self.pushed -= 1;
            return Some(self.pushback[self.pushed]);
        }
        if let Some(b) = self.queue.pop_front() {
            return Some(b);
        }
        if let Some(reader) = self.reader.as_mut() {
            let mut buf = [0u8; 1];
            match reader.read(&mut buf) {
                Ok(1) => return Some(buf[0]),
                _ => return None,
            }
        }
        None
    }

    /// Push a byte back so the next `read_byte` returns it again.
    pub fn unread(&mut self, byte: u8) {
        assert!(self.pushed < PUSHBACK_SLOTS, "pushback slots exhausted");
        self.pushback[self.pushed] = byte;
        self.pushed += 1;
    }
}
