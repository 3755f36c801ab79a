//! Message reassembly from chunked fragment reads.
//!
//! A transport delivers a logical message as one or more *fragments*.  Each
//! read fills (part of) a fixed-size scratch buffer and reports how many bytes
//! it wrote and whether this was the last fragment of the current message.
//! [`MessageReassembler`] appends exactly the bytes that were read, in arrival
//! order, until a final fragment is seen, then hands the whole message out and
//! starts over with an empty buffer.
//!
//! ```text
//! read → [He]   end=false   buffer: "He"
//! read → [llo]  end=true    buffer: "Hello" → emitted, buffer: ""
//! ```

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::MessageKind;

/// Errors raised while receiving a message.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ReceiveError {
    /// The underlying connection failed (reset, protocol violation, I/O).
    #[error("transport error: {0}")]
    Transport(String),

    /// The peer kept sending fragments past the configured limit.
    #[error("message exceeds the {limit}-byte limit")]
    MessageTooLarge { limit: usize },
}

/// Outcome of a single fragment read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FragmentRead {
    /// Number of bytes written to the front of the caller's buffer.
    pub count: usize,
    /// Transport type of the message this fragment belongs to.
    pub kind: MessageKind,
    /// `true` if this fragment completes the current logical message.
    pub end_of_message: bool,
}

/// A transport that yields message fragments.
///
/// Implementations copy at most `buf.len()` bytes into `buf` per call.  A
/// close signal from the remote side is reported as a final fragment of kind
/// [`MessageKind::Close`].
#[async_trait]
pub trait FragmentSource: Send {
    /// Waits for the next fragment and copies its bytes into `buf`.
    async fn read_fragment(&mut self, buf: &mut [u8]) -> Result<FragmentRead, ReceiveError>;
}

/// One fully reassembled message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompleteMessage {
    pub kind: MessageKind,
    pub payload: Vec<u8>,
}

/// Per-connection accumulator for in-flight message bytes.
#[derive(Debug)]
pub struct MessageReassembler {
    scratch: Vec<u8>,
    buffer: Vec<u8>,
    max_message_size: usize,
}

impl MessageReassembler {
    /// Creates a reassembler reading through a `scratch_size`-byte buffer and
    /// refusing messages larger than `max_message_size`.
    pub fn new(scratch_size: usize, max_message_size: usize) -> Self {
        Self {
            scratch: vec![0; scratch_size.max(1)],
            buffer: Vec::new(),
            max_message_size,
        }
    }

    /// Number of bytes of the current, incomplete message held so far.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Reads fragments from `source` until one message is complete.
    ///
    /// The returned payload is the exact in-order concatenation of every
    /// fragment read for that message.  On return, whether `Ok` or `Err`, the
    /// in-flight buffer is empty.
    ///
    /// # Errors
    ///
    /// Propagates [`ReceiveError::Transport`] from the source and returns
    /// [`ReceiveError::MessageTooLarge`] once the buffered bytes would pass
    /// the configured limit.
    pub async fn next_message<S>(&mut self, source: &mut S) -> Result<CompleteMessage, ReceiveError>
    where
        S: FragmentSource + ?Sized,
    {
        loop {
            let read = match source.read_fragment(&mut self.scratch).await {
                Ok(read) => read,
                Err(e) => {
                    self.buffer.clear();
                    return Err(e);
                }
            };

            // Only the bytes actually read, never the whole scratch buffer.
            let count = read.count.min(self.scratch.len());
            if self.buffer.len() + count > self.max_message_size {
                self.buffer.clear();
                return Err(ReceiveError::MessageTooLarge {
                    limit: self.max_message_size,
                });
            }
            self.buffer.extend_from_slice(&self.scratch[..count]);

            if read.end_of_message {
                return Ok(CompleteMessage {
                    kind: read.kind,
                    payload: std::mem::take(&mut self.buffer),
                });
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
