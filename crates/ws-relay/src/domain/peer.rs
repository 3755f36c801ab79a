//! Peer identity, lifecycle state, and message classification.
//!
//! These are plain value types shared by every layer.  The live `Peer` object
//! (which owns the write half of a connection) lives in the application layer;
//! this module only describes *who* a peer is and *what state* it is in.

use std::fmt;

/// Identity of one connected peer.
///
/// Identities are allocated by the peer registry from a monotonically
/// increasing counter starting at 1, so two peers accepted during the same
/// process run never share an id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(u64);

impl PeerId {
    /// Wraps a raw id value.
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw numeric id.
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "peer-{}", self.0)
    }
}

/// Lifecycle state of a peer connection.
///
/// ```text
/// Open ──► Closing ──► Closed
/// ```
///
/// A peer only moves forward through these states; it never re-opens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PeerState {
    /// Handshake complete; messages may be sent and received.
    Open = 0,
    /// A close handshake is in progress; sends are refused.
    Closing = 1,
    /// The transport handle has been released.
    Closed = 2,
}

impl PeerState {
    /// Decodes the `u8` representation stored in an atomic.
    ///
    /// Unknown values decode as `Closed`; the state only ever holds values
    /// written through `as u8` on this enum.
    pub fn from_u8(raw: u8) -> Self {
        match raw {
            0 => PeerState::Open,
            1 => PeerState::Closing,
            _ => PeerState::Closed,
        }
    }
}

/// Transport-level type of one complete logical message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// UTF-8 text frame(s).
    Text,
    /// Binary frame(s).
    Binary,
    /// Close control frame: the remote side is ending the session.
    Close,
}

impl MessageKind {
    /// Returns `true` for the kinds that carry application data and are
    /// therefore handed to dispatch.
    pub fn is_data(self) -> bool {
        matches!(self, MessageKind::Text | MessageKind::Binary)
    }
}

/// Why a peer's session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The remote side sent a close frame or the stream ended cleanly.
    Closed,
    /// A read failed or the peer violated a limit.
    Error(String),
    /// The server is shutting down.
    Shutdown,
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisconnectReason::Closed => f.write_str("closed by peer"),
            DisconnectReason::Error(e) => write!(f, "error: {e}"),
            DisconnectReason::Shutdown => f.write_str("server shutdown"),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
