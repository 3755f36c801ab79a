//! The live peer object and its send path.
//!
//! A [`Peer`] owns the write half of one connection through a
//! [`MessageSink`].  The sink sits behind an async mutex, so any number of
//! tasks may call [`Peer::send`] concurrently: writes are serialized per peer
//! and a frame is never interleaved with another.
//!
//! Every write is bounded by the peer's send timeout, lock wait included,
//! and [`Peer::close`] is bounded by its grace period the same way.  A peer
//! whose socket has stopped draining can therefore delay a sender by at most
//! that long, never indefinitely.

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::domain::{MessageKind, PeerId, PeerState, DEFAULT_SEND_TIMEOUT};

/// Errors returned from the send path.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SendError {
    /// The peer is closing or closed.
    #[error("peer connection is closed")]
    Closed,

    /// A text message was requested for bytes that are not valid UTF-8.
    #[error("text payload is not valid UTF-8")]
    InvalidUtf8,

    /// Close is a control signal, not a message; use [`Peer::close`].
    #[error("cannot send a {0:?} frame as a message")]
    NotData(MessageKind),

    /// The transport rejected the write.
    #[error("transport error: {0}")]
    Transport(String),

    /// The write did not complete within the peer's send timeout.  The
    /// connection may hold a partly written frame and should be closed.
    #[error("send timed out after {0:?}")]
    TimedOut(Duration),

    /// The close handshake did not finish in time.
    #[error("close handshake timed out after {0:?}")]
    CloseTimedOut(Duration),
}

/// Write half of a connection.
///
/// Each call to [`MessageSink::send_message`] writes one complete logical
/// message (a single frame marked final).
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MessageSink: Send {
    /// Writes `payload` as one complete message of the given kind.
    async fn send_message(&mut self, kind: MessageKind, payload: Vec<u8>) -> Result<(), SendError>;

    /// Starts the close handshake and flushes the transport.
    async fn close(&mut self) -> Result<(), SendError>;
}

/// One connected remote endpoint.
pub struct Peer {
    id: PeerId,
    remote_addr: SocketAddr,
    connected_at: Instant,
    state: AtomicU8,
    send_timeout: Duration,
    /// Cancelled as soon as any task starts closing the peer.
    closed: CancellationToken,
    sink: Mutex<Option<Box<dyn MessageSink>>>,
}

impl Peer {
    /// Creates an open peer that writes through `sink`.
    pub fn new(id: PeerId, remote_addr: SocketAddr, sink: Box<dyn MessageSink>) -> Self {
        Self {
            id,
            remote_addr,
            connected_at: Instant::now(),
            state: AtomicU8::new(PeerState::Open as u8),
            send_timeout: DEFAULT_SEND_TIMEOUT,
            closed: CancellationToken::new(),
            sink: Mutex::new(Some(sink)),
        }
    }

    /// Replaces the default bound on a single write.
    pub fn with_send_timeout(mut self, send_timeout: Duration) -> Self {
        self.send_timeout = send_timeout;
        self
    }

    pub fn id(&self) -> PeerId {
        self.id
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    pub fn send_timeout(&self) -> Duration {
        self.send_timeout
    }

    /// Time elapsed since the handshake completed.
    pub fn connected_for(&self) -> Duration {
        self.connected_at.elapsed()
    }

    pub fn state(&self) -> PeerState {
        PeerState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_open(&self) -> bool {
        self.state() == PeerState::Open
    }

    /// Resolves once [`Peer::close`] has been called, from any task.
    ///
    /// The session loop waits on this so that a peer closed elsewhere (by a
    /// handler, or by a broadcast that gave up on it) stops receiving too.
    pub async fn closed(&self) {
        self.closed.cancelled().await;
    }

    /// Sends `payload` as one complete text message.
    ///
    /// # Errors
    ///
    /// [`SendError::InvalidUtf8`] if the bytes are not UTF-8,
    /// [`SendError::Closed`] if the peer is no longer open,
    /// [`SendError::TimedOut`] if the write exceeds the send timeout, or
    /// [`SendError::Transport`] if the write fails.
    pub async fn send(&self, payload: &[u8]) -> Result<(), SendError> {
        self.send_message(MessageKind::Text, payload).await
    }

    /// Sends `payload` as one complete binary message.
    ///
    /// # Errors
    ///
    /// Same as [`Peer::send`], minus the UTF-8 check.
    pub async fn send_binary(&self, payload: &[u8]) -> Result<(), SendError> {
        self.send_message(MessageKind::Binary, payload).await
    }

    /// Sends `payload` as one complete message of `kind`.
    ///
    /// # Errors
    ///
    /// See [`Peer::send`].  `kind` must be a data kind.
    pub async fn send_message(&self, kind: MessageKind, payload: &[u8]) -> Result<(), SendError> {
        if !kind.is_data() {
            return Err(SendError::NotData(kind));
        }
        if kind == MessageKind::Text && std::str::from_utf8(payload).is_err() {
            return Err(SendError::InvalidUtf8);
        }
        if !self.is_open() {
            return Err(SendError::Closed);
        }

        let write = async {
            let mut guard = self.sink.lock().await;
            // Re-check under the lock: `close` may have run while we waited.
            if !self.is_open() {
                return Err(SendError::Closed);
            }
            let sink = guard.as_mut().ok_or(SendError::Closed)?;
            sink.send_message(kind, payload.to_vec()).await
        };

        match timeout(self.send_timeout, write).await {
            Ok(result) => result,
            Err(_) => Err(SendError::TimedOut(self.send_timeout)),
        }
    }

    /// Performs a graceful close and releases the write half.
    ///
    /// The peer leaves `Open` before anything is awaited, so sends issued
    /// after this call fail fast.  Waiting for an in-flight send to release
    /// the sink and the close handshake itself share one `grace` budget.
    /// The peer always ends up `Closed`.
    ///
    /// Idempotent: closing an already-closed peer returns `Ok(())`.
    ///
    /// # Errors
    ///
    /// Returns the transport error or [`SendError::CloseTimedOut`]; callers
    /// tearing a connection down are free to ignore it.
    pub async fn close(&self, grace: Duration) -> Result<(), SendError> {
        let _ = self.state.compare_exchange(
            PeerState::Open as u8,
            PeerState::Closing as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        self.closed.cancel();

        let handshake = async {
            let sink = self.sink.lock().await.take();
            match sink {
                Some(mut sink) => sink.close().await,
                None => Ok(()),
            }
        };

        let result = match timeout(grace, handshake).await {
            Ok(result) => result,
            Err(_) => Err(SendError::CloseTimedOut(grace)),
        };

        self.state.store(PeerState::Closed as u8, Ordering::Release);
        result
    }
}

impl fmt::Debug for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Peer")
            .field("id", &self.id)
            .field("remote_addr", &self.remote_addr)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
