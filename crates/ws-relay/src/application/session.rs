//! Per-connection worker: receive loop and teardown.
//!
//! [`run_session`] owns one registered peer for the rest of its life:
//!
//! ```text
//! connected ──► read fragments ──► message complete ──► dispatch ──┐
//!                    ▲                                             │
//!                    └─────────────────────────────────────────────┘
//!    close frame / read error / shutdown / peer closed elsewhere
//!          │
//!          ▼
//! close handshake (best effort) ─► release transport ─► remove from registry
//!                                                   ─► disconnect event
//! ```
//!
//! Whatever ends the loop, the teardown steps always run and the function
//! never returns an error: a failing connection only affects itself.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::application::dispatch::{Dispatcher, InboundMessage};
use crate::application::peer::Peer;
use crate::application::reassembler::{FragmentSource, MessageReassembler};
use crate::application::registry::PeerRegistry;
use crate::domain::{DisconnectReason, RelayConfig};

/// Per-connection tunables, taken from [`RelayConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOptions {
    pub receive_buffer_size: usize,
    pub max_message_size: usize,
    pub close_timeout: Duration,
}

impl From<&RelayConfig> for SessionOptions {
    fn from(config: &RelayConfig) -> Self {
        Self {
            receive_buffer_size: config.receive_buffer_size,
            max_message_size: config.max_message_size,
            close_timeout: config.close_timeout,
        }
    }
}

/// Runs the receive loop for an already-registered `peer` until the
/// connection ends, then tears it down.
///
/// Returns the reason the session ended.
pub async fn run_session<S>(
    peer: Arc<Peer>,
    mut source: S,
    registry: &PeerRegistry,
    dispatcher: &Dispatcher,
    options: &SessionOptions,
    shutdown: &CancellationToken,
) -> DisconnectReason
where
    S: FragmentSource,
{
    let id = peer.id();
    dispatcher.peer_connected(&peer).await;

    let reason = tokio::select! {
        biased;
        _ = shutdown.cancelled() => DisconnectReason::Shutdown,
        // Closed by a handler or a broadcast that gave up on it; the read
        // side may be idle, so don't wait for the next frame.
        _ = peer.closed() => DisconnectReason::Closed,
        reason = receive_loop(&peer, &mut source, dispatcher, options) => reason,
    };

    match &reason {
        DisconnectReason::Closed => info!(
            "{id} ({}) closed after {:?}",
            peer.remote_addr(),
            peer.connected_for()
        ),
        DisconnectReason::Error(e) => warn!("{id} ({}) dropped: {e}", peer.remote_addr()),
        DisconnectReason::Shutdown => debug!("{id} closing for shutdown"),
    }

    if let Err(e) = peer.close(options.close_timeout).await {
        debug!("{id}: close handshake did not complete: {e}");
    }
    // Release the read half together with the write half.
    drop(source);

    registry.remove(id).await;
    dispatcher.peer_disconnected(&peer, &reason).await;
    reason
}

async fn receive_loop<S>(
    peer: &Arc<Peer>,
    source: &mut S,
    dispatcher: &Dispatcher,
    options: &SessionOptions,
) -> DisconnectReason
where
    S: FragmentSource,
{
    let mut reassembler =
        MessageReassembler::new(options.receive_buffer_size, options.max_message_size);

    while peer.is_open() {
        let message = match reassembler.next_message(source).await {
            Ok(message) => message,
            Err(e) => return DisconnectReason::Error(e.to_string()),
        };

        if !message.kind.is_data() {
            debug!("{}: close frame received", peer.id());
            return DisconnectReason::Closed;
        }

        debug!(
            "{}: {:?} message, {} bytes",
            peer.id(),
            message.kind,
            message.payload.len()
        );
        let inbound = InboundMessage {
            sender: Arc::clone(peer),
            kind: message.kind,
            payload: message.payload,
        };
        dispatcher.dispatch_message(&inbound).await;
    }

    // The peer was closed from elsewhere (e.g. a handler kicked it).
    DisconnectReason::Closed
}

// ── Tests ─────────────────────────────────────────────────────────────────────
