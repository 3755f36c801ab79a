//! Message dispatch: fan-out of completed messages to subscribers.
//!
//! Consumers implement [`MessageHandler`] and are injected into a
//! [`Dispatcher`] before the server starts.  Every worker calls the same
//! dispatcher, once per completed message, in the order messages completed on
//! that connection.
//!
//! Handlers are isolated from the worker: an `Err` from a handler is logged
//! and a panic is caught, so neither can unwind into the worker's teardown
//! path or leave the registry half-updated.
//!
//! [`EventChannel`] is the queue form of the same contract: it forwards every
//! event into a bounded `mpsc` channel that external logic drains.

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;
use futures_util::FutureExt;
use tokio::sync::mpsc;
use tracing::{error, warn};

use crate::application::peer::Peer;
use crate::domain::{DisconnectReason, MessageKind, PeerId};

/// A completed message together with the peer that sent it.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub sender: Arc<Peer>,
    pub kind: MessageKind,
    pub payload: Vec<u8>,
}

impl InboundMessage {
    pub fn sender_id(&self) -> PeerId {
        self.sender.id()
    }

    /// The payload as text, if it is valid UTF-8.
    pub fn as_text(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }
}

/// Subscriber to completed messages and peer lifecycle events.
///
/// Only `on_message` is required; the lifecycle hooks default to no-ops.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn on_message(&self, message: &InboundMessage) -> anyhow::Result<()>;

    async fn on_peer_connected(&self, _peer: &Arc<Peer>) -> anyhow::Result<()> {
        Ok(())
    }

    async fn on_peer_disconnected(
        &self,
        _peer: &Arc<Peer>,
        _reason: &DisconnectReason,
    ) -> anyhow::Result<()> {
        Ok(())
    }
}

/// How many handlers accepted an event.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchReport {
    pub delivered: usize,
    pub failed: usize,
}

/// Ordered list of injected handlers.
#[derive(Default, Clone)]
pub struct Dispatcher {
    handlers: Vec<Arc<dyn MessageHandler>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style registration.
    pub fn with_handler<H>(mut self, handler: H) -> Self
    where
        H: MessageHandler + 'static,
    {
        self.handlers.push(Arc::new(handler));
        self
    }

    /// Registers a shared handler.  Handlers run in registration order.
    pub fn subscribe(&mut self, handler: Arc<dyn MessageHandler>) {
        self.handlers.push(handler);
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }

    /// Hands `message` to every handler in turn.
    pub async fn dispatch_message(&self, message: &InboundMessage) -> DispatchReport {
        let mut report = DispatchReport::default();
        for handler in &self.handlers {
            let ok = invoke("message", message.sender_id(), handler.on_message(message)).await;
            report.record(ok);
        }
        report
    }

    /// Announces a newly registered peer.
    pub async fn peer_connected(&self, peer: &Arc<Peer>) -> DispatchReport {
        let mut report = DispatchReport::default();
        for handler in &self.handlers {
            let ok = invoke("connect", peer.id(), handler.on_peer_connected(peer)).await;
            report.record(ok);
        }
        report
    }

    /// Announces a peer that has been removed from the registry.
    pub async fn peer_disconnected(
        &self,
        peer: &Arc<Peer>,
        reason: &DisconnectReason,
    ) -> DispatchReport {
        let mut report = DispatchReport::default();
        for handler in &self.handlers {
            let ok = invoke(
                "disconnect",
                peer.id(),
                handler.on_peer_disconnected(peer, reason),
            )
            .await;
            report.record(ok);
        }
        report
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("handlers", &self.handlers.len())
            .finish()
    }
}

impl DispatchReport {
    fn record(&mut self, ok: bool) {
        if ok {
            self.delivered += 1;
        } else {
            self.failed += 1;
        }
    }
}

/// Runs one handler call, containing both errors and panics.
async fn invoke<F>(event: &'static str, peer: PeerId, call: F) -> bool
where
    F: Future<Output = anyhow::Result<()>>,
{
    match AssertUnwindSafe(call).catch_unwind().await {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            warn!("{event} handler failed for {peer}: {e:#}");
            false
        }
        Err(panic) => {
            error!(
                "{event} handler panicked for {peer}: {}",
                panic_message(panic.as_ref())
            );
            false
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}

// ── Channel form ──────────────────────────────────────────────────────────────

/// Everything a channel subscriber can observe.
#[derive(Debug, Clone)]
pub enum RelayEvent {
    Connected(Arc<Peer>),
    Message(InboundMessage),
    Disconnected {
        peer: Arc<Peer>,
        reason: DisconnectReason,
    },
}

/// Handler that forwards every event into a bounded channel.
///
/// When the channel is full the worker waits, which applies backpressure to
/// that one connection only.  A dropped receiver turns every event into a
/// handler error.
#[derive(Debug, Clone)]
pub struct EventChannel {
    tx: mpsc::Sender<RelayEvent>,
}

impl EventChannel {
    /// Creates the handler and the receiving end of its channel.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<RelayEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    async fn forward(&self, event: RelayEvent) -> anyhow::Result<()> {
        self.tx
            .send(event)
            .await
            .map_err(|_| anyhow!("event receiver dropped"))
    }
}

#[async_trait]
impl MessageHandler for EventChannel {
    async fn on_message(&self, message: &InboundMessage) -> anyhow::Result<()> {
        self.forward(RelayEvent::Message(message.clone())).await
    }

    async fn on_peer_connected(&self, peer: &Arc<Peer>) -> anyhow::Result<()> {
        self.forward(RelayEvent::Connected(Arc::clone(peer))).await
    }

    async fn on_peer_disconnected(
        &self,
        peer: &Arc<Peer>,
        reason: &DisconnectReason,
    ) -> anyhow::Result<()> {
        self.forward(RelayEvent::Disconnected {
            peer: Arc::clone(peer),
            reason: reason.clone(),
        })
        .await
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
