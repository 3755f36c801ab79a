//! Ready-made message handlers used by the `ws-relay` binary.
//!
//! The relay does not interpret payloads.  These handlers give the binary a
//! useful default behaviour; embedders register their own instead.

use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use tracing::{debug, info};

use crate::application::dispatch::{InboundMessage, MessageHandler};
use crate::application::peer::Peer;
use crate::application::registry::PeerRegistry;
use crate::domain::DisconnectReason;

/// Logs connections and message sizes.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogHandler;

#[async_trait]
impl MessageHandler for LogHandler {
    async fn on_message(&self, message: &InboundMessage) -> anyhow::Result<()> {
        debug!(
            "{} sent {:?} message ({} bytes)",
            message.sender_id(),
            message.kind,
            message.payload.len()
        );
        Ok(())
    }

    async fn on_peer_connected(&self, peer: &Arc<Peer>) -> anyhow::Result<()> {
        info!("{} connected from {}", peer.id(), peer.remote_addr());
        Ok(())
    }

    async fn on_peer_disconnected(
        &self,
        peer: &Arc<Peer>,
        reason: &DisconnectReason,
    ) -> anyhow::Result<()> {
        info!("{} disconnected ({reason})", peer.id());
        Ok(())
    }
}

/// Sends every message back to its sender, same kind, same bytes.
#[derive(Debug, Default, Clone, Copy)]
pub struct EchoHandler;

#[async_trait]
impl MessageHandler for EchoHandler {
    async fn on_message(&self, message: &InboundMessage) -> anyhow::Result<()> {
        message
            .sender
            .send_message(message.kind, &message.payload)
            .await
            .with_context(|| format!("echo to {} failed", message.sender_id()))
    }
}

/// Republishes every message to all other registered peers.
#[derive(Debug, Clone)]
pub struct BroadcastHandler {
    registry: Arc<PeerRegistry>,
}

impl BroadcastHandler {
    pub fn new(registry: Arc<PeerRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl MessageHandler for BroadcastHandler {
    async fn on_message(&self, message: &InboundMessage) -> anyhow::Result<()> {
        let report = self
            .registry
            .broadcast(message.kind, &message.payload, Some(message.sender_id()))
            .await;
        for (peer, e) in &report.failed {
            debug!("broadcast from {} to {peer} failed: {e}", message.sender_id());
        }
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
