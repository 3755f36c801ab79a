//! PeerRegistry: the set of currently connected peers.
//!
//! The registry is the only state shared by the accept loop and every
//! connection worker.  The accept loop inserts a peer right after its
//! handshake; the worker removes it when its receive loop exits.  Membership
//! therefore mirrors exactly the set of running receive loops.
//!
//! # Identity allocation
//!
//! Ids come from an `AtomicU64` counter starting at 1.  Allocation is
//! lock-free and never hands out the same id twice during a process run, so
//! an id-keyed insert can only collide through a logic error.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures_util::future::join_all;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::application::peer::{Peer, SendError};
use crate::domain::{MessageKind, PeerId};

/// Errors returned by registry operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// An id was inserted twice.  This is a programming error, not a
    /// client-facing condition.
    #[error("{0} is already registered")]
    DuplicatePeer(PeerId),

    #[error("{0} is not registered")]
    PeerNotFound(PeerId),

    #[error("send to {peer} failed: {source}")]
    Send {
        peer: PeerId,
        #[source]
        source: SendError,
    },
}

/// Outcome of [`PeerRegistry::broadcast`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Peers the message was written to.
    pub sent: usize,
    /// Peers whose send failed, with the reason.
    pub failed: Vec<(PeerId, SendError)>,
}

/// Concurrency-safe map from [`PeerId`] to live [`Peer`].
#[derive(Debug)]
pub struct PeerRegistry {
    peers: RwLock<HashMap<PeerId, Arc<Peer>>>,
    next_id: AtomicU64,
}

impl Default for PeerRegistry {
    fn default() -> Self {
        Self {
            peers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hands out a fresh, never-before-used peer id.
    pub fn allocate_id(&self) -> PeerId {
        PeerId::new(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Registers `peer` under its id.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::DuplicatePeer`] and leaves the existing entry
    /// untouched if the id is already present.
    pub async fn insert(&self, peer: Arc<Peer>) -> Result<(), RegistryError> {
        let mut peers = self.peers.write().await;
        match peers.entry(peer.id()) {
            Entry::Occupied(_) => Err(RegistryError::DuplicatePeer(peer.id())),
            Entry::Vacant(slot) => {
                slot.insert(peer);
                Ok(())
            }
        }
    }

    /// Removes a peer.  Removing an absent id is a no-op returning `None`.
    pub async fn remove(&self, id: PeerId) -> Option<Arc<Peer>> {
        let removed = self.peers.write().await.remove(&id);
        if removed.is_none() {
            debug!("{id} was not registered at removal");
        }
        removed
    }

    pub async fn get(&self, id: PeerId) -> Option<Arc<Peer>> {
        self.peers.read().await.get(&id).cloned()
    }

    pub async fn contains(&self, id: PeerId) -> bool {
        self.peers.read().await.contains_key(&id)
    }

    pub async fn len(&self) -> usize {
        self.peers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.peers.read().await.is_empty()
    }

    /// Ids of every registered peer, ascending.
    pub async fn ids(&self) -> Vec<PeerId> {
        let mut ids: Vec<PeerId> = self.peers.read().await.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Handles to every registered peer, ordered by id.
    pub async fn snapshot(&self) -> Vec<Arc<Peer>> {
        let mut peers: Vec<Arc<Peer>> = self.peers.read().await.values().cloned().collect();
        peers.sort_unstable_by_key(|p| p.id());
        peers
    }

    /// Sends a text message to one peer.
    ///
    /// # Errors
    ///
    /// [`RegistryError::PeerNotFound`] if no such peer is registered, or
    /// [`RegistryError::Send`] if the peer's send fails.
    pub async fn send_to(&self, id: PeerId, payload: &[u8]) -> Result<(), RegistryError> {
        let peer = self
            .get(id)
            .await
            .ok_or(RegistryError::PeerNotFound(id))?;
        peer.send(payload)
            .await
            .map_err(|source| RegistryError::Send { peer: id, source })
    }

    /// Sends one message to every registered peer except `except`.
    ///
    /// Iterates over a snapshot, so the registry lock is not held while
    /// writing and a slow peer cannot block inserts or removals.  The writes
    /// run concurrently: the call takes as long as the slowest peer, which
    /// is bounded by its send timeout.  A failed send is recorded in the
    /// report and does not stop the broadcast.
    ///
    /// A peer whose send times out has stopped draining its socket.  It is
    /// closed here, which also ends its session.
    pub async fn broadcast(
        &self,
        kind: MessageKind,
        payload: &[u8],
        except: Option<PeerId>,
    ) -> BroadcastReport {
        let sends = self
            .snapshot()
            .await
            .into_iter()
            .filter(|peer| Some(peer.id()) != except)
            .map(|peer| async move {
                let result = peer.send_message(kind, payload).await;
                if let Err(SendError::TimedOut(after)) = &result {
                    warn!(
                        "{} did not accept a message within {after:?}; disconnecting it",
                        peer.id()
                    );
                    if let Err(e) = peer.close(peer.send_timeout()).await {
                        debug!("{}: close after send timeout: {e}", peer.id());
                    }
                }
                (peer.id(), result)
            });

        let mut report = BroadcastReport::default();
        for (id, result) in join_all(sends).await {
            match result {
                Ok(()) => report.sent += 1,
                Err(e) => report.failed.push((id, e)),
            }
        }
        report
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
