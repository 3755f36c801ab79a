//! WebSocket server: accept loop and per-connection task management.
//!
//! This module is responsible for:
//!
//! 1. Binding a TCP listener on the configured address.
//! 2. Accepting incoming TCP connections.
//! 3. Running the HTTP upgrade handshake for each connection.
//! 4. Registering the new peer and running its session loop.
//! 5. Shutting down when the cancellation token fires: the accept loop stops,
//!    every session is cancelled, and the server waits (up to
//!    `shutdown_grace`) for their teardown.
//!
//! # Scalability
//!
//! Each connection runs in its own Tokio task, handshake included, so a slow
//! or silent client never holds up the accept loop.  The loop accepts a
//! connection, hands it to a tracked task and goes straight back to
//! `accept()`.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::application::{run_session, Dispatcher, Peer, PeerRegistry, SessionOptions};
use crate::domain::RelayConfig;
use crate::infrastructure::handshake::accept_upgrade;
use crate::infrastructure::transport::split_stream;

// ── Public API ────────────────────────────────────────────────────────────────

/// A bound relay server, ready to [`run`](RelayServer::run).
pub struct RelayServer {
    listener: TcpListener,
    config: Arc<RelayConfig>,
    registry: Arc<PeerRegistry>,
    dispatcher: Arc<Dispatcher>,
}

impl RelayServer {
    /// Validates `config` and binds the listener on `config.bind_addr`.
    ///
    /// Binding to port `0` picks a free port; see [`local_addr`](Self::local_addr).
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the listener
    /// cannot be bound (port in use, missing permission).
    pub async fn bind(
        config: RelayConfig,
        registry: Arc<PeerRegistry>,
        dispatcher: Arc<Dispatcher>,
    ) -> anyhow::Result<Self> {
        config.validate().context("invalid relay configuration")?;

        let listener = TcpListener::bind(config.bind_addr)
            .await
            .with_context(|| {
                format!("failed to bind WebSocket listener on {}", config.bind_addr)
            })?;

        Ok(Self {
            listener,
            config: Arc::new(config),
            registry,
            dispatcher,
        })
    }

    /// The address the listener is actually bound to.
    ///
    /// # Errors
    ///
    /// Propagates the OS error from `getsockname`.
    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        self.listener
            .local_addr()
            .context("failed to read listener address")
    }

    pub fn registry(&self) -> &Arc<PeerRegistry> {
        &self.registry
    }

    /// Runs the accept loop until `shutdown` is cancelled.
    ///
    /// Accept errors are logged and the loop keeps going; only a failure to
    /// bind (in [`bind`](Self::bind)) is fatal.
    ///
    /// # Errors
    ///
    /// Currently always returns `Ok(())` once shutdown has completed.
    pub async fn run(self, shutdown: CancellationToken) -> anyhow::Result<()> {
        let Self {
            listener,
            config,
            registry,
            dispatcher,
        } = self;

        match listener.local_addr() {
            Ok(addr) => info!("WebSocket relay listening on ws://{addr}{}", config.path),
            Err(e) => warn!("WebSocket relay listening (address unavailable: {e})"),
        }

        // Every connection task is spawned through the tracker so shutdown
        // can wait for their teardown (registry removal, disconnect events)
        // instead of abandoning them mid-close.
        let tracker = TaskTracker::new();

        loop {
            // Race `accept()` against the shutdown token.  `biased` polls the
            // token first, so a pending shutdown wins over a connection that
            // happens to arrive at the same moment.
            let accepted = tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    info!("shutdown requested; stopping accept loop");
                    break;
                }
                accepted = listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, remote_addr)) => {
                    debug!("new connection from {remote_addr}");

                    // One task per connection, handshake included.  `spawn`
                    // returns immediately, so the loop is back in `accept()`
                    // before this client has sent a single byte.  Each task
                    // gets a child token: cancelling the server cancels all
                    // of them, but nothing a single connection does can
                    // cancel the server.
                    tracker.spawn(handle_connection(
                        stream,
                        remote_addr,
                        Arc::clone(&config),
                        Arc::clone(&registry),
                        Arc::clone(&dispatcher),
                        shutdown.child_token(),
                    ));
                }
                Err(e) => {
                    // Transient accept error (e.g. too many open file
                    // descriptors).  A failed accept belongs to no
                    // connection, so log it and keep serving the others.
                    error!("accept error: {e}");
                }
            }
        }

        // Stop accepting before draining the workers: closing the listener
        // makes new clients fail fast instead of queueing in the backlog.
        drop(listener);
        // `close` only marks the tracker as complete-able; tasks already
        // spawned keep running until they return.
        tracker.close();

        let live = tracker.len();
        if live > 0 {
            info!("waiting for {live} connection task(s) to finish");
        }
        // Each session has already seen the cancelled token and is tearing
        // down.  Bound the wait anyway: a peer stuck in its close handshake
        // must not keep the process alive.
        if timeout(config.shutdown_grace, tracker.wait()).await.is_err() {
            warn!(
                "{} connection task(s) still running after {:?}; abandoning them",
                tracker.len(),
                config.shutdown_grace
            );
        }

        info!("WebSocket relay stopped");
        Ok(())
    }
}

// ── Per-connection handler ────────────────────────────────────────────────────

/// Entry point of each per-connection task: handshake, registration, session.
async fn handle_connection(
    stream: TcpStream,
    remote_addr: SocketAddr,
    config: Arc<RelayConfig>,
    registry: Arc<PeerRegistry>,
    dispatcher: Arc<Dispatcher>,
    shutdown: CancellationToken,
) {
    // Messages are small and latency-sensitive; don't let Nagle's algorithm
    // hold them back waiting for more data.
    if let Err(e) = stream.set_nodelay(true) {
        debug!("{remote_addr}: failed to set TCP_NODELAY: {e}");
    }

    // The handshake has its own deadline inside `accept_upgrade`; the select
    // only makes sure shutdown doesn't wait for that deadline to expire.
    let upgraded = tokio::select! {
        biased;
        _ = shutdown.cancelled() => {
            debug!("{remote_addr}: shutdown during handshake");
            return;
        }
        upgraded = accept_upgrade(stream, &config) => upgraded,
    };

    let ws = match upgraded {
        Ok(ws) => ws,
        Err(e) => {
            // The rejection response has already been written.  The client
            // never became a peer, so there is nothing to unregister.
            warn!("{remote_addr}: handshake rejected: {e}");
            return;
        }
    };

    // From here on the connection is a peer.  The write half goes into the
    // `Peer` (shared with anyone who wants to send to it); the read half stays
    // with this task, which is the only reader.
    let (sink, source) = split_stream(ws);
    let id = registry.allocate_id();
    let peer = Arc::new(
        Peer::new(id, remote_addr, Box::new(sink)).with_send_timeout(config.send_timeout),
    );

    if let Err(e) = registry.insert(Arc::clone(&peer)).await {
        error!("{remote_addr}: could not register connection: {e}");
        let _ = peer.close(config.close_timeout).await;
        return;
    }
    debug!("{id} registered ({remote_addr})");

    // `run_session` owns the teardown: whatever ends the receive loop, it
    // closes the peer, removes it from the registry and reports the
    // disconnect before returning.
    let options = SessionOptions::from(config.as_ref());
    let reason = run_session(peer, source, &registry, &dispatcher, &options, &shutdown).await;
    debug!("{id} session finished: {reason}");
}
