//! ws-relay library crate.
//!
//! A minimal real-time WebSocket message server: it accepts WebSocket
//! connections, keeps a registry of live peers, reassembles each peer's
//! incoming messages and hands every complete message, together with its
//! sender, to the registered handlers.
//!
//! # Architecture (clean architecture)
//!
//! ```text
//! WebSocket clients
//!         ↕
//! [ws-relay]
//!   ├── domain/           Pure types: PeerId, PeerState, MessageKind, RelayConfig
//!   ├── application/      Peer, PeerRegistry, MessageReassembler, Dispatcher,
//!   │                     session loop, ready-made handlers
//!   └── infrastructure/
//!         ├── ws_server/  Accept loop and per-connection tasks
//!         ├── handshake/  HTTP upgrade (101 / 400 / 404)
//!         ├── transport/  tokio-tungstenite adapters
//!         └── config_file/ Optional TOML configuration
//! ```
//!
//! # Layer rules
//!
//! - `domain` has no I/O and no async.
//! - `application` depends on `domain` and reaches the network only through
//!   the `FragmentSource` and `MessageSink` traits.
//! - `infrastructure` depends on all other layers plus `tokio` and
//!   `tokio-tungstenite`.
//!
//! # Embedding
//!
//! ```no_run
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//! use ws_relay::application::{Dispatcher, EchoHandler, PeerRegistry};
//! use ws_relay::domain::RelayConfig;
//! use ws_relay::infrastructure::RelayServer;
//!
//! # async fn demo() -> anyhow::Result<()> {
//! let registry = Arc::new(PeerRegistry::new());
//! let dispatcher = Arc::new(Dispatcher::new().with_handler(EchoHandler));
//! let server = RelayServer::bind(RelayConfig::default(), registry, dispatcher).await?;
//! server.run(CancellationToken::new()).await
//! # }
//! ```

/// Domain layer: identity, lifecycle and configuration types (no I/O).
pub mod domain;

/// Application layer: peers, registry, reassembly and dispatch.
pub mod application;

/// Infrastructure layer: listener, handshake, WebSocket adapters, config file.
pub mod infrastructure;
