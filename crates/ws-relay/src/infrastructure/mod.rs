//! Infrastructure layer for ws-relay.
//!
//! Everything that touches the network or the filesystem lives here.
//!
//! # Responsibilities
//!
//! - Binding the TCP listener and running the accept loop
//! - Performing the WebSocket HTTP upgrade handshake (and rejecting
//!   non-upgrade requests with a 4xx response)
//! - Adapting tokio-tungstenite streams to the application's
//!   `FragmentSource` / `MessageSink` traits
//! - Reading the optional TOML configuration file
//!
//! # What does NOT belong here?
//!
//! - Reassembly, dispatch and registry logic (that is the application layer)
//! - Identity and configuration types (that is the domain layer)

pub mod config_file;
pub mod handshake;
pub mod transport;
pub mod ws_server;

pub use config_file::{ConfigFile, ConfigFileError};
pub use handshake::{accept_upgrade, HandshakeError};
pub use transport::{split_stream, WsFragmentSource, WsSink};
pub use ws_server::RelayServer;
