//! Domain layer for ws-relay.
//!
//! Plain value types with no I/O, no async and no transport types: peer
//! identity and lifecycle state, message classification, and the relay
//! configuration.

pub mod config;
pub mod peer;

pub use config::{ConfigError, RelayConfig, DEFAULT_SEND_TIMEOUT};
pub use peer::{DisconnectReason, MessageKind, PeerId, PeerState};
