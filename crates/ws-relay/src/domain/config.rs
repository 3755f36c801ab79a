//! Relay configuration types.
//!
//! [`RelayConfig`] is the single source of truth for all runtime settings.
//! It is populated by the binary from (in increasing precedence) built-in
//! defaults, an optional TOML file, and command-line flags / environment
//! variables.  Nothing in this module reads files or the environment.

use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

/// Default size of the per-read scratch buffer, in bytes.
pub const DEFAULT_RECEIVE_BUFFER_SIZE: usize = 4096;

/// Default upper bound on one reassembled message, in bytes (1 MiB).
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// Default upper bound on a single outbound write to one peer.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors reported by [`RelayConfig::validate`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// The upgrade path does not start with `/`.
    #[error("upgrade path must start with '/': {0:?}")]
    InvalidPath(String),

    /// The receive scratch buffer would be empty.
    #[error("receive buffer size must be greater than zero")]
    ZeroBufferSize,

    /// The message limit is smaller than a single scratch read.
    #[error("max message size ({max}) must be at least the receive buffer size ({buffer})")]
    MessageLimitTooSmall { max: usize, buffer: usize },

    /// Every send would time out immediately.
    #[error("send timeout must be greater than zero")]
    ZeroSendTimeout,
}

/// All runtime configuration for the relay server.
///
/// Build this once at startup and wrap it in an `Arc` to share it across
/// connection tasks.
///
/// # Example
///
/// ```rust
/// use ws_relay::domain::RelayConfig;
///
/// let cfg = RelayConfig::default();
/// assert_eq!(cfg.bind_addr.port(), 8080);
/// assert!(cfg.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct RelayConfig {
    /// Address and port the listener binds to.  Port `0` picks a free port.
    pub bind_addr: SocketAddr,

    /// HTTP path that upgrade requests must target (e.g. `/` or `/ws`).
    pub path: String,

    /// Size of the scratch buffer used for each fragment read.
    pub receive_buffer_size: usize,

    /// Largest complete message a peer may send before it is disconnected.
    pub max_message_size: usize,

    /// How long a client has to send a complete HTTP upgrade request.
    pub handshake_timeout: Duration,

    /// Upper bound on the best-effort close handshake at teardown.
    pub close_timeout: Duration,

    /// How long one write to a peer may take, waiting for its turn on the
    /// peer's send lock included.  A peer that stops reading hits this
    /// bound instead of stalling whoever is sending to it.
    pub send_timeout: Duration,

    /// How long shutdown waits for workers to finish their teardown.
    pub shutdown_grace: Duration,
}

impl Default for RelayConfig {
    /// | Field                 | Default        |
    /// |-----------------------|----------------|
    /// | bind_addr             | `0.0.0.0:8080` |
    /// | path                  | `/`            |
    /// | receive_buffer_size   | 4096           |
    /// | max_message_size      | 1 MiB          |
    /// | handshake_timeout     | 10 seconds     |
    /// | close_timeout         | 2 seconds      |
    /// | send_timeout          | 5 seconds      |
    /// | shutdown_grace        | 5 seconds      |
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            path: "/".to_string(),
            receive_buffer_size: DEFAULT_RECEIVE_BUFFER_SIZE,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            handshake_timeout: Duration::from_secs(10),
            close_timeout: Duration::from_secs(2),
            send_timeout: DEFAULT_SEND_TIMEOUT,
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

impl RelayConfig {
    /// Checks the invariants the server relies on.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.path.starts_with('/') {
            return Err(ConfigError::InvalidPath(self.path.clone()));
        }
        if self.receive_buffer_size == 0 {
            return Err(ConfigError::ZeroBufferSize);
        }
        if self.max_message_size < self.receive_buffer_size {
            return Err(ConfigError::MessageLimitTooSmall {
                max: self.max_message_size,
                buffer: self.receive_buffer_size,
            });
        }
        if self.send_timeout.is_zero() {
            return Err(ConfigError::ZeroSendTimeout);
        }
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
