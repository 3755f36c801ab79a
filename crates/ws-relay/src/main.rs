//! ws-relay: minimal real-time WebSocket message server.
//!
//! Accepts WebSocket connections, keeps a registry of connected peers and
//! hands each complete incoming message to the configured handler mode.
//!
//! # Usage
//!
//! ```text
//! ws-relay [OPTIONS]
//!
//! Options:
//!   --config <FILE>              Optional TOML config file
//!   --host <IP>                  Bind address [default: 0.0.0.0]
//!   --port <PORT>                Listener port [default: 8080]
//!   --path <PATH>                Upgrade path [default: /]
//!   --receive-buffer <BYTES>     Per-read scratch buffer [default: 4096]
//!   --max-message <BYTES>        Largest accepted message [default: 1048576]
//!   --handshake-timeout <SECS>   Upgrade request deadline [default: 10]
//!   --close-timeout <SECS>       Close handshake bound [default: 2]
//!   --send-timeout <SECS>        Per-peer write bound [default: 5]
//!   --shutdown-grace <SECS>      Shutdown drain bound [default: 5]
//!   --mode <log|echo|broadcast>  What to do with messages [default: log]
//! ```
//!
//! # Environment variable overrides
//!
//! Every flag can also be set through the environment.  Precedence, lowest to
//! highest: built-in defaults, config file, environment, command line.
//!
//! | Variable                  | Flag                  |
//! |---------------------------|-----------------------|
//! | `RELAY_CONFIG`            | `--config`            |
//! | `RELAY_HOST`              | `--host`              |
//! | `RELAY_PORT`              | `--port`              |
//! | `RELAY_PATH`              | `--path`              |
//! | `RELAY_RECEIVE_BUFFER`    | `--receive-buffer`    |
//! | `RELAY_MAX_MESSAGE`       | `--max-message`       |
//! | `RELAY_HANDSHAKE_TIMEOUT` | `--handshake-timeout` |
//! | `RELAY_CLOSE_TIMEOUT`     | `--close-timeout`     |
//! | `RELAY_SEND_TIMEOUT`      | `--send-timeout`      |
//! | `RELAY_SHUTDOWN_GRACE`    | `--shutdown-grace`    |
//! | `RELAY_MODE`              | `--mode`              |
//!
//! Log verbosity is controlled by `RUST_LOG` (default `info`).

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use ws_relay::application::{
    BroadcastHandler, Dispatcher, EchoHandler, LogHandler, PeerRegistry,
};
use ws_relay::domain::RelayConfig;
use ws_relay::infrastructure::{ConfigFile, RelayServer};

// ── CLI argument definitions ──────────────────────────────────────────────────

/// What the relay does with each complete message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    /// Log connections and message sizes only.
    Log,
    /// Send every message back to its sender.
    Echo,
    /// Republish every message to all other connected peers.
    Broadcast,
}

/// Minimal real-time WebSocket message relay.
///
/// Flags left unset fall back to the config file (if any), then to the
/// built-in defaults.
#[derive(Debug, Parser)]
#[command(
    name = "ws-relay",
    about = "Minimal real-time WebSocket message relay server",
    version
)]
struct Cli {
    /// Optional TOML configuration file.
    #[arg(long, env = "RELAY_CONFIG")]
    config: Option<PathBuf>,

    /// IP address to bind the listener to.
    ///
    /// Use `0.0.0.0` to accept connections on every interface or `127.0.0.1`
    /// for local connections only.
    #[arg(long, env = "RELAY_HOST")]
    host: Option<String>,

    /// TCP port to listen on (`0` picks a free port).
    #[arg(long, env = "RELAY_PORT")]
    port: Option<u16>,

    /// HTTP path that upgrade requests must target.
    #[arg(long, env = "RELAY_PATH")]
    path: Option<String>,

    /// Size of the per-read receive buffer in bytes.
    #[arg(long = "receive-buffer", env = "RELAY_RECEIVE_BUFFER")]
    receive_buffer: Option<usize>,

    /// Largest complete message a client may send, in bytes.
    #[arg(long = "max-message", env = "RELAY_MAX_MESSAGE")]
    max_message: Option<usize>,

    /// Seconds a client has to complete the upgrade request.
    #[arg(long, env = "RELAY_HANDSHAKE_TIMEOUT")]
    handshake_timeout: Option<u64>,

    /// Upper bound in seconds on the close handshake at disconnect.
    #[arg(long, env = "RELAY_CLOSE_TIMEOUT")]
    close_timeout: Option<u64>,

    /// Upper bound in seconds on one write to a peer.  A peer that stays
    /// behind this long is disconnected instead of stalling its senders.
    #[arg(long, env = "RELAY_SEND_TIMEOUT")]
    send_timeout: Option<u64>,

    /// Seconds to wait for connections to finish on shutdown.
    #[arg(long, env = "RELAY_SHUTDOWN_GRACE")]
    shutdown_grace: Option<u64>,

    /// Handler mode.
    #[arg(long, value_enum, default_value_t = Mode::Log, env = "RELAY_MODE")]
    mode: Mode,
}

impl Cli {
    /// Builds the effective [`RelayConfig`]: defaults, then the config file,
    /// then any flags given on the command line or in the environment.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file cannot be loaded or `--host` is
    /// not a valid IP address.
    fn into_relay_config(self) -> anyhow::Result<RelayConfig> {
        let mut config = RelayConfig::default();

        if let Some(path) = &self.config {
            config = ConfigFile::load(path)
                .and_then(|file| file.apply(config))
                .with_context(|| format!("failed to load config file {}", path.display()))?;
        }

        if let Some(host) = &self.host {
            let ip: IpAddr = host
                .parse()
                .with_context(|| format!("invalid bind address: '{host}'"))?;
            config.bind_addr = SocketAddr::new(ip, config.bind_addr.port());
        }
        if let Some(port) = self.port {
            config.bind_addr.set_port(port);
        }
        if let Some(path) = self.path {
            config.path = path;
        }
        if let Some(size) = self.receive_buffer {
            config.receive_buffer_size = size;
        }
        if let Some(size) = self.max_message {
            config.max_message_size = size;
        }
        if let Some(secs) = self.handshake_timeout {
            config.handshake_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = self.close_timeout {
            config.close_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = self.send_timeout {
            config.send_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = self.shutdown_grace {
            config.shutdown_grace = Duration::from_secs(secs);
        }

        Ok(config)
    }
}

/// Wires up the handlers for `mode`.  Every mode logs.
fn build_dispatcher(mode: Mode, registry: &Arc<PeerRegistry>) -> Dispatcher {
    let dispatcher = Dispatcher::new().with_handler(LogHandler);
    match mode {
        Mode::Log => dispatcher,
        Mode::Echo => dispatcher.with_handler(EchoHandler),
        Mode::Broadcast => dispatcher.with_handler(BroadcastHandler::new(Arc::clone(registry))),
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialise structured logging.  `RUST_LOG=debug` shows per-message
    // traffic; the default `info` shows connects and disconnects only.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mode = cli.mode;
    let config = cli.into_relay_config()?;

    info!(
        "ws-relay starting: bind={}, path={}, mode={mode:?}",
        config.bind_addr, config.path
    );

    // The registry is shared by the server (which fills it) and the
    // broadcast handler (which reads it), so it is created out here.
    let registry = Arc::new(PeerRegistry::new());
    let dispatcher = Arc::new(build_dispatcher(mode, &registry));
    let server = RelayServer::bind(config, registry, dispatcher).await?;

    // Ctrl+C cancels the token; `run` then stops accepting, closes every
    // live connection and returns once they are torn down.
    let shutdown = CancellationToken::new();
    let on_signal = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("received Ctrl+C, shutting down");
                on_signal.cancel();
            }
            Err(e) => error!("failed to listen for Ctrl+C signal: {e}"),
        }
    });

    server.run(shutdown).await
}

// ── Tests ─────────────────────────────────────────────────────────────────────
