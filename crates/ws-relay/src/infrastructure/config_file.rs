//! Optional TOML configuration file.
//!
//! Every key is optional; a key that is present overrides the built-in
//! default and is itself overridden by command-line flags.  Unknown keys are
//! rejected so that typos surface at startup instead of being ignored.
//!
//! ```toml
//! host = "127.0.0.1"
//! port = 9001
//! path = "/ws"
//! receive_buffer_size = 8192
//! max_message_size = 2097152
//! handshake_timeout_secs = 5
//! close_timeout_secs = 1
//! send_timeout_secs = 2
//! shutdown_grace_secs = 3
//! ```

use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::domain::RelayConfig;

/// Error type for reading the configuration file.
#[derive(Debug, Error)]
pub enum ConfigFileError {
    /// The file could not be read.
    #[error("I/O error reading config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// `host` is not an IP address.
    #[error("invalid host in config file: {0:?}")]
    InvalidHost(String),
}

/// On-disk shape of the configuration file.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub path: Option<String>,
    pub receive_buffer_size: Option<usize>,
    pub max_message_size: Option<usize>,
    pub handshake_timeout_secs: Option<u64>,
    pub close_timeout_secs: Option<u64>,
    pub send_timeout_secs: Option<u64>,
    pub shutdown_grace_secs: Option<u64>,
}

impl ConfigFile {
    /// Reads and parses the file at `path`.
    ///
    /// # Errors
    ///
    /// [`ConfigFileError::Io`] if the file cannot be read (including when it
    /// does not exist: an explicitly named file is required), and
    /// [`ConfigFileError::Parse`] if the TOML is malformed.
    pub fn load(path: &Path) -> Result<Self, ConfigFileError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigFileError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content)
    }

    /// Parses TOML text.
    pub fn parse(content: &str) -> Result<Self, ConfigFileError> {
        Ok(toml::from_str(content)?)
    }

    /// Overlays the keys present in this file onto `base`.
    ///
    /// # Errors
    ///
    /// [`ConfigFileError::InvalidHost`] if `host` does not parse as an IP.
    pub fn apply(&self, mut base: RelayConfig) -> Result<RelayConfig, ConfigFileError> {
        if let Some(host) = &self.host {
            let ip: IpAddr = host
                .parse()
                .map_err(|_| ConfigFileError::InvalidHost(host.clone()))?;
            base.bind_addr = SocketAddr::new(ip, base.bind_addr.port());
        }
        if let Some(port) = self.port {
            base.bind_addr.set_port(port);
        }
        if let Some(path) = &self.path {
            base.path = path.clone();
        }
        if let Some(size) = self.receive_buffer_size {
            base.receive_buffer_size = size;
        }
        if let Some(size) = self.max_message_size {
            base.max_message_size = size;
        }
        if let Some(secs) = self.handshake_timeout_secs {
            base.handshake_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = self.close_timeout_secs {
            base.close_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = self.send_timeout_secs {
            base.send_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = self.shutdown_grace_secs {
            base.shutdown_grace = Duration::from_secs(secs);
        }
        Ok(base)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
