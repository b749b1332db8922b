//! Configuration system for the linechat relay server.
//!
//! Supports layered configuration with the following priority (highest first):
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/linechat-relay/config.toml`)
//! 4. Compiled defaults

use std::path::PathBuf;
use std::time::Duration;

use linechat_proto::connection::{ConnectionLimits, DEFAULT_WRITE_TIMEOUT};
use linechat_proto::line::{DEFAULT_MAX_LINE_LENGTH, DEFAULT_PORT, DEFAULT_SHUTDOWN_KEYWORD};

use crate::queue::DEFAULT_MAX_QUEUE_SIZE;

/// Errors that can occur when loading relay configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to parse the TOML configuration.
    #[error("failed to parse config file: {0}")]
    ParseToml(#[from] toml::de::Error),
}

// ---------------------------------------------------------------------------
// TOML file structs (all fields Option for partial overrides)
// ---------------------------------------------------------------------------

/// Top-level TOML config file structure for the relay.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct RelayConfigFile {
    server: ServerFileConfig,
}

/// `[server]` section of the relay config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ServerFileConfig {
    host: Option<String>,
    port: Option<u16>,
    max_line_length: Option<usize>,
    write_timeout_ms: Option<u64>,
    max_queue_size: Option<usize>,
    shutdown_keyword: Option<String>,
}

// ---------------------------------------------------------------------------
// CLI arguments
// ---------------------------------------------------------------------------

/// CLI arguments for the relay server.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "linechat relay server")]
pub struct RelayCliArgs {
    /// Interface to listen on.
    #[arg(long, env = "RELAY_HOST")]
    pub host: Option<String>,

    /// Port to listen on.
    #[arg(short, long, env = "RELAY_PORT")]
    pub port: Option<u16>,

    /// Path to config file (default: `~/.config/linechat-relay/config.toml`).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Maximum accepted line length in bytes.
    #[arg(long)]
    pub max_line_length: Option<usize>,

    /// Per-line write timeout in milliseconds.
    #[arg(long)]
    pub write_timeout_ms: Option<u64>,

    /// Maximum number of lines waiting for broadcast.
    #[arg(long)]
    pub max_queue_size: Option<usize>,

    /// Console line that shuts the server down.
    #[arg(long)]
    pub shutdown_keyword: Option<String>,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "RELAY_LOG")]
    pub log_level: String,
}

// ---------------------------------------------------------------------------
// Resolved configuration
// ---------------------------------------------------------------------------

/// Fully resolved relay server configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Interface to bind (e.g., `0.0.0.0`).
    pub host: String,
    /// Port to bind; `0` lets the OS choose.
    pub port: u16,
    /// Maximum accepted line length in bytes.
    pub max_line_length: usize,
    /// Upper bound on a single line write to one client.
    pub write_timeout: Duration,
    /// Maximum number of lines waiting for broadcast.
    pub max_queue_size: usize,
    /// Console line that triggers shutdown.
    pub shutdown_keyword: String,
    /// Log level filter string.
    pub log_level: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            max_line_length: DEFAULT_MAX_LINE_LENGTH,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            max_queue_size: DEFAULT_MAX_QUEUE_SIZE,
            shutdown_keyword: DEFAULT_SHUTDOWN_KEYWORD.to_string(),
            log_level: "info".to_string(),
        }
    }
}

impl RelayConfig {
    /// Load configuration by merging CLI args, env vars, and a TOML file.
    ///
    /// If `--config` is given and the file does not exist, returns an error.
    /// If no `--config` is given, the default path is tried and missing file
    /// is treated as empty config.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the explicit config file cannot be read
    /// or parsed.
    pub fn load(cli: &RelayCliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        Ok(Self::resolve(cli, &file))
    }

    /// Resolve a `RelayConfig` from CLI args and a parsed config file.
    ///
    /// Priority: CLI > file > default.
    #[must_use]
    fn resolve(cli: &RelayCliArgs, file: &RelayConfigFile) -> Self {
        let defaults = Self::default();

        Self {
            host: cli
                .host
                .clone()
                .or_else(|| file.server.host.clone())
                .unwrap_or(defaults.host),
            port: cli.port.or(file.server.port).unwrap_or(defaults.port),
            max_line_length: cli
                .max_line_length
                .or(file.server.max_line_length)
                .unwrap_or(defaults.max_line_length),
            write_timeout: cli
                .write_timeout_ms
                .or(file.server.write_timeout_ms)
                .map_or(defaults.write_timeout, Duration::from_millis),
            max_queue_size: cli
                .max_queue_size
                .or(file.server.max_queue_size)
                .unwrap_or(defaults.max_queue_size),
            shutdown_keyword: cli
                .shutdown_keyword
                .clone()
                .or_else(|| file.server.shutdown_keyword.clone())
                .unwrap_or(defaults.shutdown_keyword),
            log_level: cli.log_level.clone(),
        }
    }

    /// Address string handed to the listener (`host:port`).
    #[must_use]
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Limits applied to every accepted connection.
    #[must_use]
    pub const fn connection_limits(&self) -> ConnectionLimits {
        ConnectionLimits {
            max_line_length: self.max_line_length,
            write_timeout: self.write_timeout,
        }
    }
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

/// Load and parse a TOML config file for the relay.
fn load_config_file(
    explicit_path: Option<&std::path::Path>,
) -> Result<RelayConfigFile, ConfigError> {
    let path = if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    } else {
        let Some(config_dir) = dirs::config_dir() else {
            return Ok(RelayConfigFile::default());
        };
        config_dir.join("linechat-relay").join("config.toml")
    };

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(RelayConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}
