//! linechat: line-based chat client.
//!
//! Reads lines from stdin and sends them to the relay; prints every line
//! the relay broadcasts. Configuration via CLI flags, environment
//! variables, or config file (`~/.config/linechat/config.toml`).
//!
//! ```bash
//! # Connect to localhost:14002
//! cargo run --bin linechat
//!
//! # Connect elsewhere
//! cargo run --bin linechat -- --host chat.example.org --port 15000
//!
//! # Or via environment variables
//! LINECHAT_HOST=chat.example.org LINECHAT_PORT=15000 cargo run --bin linechat
//! ```

use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing_appender::non_blocking::WorkerGuard;

use linechat::config::{CliArgs, ClientConfig};
use linechat::net::{self, ClientSink};
use linechat_proto::surface::{StdinSource, StdoutSink};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = CliArgs::parse();

    // Load and resolve configuration (CLI args > env > config file > defaults).
    let config = match ClientConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    // Logs go to a file; stdout carries the chat.
    let _log_guard = init_logging(&config.log_level, cli.log_file.as_deref());

    tracing::info!("linechat starting");

    let sink: ClientSink = Arc::new(StdoutSink);
    let result = net::run(&config, StdinSource::spawn(), sink).await;

    tracing::info!("linechat exiting");
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(_) => ExitCode::FAILURE,
    }
}

/// Initialize file-based logging.
///
/// Returns a [`WorkerGuard`] that must be held until shutdown to ensure all
/// buffered log entries are flushed.
fn init_logging(level: &str, file_path: Option<&Path>) -> Option<WorkerGuard> {
    let default_path = std::env::temp_dir().join("linechat.log");
    let log_path = file_path.unwrap_or(&default_path);

    let log_dir = log_path.parent()?;
    let file_name = log_path.file_name()?.to_str()?;

    let file_appender = tracing_appender::rolling::never(log_dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_env_filter(env_filter)
        .with_ansi(false)
        .init();

    Some(guard)
}
