//! linechat relay server: broadcast every received line to every client.
//!
//! # Usage
//!
//! ```bash
//! # Run on default address 0.0.0.0:14002
//! cargo run --bin linechat-relay
//!
//! # Run on a custom port
//! cargo run --bin linechat-relay -- --port 15000
//!
//! # Or via environment variable
//! RELAY_PORT=15000 cargo run --bin linechat-relay
//! ```
//!
//! Type `EXIT` on the console (or press Ctrl-C) to stop the server.

use std::sync::Arc;

use clap::Parser;
use linechat_proto::surface::{StdinSource, StdoutSink};
use linechat_relay::config::{RelayCliArgs, RelayConfig};
use linechat_relay::event::ServerEvent;
use linechat_relay::relay::{self, ServerSink};
use linechat_relay::shutdown::ShutdownController;

#[tokio::main]
async fn main() {
    let cli = RelayCliArgs::parse();

    // Load config from CLI args + config file + env vars + defaults.
    let config = match RelayConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            std::process::exit(1);
        }
    };

    // Diagnostics go to stderr; stdout carries the operator event stream.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    tracing::info!(addr = %config.bind_addr(), "starting linechat relay server");

    let sink: ServerSink = Arc::new(StdoutSink);
    let handle = match relay::start_server(&config, Arc::clone(&sink)).await {
        Ok(handle) => handle,
        Err(e) => {
            tracing::error!(error = %e, "failed to start relay server");
            sink.emit(ServerEvent::Fatal(e.to_string()));
            std::process::exit(1);
        }
    };

    let controller = ShutdownController::new(handle.clone(), config.shutdown_keyword.clone());
    tokio::spawn(controller.watch(StdinSource::spawn()));

    let interrupt = handle.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("interrupt received");
                interrupt.shutdown().await;
            }
            Err(e) => tracing::warn!(error = %e, "cannot listen for Ctrl-C"),
        }
    });

    handle.wait().await;
}
