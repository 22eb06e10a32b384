//! Reverse HTTP tunnel relay.
//!
//! # Architecture Overview
//!
//! ```text
//!                       ┌──────────────────────────────────────────────────────┐
//!                       │                     TUNNEL RELAY                     │
//!   Caller request      │  ┌─────────┐   ┌─────────────┐   ┌──────────────┐    │
//!   ────────────────────┼─▶│  http   │──▶│   routing   │──▶│  dispatcher  │────┼──▶ channel
//!                       │  │ server  │   │    cache    │   │ inline/chunk │    │   (hub WS)
//!                       │  └────▲────┘   └─────────────┘   └──────────────┘    │      │
//!                       │       │                                              │      │
//!   Caller response     │  ┌────┴────┐   ┌─────────────┐   ┌──────────────┐    │      │
//!   ◀───────────────────┼──│response │◀──│ correlator  │◀──│  listeners   │◀───┼──────┘
//!                       │  │ builder │   │ + assembly  │   │  (fan-out)   │    │
//!                       │  └────▲────┘   └─────────────┘   └──────────────┘    │
//!                       │       │ blob key                                     │
//!                       │  ┌────┴────────┐                                     │
//!                       │  │ blob store  │  stream, then delete unless cacheable│
//!                       │  └─────────────┘                                     │
//!                       └──────────────────────────────────────────────────────┘
//! ```

use clap::Parser;
use std::path::PathBuf;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use tunnel_relay::config::{load_config, ConfigWatcher, RelayConfig};
use tunnel_relay::lifecycle::{spawn_signal_handler, Shutdown};
use tunnel_relay::observability::{init_logging, init_metrics};
use tunnel_relay::HttpServer;

#[derive(Parser, Debug)]
#[command(name = "tunnel-relay", version)]
#[command(about = "Relay public HTTP requests to a private backend over a duplex channel", long_about = None)]
struct Cli {
    /// Path to the TOML configuration file. Defaults are used when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Reload tunnel settings when the configuration file changes.
    #[arg(short, long, requires = "config")]
    watch: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => RelayConfig::default(),
    };

    init_logging(&config.observability)?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "tunnel-relay starting");
    tracing::info!(
        bind_address = %config.listener.bind_address,
        hub = %config.channel.endpoint,
        response_timeout_ms = config.tunnel.response_timeout_ms,
        max_inline_body_bytes = config.tunnel.max_inline_body_bytes,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => init_metrics(addr)?,
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    // Keep the watcher alive for the life of the server.
    let (_watcher, config_updates) = match (&cli.config, cli.watch) {
        (Some(path), true) => {
            let (watcher, updates) = ConfigWatcher::new(path);
            (Some(watcher.run()?), updates)
        }
        _ => {
            let (_, updates) = mpsc::unbounded_channel();
            (None, updates)
        }
    };

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let shutdown = Shutdown::new();
    spawn_signal_handler(&shutdown);

    let server = HttpServer::new(config)?;
    server.run(listener, config_updates, shutdown.subscribe()).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
