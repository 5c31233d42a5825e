//! Chat gateway.
//!
//! ```text
//!   Client ──▶ correlation ID ──▶ admission limiter ──▶ handlers
//!                                  (Redis / memory)       │
//!                     ┌───────────────────────────────────┴──────────────┐
//!                     ▼                                                  ▼
//!          breaker("upstream")                               breaker("generative")
//!                     │                                                  │
//!                     ▼                                                  ▼
//!           upstream backend                              credential pool ──▶ AI API
//! ```

use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use chat_gateway::config::watcher::ConfigWatcher;
use chat_gateway::config::{load_config, GatewayConfig};
use chat_gateway::lifecycle::{wait_for_signal, Shutdown};
use chat_gateway::observability::{logging, metrics};
use chat_gateway::HttpServer;

#[derive(Parser)]
#[command(name = "chat-gateway", version)]
#[command(about = "Resilient gateway for generative AI and backend calls", long_about = None)]
struct Args {
    /// TOML configuration file. Built-in defaults when omitted.
    #[arg(short, long, env = "CHAT_GATEWAY_CONFIG")]
    config: Option<PathBuf>,

    /// Do not reload the rate-limit table when the config file changes.
    #[arg(long)]
    no_watch: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => GatewayConfig::default(),
    };

    logging::init_logging(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "chat-gateway starting");

    tracing::info!(
        bind_address = %config.listener.bind_address,
        request_timeout_secs = config.timeouts.request_secs,
        rate_limit_routes = config.rate_limit.routes.len(),
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let (_watcher, config_updates) = match &args.config {
        Some(path) if !args.no_watch => {
            let (watcher, updates) = ConfigWatcher::new(path);
            (Some(watcher.run()?), updates)
        }
        _ => (None, mpsc::unbounded_channel().1),
    };

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let server = HttpServer::new(config)?;
    let shutdown = Shutdown::new();
    let server_shutdown = shutdown.subscribe();
    let mut server_task = tokio::spawn(server.run(listener, config_updates, server_shutdown));

    tokio::select! {
        result = &mut server_task => {
            tracing::error!("HTTP server exited before a shutdown signal");
            result??;
        }
        signal = wait_for_signal() => {
            signal?;
            shutdown.trigger();
            server_task.await??;
        }
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
