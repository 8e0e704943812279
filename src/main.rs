//! WebSocket Signaling Relay - Entry Point
//!
//! Parses the command line, starts the TCP listener and serves sessions.

use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use signal_relay::{log_status, serve, Config, Dashboard, RoomRegistry, SessionContext};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging with environment filter
    // Use RUST_LOG env var to control log level
    // e.g., RUST_LOG=debug or RUST_LOG=signal_relay=trace
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("signal_relay=info")),
        )
        .init();

    let config = Config::parse();

    // Start TCP listener
    let listener = TcpListener::bind(&config.addr).await?;
    info!("Signaling relay listening on {}", config.addr);

    let registry = RoomRegistry::new(config.registry_config());
    let dashboard = Arc::new(Dashboard::new());

    if let Some(period) = config.status_interval() {
        tokio::spawn(log_status(period, dashboard.clone(), registry.clone()));
    }
    if let Some(url) = &config.room_server {
        info!("Notifying room server at {}", url);
    }

    let ctx = SessionContext {
        registry,
        dashboard,
        register_timeout: config.register_timeout(),
    };

    tokio::select! {
        _ = serve(listener, ctx) => {}
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down");
        }
    }

    Ok(())
}
