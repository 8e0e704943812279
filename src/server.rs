//! Connection accept loop and status reporting

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tracing::{error, info, warn};

use crate::dashboard::Dashboard;
use crate::handler::{handle_connection, SessionContext};
use crate::registry::RoomRegistry;

/// Accept connections forever, one session task each
pub async fn serve(listener: TcpListener, ctx: SessionContext) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                info!("New connection from {}", addr);
                let ctx = ctx.clone();

                // Spawn handler task for each connection
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, ctx).await {
                        error!("Connection handler error: {}", e);
                    }
                });
            }
            Err(e) => {
                error!("Failed to accept connection: {}", e);
            }
        }
    }
}

/// Log a JSON status report every `period`
pub async fn log_status(period: Duration, dashboard: Arc<Dashboard>, registry: Arc<RoomRegistry>) {
    let mut ticker = tokio::time::interval(period);
    // The first tick completes immediately
    ticker.tick().await;

    loop {
        ticker.tick().await;
        match serde_json::to_string(&dashboard.report(&registry)) {
            Ok(json) => info!("Status: {}", json),
            Err(e) => warn!("Failed to serialize status: {}", e),
        }
    }
}
