//! # streak-server
//!
//! Reference backend for the score sync engine.
//!
//! Serves the `scores`, `groups` and `friendships` collections over a JSON
//! API, enforcing the same membership and reader-set rules the hosted
//! backend applies. State lives in memory; the binary is meant for local
//! development and end-to-end testing of the engine.

mod api;
mod config;
mod error;

use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::api::AppState;
use crate::config::ServerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,streak_server=debug")),
        )
        .init();

    info!("Starting streak server v{}", env!("CARGO_PKG_VERSION"));

    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");

    let http_addr = config.http_addr;
    let state = AppState::new(config);

    tokio::select! {
        result = api::serve(state, http_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
