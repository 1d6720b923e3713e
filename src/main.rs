//! Grid Wars Server - shared board capture game
//!
//! This is the main entry point for the game server. It handles:
//! - WebSocket connections for live tile updates and captures
//! - HTTP endpoints for the board, leaderboard, captures and registration
//! - Cross-instance fan-out over Redis pub/sub
//! - Supabase integration for tile and player data

mod app;
mod bus;
mod config;
mod game;
mod http;
mod store;
mod util;
mod ws;

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::app::AppState;
use crate::bus::{EventBus, LocalBus, RedisBus};
use crate::config::Config;
use crate::http::build_router;
use crate::store::{MemoryTileStore, SupabaseClient, SupabaseTileStore, TileStore};
use crate::util::time::init_server_time;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = Config::from_env()?;

    // Initialize tracing
    init_tracing(&config.log_level);

    // Initialize server time tracking
    init_server_time();

    info!("Starting Grid Wars Server");
    info!("Server address: {}", config.server_addr);

    let store: Arc<dyn TileStore> = match &config.supabase {
        Some(supabase) => {
            info!(url = %supabase.url, "Using Supabase tile store");
            Arc::new(SupabaseTileStore::new(SupabaseClient::new(supabase)))
        }
        None => {
            info!(board_size = config.board_size, "Using in-memory tile store");
            Arc::new(MemoryTileStore::seeded(config.board_size))
        }
    };

    let bus: Arc<dyn EventBus> = match &config.redis_url {
        Some(url) => Arc::new(RedisBus::connect(url).await?),
        None => {
            info!("No REDIS_URL set, running single-instance with an in-process bus");
            Arc::new(LocalBus::new())
        }
    };

    // Create application state
    let (state, hub, lifecycle) = AppState::new(config.clone(), store, bus.clone());

    // Spawn the connection hub and the lifecycle controller
    tokio::spawn(hub.run());
    tokio::spawn(lifecycle.run());

    // Everything published on the bus, our own updates included, reaches local clients here
    let envelopes = bus.subscribe().await?;
    tokio::spawn(bus::forward_to_hub(bus.clone(), envelopes, state.hub.clone()));

    // Build router
    let router = build_router(state);

    // Start server
    let addr: SocketAddr = config.server_addr;
    let listener = TcpListener::bind(addr).await?;

    info!("Server listening on {}", addr);
    info!("Health check: http://{}/health", addr);
    info!("WebSocket endpoint: ws://{}/ws", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown");
        }
        _ = terminate => {
            info!("Received terminate signal, starting graceful shutdown");
        }
    }
}
