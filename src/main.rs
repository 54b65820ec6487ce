//! World Guard Server - authoritative motion validation for a shared world
//!
//! This is the main entry point for the server. It handles:
//! - WebSocket connections carrying participant motion and ability packets
//! - Motion validation, rubber-banding and violation escalation
//! - The creature simulation loop
//! - HTTP endpoints for health and violation admin tooling

mod app;
mod config;
mod game;
mod http;
mod ingest;
mod integrity;
mod util;
mod ws;

use std::net::SocketAddr;

use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::app::AppState;
use crate::config::Config;
use crate::http::build_router;
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

    info!("Starting World Guard Server");
    info!("Server address: {}", config.server_addr);
    info!(
        auto_ban = config.toggles.auto_ban_enabled,
        enforcement = config.toggles.enforcement_enabled,
        "Integrity toggles"
    );

    // Create application state
    let (state, workers) = AppState::new(config.clone())?;

    // Spawn audit log and ban delivery workers
    tokio::spawn(workers.audit_writer.run());
    if let Some(dispatcher) = workers.ban_dispatcher {
        tokio::spawn(dispatcher.run());
    }

    // Spawn creature simulation
    let world = state.world.clone();
    tokio::spawn(world.run_simulation());

    // Build router
    let router = build_router(state);

    // Start server
    let addr: SocketAddr = config.server_addr;
    let listener = TcpListener::bind(addr).await?;

    info!("Server listening on {}", addr);
    info!("Health check: http://{}/health", addr);
    info!("WebSocket endpoint: ws://{}/ws", addr);

    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
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
