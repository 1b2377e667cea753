//! # Weave Orchestration Server
//!
//! Thin wrapper binary for running the orchestration core as a standalone
//! server.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default configuration
//! cargo run --bin weave-server
//!
//! # Point at a configuration file
//! WEAVE_CONFIG_PATH=config/weave cargo run --bin weave-server
//! ```

use std::time::Duration;

use tokio::signal;
use tracing::{error, info};

use weave_orchestration::OrchestrationBootstrap;
use weave_shared::logging;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // .env first so configuration sees it; then logging
    dotenvy::dotenv().ok();
    logging::init_tracing();

    info!("Starting Weave Orchestration Server...");
    info!("   Version: {}", env!("CARGO_PKG_VERSION"));

    let handle = OrchestrationBootstrap::bootstrap()
        .await
        .map_err(|e| format!("Failed to bootstrap orchestration: {e}"))?;

    info!(
        environment = %handle.context.config().execution.environment,
        address = %handle.local_addr,
        "Orchestration server started; press Ctrl+C to shut down"
    );

    shutdown_signal().await;

    info!("Shutdown signal received, initiating graceful shutdown...");

    let shutdown_timeout_ms = handle.context.config().web.shutdown_timeout_ms;
    match tokio::time::timeout(Duration::from_millis(shutdown_timeout_ms), handle.stop()).await {
        Ok(Ok(())) => info!("Orchestration server shutdown complete"),
        Ok(Err(e)) => error!("Failed to stop orchestration cleanly: {e}"),
        Err(_) => error!(
            timeout_ms = shutdown_timeout_ms,
            "Graceful shutdown timed out, forcing exit"
        ),
    }

    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
