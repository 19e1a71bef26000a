// Main entry point for API server

use std::sync::Arc;

use anyhow::{Context, Result};
use budget_core::common::{init_tracing, LogErr};
use budget_core::domains::auth::{build_provider, AuthService};
use budget_core::kernel::connect;
use budget_core::server::{build_app, AxumAppState};
use budget_core::Config;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::from_env().context("Failed to load configuration")?;

    // Initialize logging
    init_tracing(&config.logging);
    tracing::info!(version = %config.version, "Starting budget server");

    // Connect to credential store
    let store = connect(&config.database_url)
        .await
        .log_err("Failed to connect to credential store")?;

    // Run migrations (no-op for the in-memory store)
    store
        .migrate()
        .await
        .log_err("Failed to run migrations")?;

    let provider = build_provider(&config.auth, store.clone())
        .log_err("Failed to build auth provider")?;
    let auth = Arc::new(AuthService::new(provider));

    let port = config.port;
    let playground = config.enable_playground;
    let app = build_app(AxumAppState {
        auth,
        store,
        config: Arc::new(config),
    });

    // Start server
    let addr = format!("0.0.0.0:{}", port);
    tracing::info!("Starting server on {}", addr);
    if playground {
        tracing::info!("GraphQL playground: http://localhost:{}/graphql/playground", port);
    }
    tracing::info!("Health check: http://localhost:{}/health", port);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
