use std::net::SocketAddr;

use inkflow_proxy::{app, build_state_from_env, spawn_housekeeping};
use tokio::net::TcpListener;
use tokio::signal;
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialise structured logging. Reads RUST_LOG environment variable.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();

    let state = build_state_from_env()?;
    let config = state.config.clone();
    tracing::info!(
        max_file_size_bytes = config.max_file_size,
        max_files = config.max_files_per_request,
        max_connections = config.max_concurrent_connections,
        timeout_secs = config.request_timeout.as_secs(),
        "starting InkFlow proxy"
    );
    tracing::info!(
        endpoints = ?config.webhook_urls,
        allowed_origins = ?config.allowed_origins,
        "webhook configuration"
    );

    let housekeeping = spawn_housekeeping(
        state.registry.clone(),
        config.housekeeping_interval,
        state.start_instant,
    );

    let addr = format!("{}:{}", config.host, config.port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("listening on {}", listener.local_addr()?);

    // Run the server with graceful shutdown: stop accepting, give in-flight
    // requests a chance to complete, then stop housekeeping.
    axum::serve(
        listener,
        app(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    housekeeping.abort();
    tracing::info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    // Wait for Ctrl+C
    let _ = signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
