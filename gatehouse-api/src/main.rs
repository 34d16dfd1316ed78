//! Gatehouse API Server Entry Point
//!
//! Loads configuration, builds the backend pools and starts the Axum HTTP
//! server.

use std::net::SocketAddr;
use std::time::Duration;

use gatehouse_api::constants::{DEFAULT_BIND_HOST, DEFAULT_PORT};
use gatehouse_api::telemetry::{init_logging, TelemetryConfig};
use gatehouse_api::{create_api_router, ApiConfig, ApiError, ApiResult, AppState};

/// How often expired cache entries and idle rate limiters are dropped.
const JANITOR_INTERVAL: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> ApiResult<()> {
    let telemetry_config = TelemetryConfig::default();
    init_logging(&telemetry_config)?;

    let config = ApiConfig::from_env();
    let state = AppState::connect(config)?;
    let app = create_api_router(state.clone())?;

    let janitor_state = state.clone();
    let janitor = tokio::spawn(async move {
        let mut interval = tokio::time::interval(JANITOR_INTERVAL);
        loop {
            interval.tick().await;
            let purged = janitor_state.purge_expired();
            if purged > 0 {
                tracing::debug!(purged, "Purged expired cache entries and idle limiters");
            }
        }
    });

    let addr = resolve_bind_addr()?;
    tracing::info!(%addr, environment = %telemetry_config.environment, "Starting Gatehouse API server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ApiError::internal_error(format!("Failed to bind {}: {}", addr, e)))?;

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
            }
            tracing::info!("Shutdown signal received");
        })
        .await
        .map_err(|e| ApiError::internal_error(format!("Server error: {}", e)))?;

    janitor.abort();
    state.backends.close();
    Ok(())
}

fn resolve_bind_addr() -> ApiResult<SocketAddr> {
    let host = std::env::var("GATEHOUSE_BIND").unwrap_or_else(|_| DEFAULT_BIND_HOST.to_string());
    let port_str = std::env::var("PORT")
        .ok()
        .or_else(|| std::env::var("GATEHOUSE_PORT").ok())
        .unwrap_or_else(|| DEFAULT_PORT.to_string());
    let port = port_str
        .parse::<u16>()
        .map_err(|_| ApiError::invalid_input(format!("Invalid port value: {}", port_str)))?;

    let addr = format!("{}:{}", host, port);
    addr.parse::<SocketAddr>()
        .map_err(|e| ApiError::invalid_input(format!("Invalid bind address {}: {}", addr, e)))
}
