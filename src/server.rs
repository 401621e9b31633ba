//! Health endpoint served while the scanners run.

use std::future::Future;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{Json, Router, extract::State, routing::get};
use serde::Serialize;
use tracing::info;

use crate::scanner::Scanner;

#[derive(Clone, Default)]
pub struct AppState {
    pub scanners: Vec<Arc<Scanner>>,
}

#[derive(Debug, Serialize)]
struct ScannerStatus {
    name: &'static str,
    running: bool,
    in_flight: usize,
}

#[derive(Debug, Serialize)]
struct StatusResponse {
    version: &'static str,
    scanners: Vec<ScannerStatus>,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/status", get(status))
        .with_state(state)
}

async fn health_check() -> &'static str {
    "ok"
}

async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION"),
        scanners: state
            .scanners
            .iter()
            .map(|s| ScannerStatus {
                name: s.name(),
                running: s.is_running(),
                in_flight: s.in_flight(),
            })
            .collect(),
    })
}

/// Serve until `shutdown` resolves.
pub async fn serve(
    port: u16,
    state: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    info!(addr = %listener.local_addr()?, "health endpoint listening");

    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown)
        .await
        .context("Server error")?;

    info!("health endpoint shut down");
    Ok(())
}
