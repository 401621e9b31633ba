//! Long-running service — `ticketsmith run`.

use std::path::Path;

use anyhow::{Context, Result};
use tokio::sync::oneshot;
use tracing::{error, info};

use ticketsmith::app::Services;
use ticketsmith::server::{self, AppState};

use super::load_valid_config;

pub async fn cmd_run(config_path: &Path, port: Option<u16>) -> Result<()> {
    let mut config = load_valid_config(config_path)?;
    if let Some(port) = port {
        config.server.port = port;
    }
    std::fs::create_dir_all(&config.work_dir).with_context(|| {
        format!(
            "Failed to create work directory: {}",
            config.work_dir.display()
        )
    })?;

    let port = config.server.port;
    let services = Services::from_config(config)?;
    let scanners = services.scanners();
    for scanner in &scanners {
        scanner.start();
    }

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let state = AppState {
        scanners: scanners.clone(),
    };
    let server = tokio::spawn(server::serve(port, state, async move {
        let _ = shutdown_rx.await;
    }));

    tokio::signal::ctrl_c()
        .await
        .context("Failed to install Ctrl+C handler")?;
    info!("shutting down, waiting for in-flight tickets");

    for scanner in &scanners {
        scanner.stop();
    }
    let _ = shutdown_tx.send(());
    for scanner in &scanners {
        scanner.shutdown().await;
    }

    match server.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(error = %format!("{e:#}"), "health endpoint failed"),
        Err(e) => error!(error = %e, "health endpoint task panicked"),
    }
    info!("stopped");
    Ok(())
}
