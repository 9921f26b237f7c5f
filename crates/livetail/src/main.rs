//! # livetail
//!
//! Server binary: loads settings, starts the hub, REST service and websocket
//! gateway, and runs until Ctrl-C.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use livetail_events::MemoryStore;
use livetail_server::{HubError, HubEvent, LivetailServer, ServerConfig};
use livetail_settings::LivetailSettings;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

/// How long running tasks get to finish once shutdown starts.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Livetail event streaming server.
#[derive(Parser, Debug)]
#[command(name = "livetail", about = "Stream stored events to websocket clients")]
struct Cli {
    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Path to the settings file (default `~/.livetail/settings.json`).
    #[arg(long)]
    config: Option<PathBuf>,
}

impl Cli {
    fn server_config(&self, settings: &LivetailSettings) -> ServerConfig {
        let mut config = ServerConfig::from(settings);
        if let Some(host) = &self.host {
            config.host.clone_from(host);
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        config
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    let settings_path = args
        .config
        .clone()
        .unwrap_or_else(livetail_settings::settings_path);
    let settings = livetail_settings::load_settings_from_path(&settings_path)
        .with_context(|| format!("Failed to load settings from {}", settings_path.display()))?;

    if settings.logging.json {
        livetail_core::logging::init_subscriber_json(&settings.logging.level);
    } else {
        livetail_core::logging::init_subscriber(&settings.logging.level);
    }

    let metrics = livetail_server::metrics::install_recorder();
    let config = args.server_config(&settings);
    let (error_tx, error_rx) = mpsc::channel(config.hub.channel_capacity.max(1));

    let server = LivetailServer::new(
        config,
        Arc::new(MemoryStore::new()),
        error_tx,
        Some(metrics),
    );
    let _errors = tokio::spawn(drain_errors(error_rx, server.shutdown().token()));
    let _monitor = tokio::spawn(log_hub_events(server.hub().subscribe()));

    let (addr, handle) = server.listen().await.context("Failed to bind server")?;
    tracing::info!(
        "livetail listening on http://{addr}{}",
        server.config().api_prefix
    );

    tokio::select! {
        res = tokio::signal::ctrl_c() => {
            res.context("Failed to listen for ctrl-c")?;
            tracing::info!("Shutting down...");
        }
        () = server.shutdown().token().cancelled_owned() => {
            tracing::warn!("Shutting down after a fatal hub error");
        }
    }

    server.stop(Some(SHUTDOWN_GRACE)).await;
    if tokio::time::timeout(SHUTDOWN_GRACE, handle).await.is_err() {
        tracing::warn!("HTTP server did not stop in time");
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

/// Log everything posted to the process error channel. Errors the hub cannot
/// recover from stop the server.
async fn drain_errors(
    mut errors: mpsc::Receiver<HubError>,
    shutdown: CancellationToken,
) {
    while let Some(error) = errors.recv().await {
        if is_fatal(&error) {
            tracing::error!(error = %error, "hub error");
            shutdown.cancel();
        } else {
            tracing::warn!(error = %error, "session error");
        }
    }
}

fn is_fatal(error: &HubError) -> bool {
    matches!(error, HubError::FeedClosed | HubError::HubStopped)
}

async fn log_hub_events(mut events: broadcast::Receiver<HubEvent>) {
    loop {
        match events.recv().await {
            Ok(HubEvent::Superseded {
                client_id,
                previous,
                current,
            }) => {
                tracing::info!(%client_id, %previous, %current, "connection superseded");
            }
            Ok(HubEvent::FilterDropped { client_id, attempts }) => {
                tracing::debug!(%client_id, attempts, "filter dropped, client never connected");
            }
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(n)) => {
                tracing::debug!(skipped = n, "hub monitor lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
