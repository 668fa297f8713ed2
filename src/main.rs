//! ==============================================================================
//! main.rs - deskbuddy dashboard entry point
//! ==============================================================================
//!
//! purpose:
//!     runs the live dashboard for the desk sensor:
//!     - keeps the /stream websocket up (stream client, auto-reconnect)
//!     - polls backend health (10s) and serial bridge status (1s)
//!     - serves the dashboard and a json api
//!
//! relationships:
//!     - uses: config.rs (dashboard.toml), logging.rs (tracing)
//!     - uses: stream (live readings), backend.rs (REST), dashboard.rs (web)
//!
//! ==============================================================================

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

use deskbuddy::backend::BackendClient;
use deskbuddy::config::{ConfigSource, DashboardConfig};
use deskbuddy::dashboard::{self, DashboardState};
use deskbuddy::logging;
use deskbuddy::stream::StreamClient;

#[tokio::main]
async fn main() -> Result<()> {
    // step 1: load configuration, then bring up logging at the configured level
    let (config, source) = DashboardConfig::load_or_default();
    logging::init(&config.logging.level);
    match &source {
        ConfigSource::File(path) => info!(path = %path.display(), "Loaded config"),
        ConfigSource::Rejected { path, error } => {
            warn!(path = %path.display(), %error, "Ignoring invalid config, using defaults")
        }
        ConfigSource::Defaults => warn!("No config file found - using defaults"),
    }
    info!("{}", config.summary());

    // step 2: shared state + backend client
    let state = Arc::new(RwLock::new(DashboardState::default()));
    let backend = BackendClient::new(&config.backend.base_url, config.backend.request_timeout())
        .context("failed to build backend client")?;

    // step 3: live stream
    let mut stream = StreamClient::new(config.stream.backoff());
    stream
        .start(&config.stream.url)
        .with_context(|| format!("cannot start stream client for '{}'", config.stream.url))?;
    let mirror = tokio::spawn(dashboard::mirror_stream(
        stream.watch(),
        state.clone(),
        config.logging.show_sensor_data,
    ));

    // step 4: pollers
    let health = tokio::spawn(dashboard::poll_health(
        backend.clone(),
        state.clone(),
        config.backend.health_interval(),
    ));
    let serial = tokio::spawn(dashboard::poll_serial(
        backend.clone(),
        state.clone(),
        config.backend.serial_poll_interval(),
    ));

    // step 5: web server until it fails or ctrl-c
    let app = dashboard::router(state, backend, config.backend.baudrate);
    let outcome = tokio::select! {
        result = dashboard::serve(&config.server.bind, app) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down...");
            Ok(())
        }
    };

    health.abort();
    serial.abort();
    stream.shutdown().await;
    drop(stream);
    let _ = mirror.await;

    if let Err(e) = &outcome {
        error!(error = %format!("{e:#}"), "Dashboard server failed");
    }
    outcome
}
