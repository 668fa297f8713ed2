//! ==============================================================================
//! dashboard.rs - the consumer: shared state, pollers and web server
//! ==============================================================================
//!
//! purpose:
//!     renders whatever the stream client last emitted, alongside backend
//!     health and the serial bridge status. it owns no stream network state:
//!     it only reads snapshots from the client's watch channel.
//!
//! architecture:
//!
//! ```text
//!     ┌──────────────┐  watch   ┌──────────────┐
//!     │ StreamClient ├─────────>│ mirror_stream├──┐
//!     └──────────────┘          └──────────────┘  │
//!     ┌──────────────┐  10s                       ▼
//!     │ poll_health  ├─────────────────────> DashboardState ──> axum (port 3000)
//!     └──────────────┘                            ▲            GET  /
//!     ┌──────────────┐  1s                        │            GET  /api
//!     │ poll_serial  ├────────────────────────────┘            /api/serial/*
//!     └──────────────┘
//! ```
//!
//! relationships:
//!     - uses: backend.rs (REST calls), domain.rs (snapshots)
//!     - used by: main.rs
//!
//! ==============================================================================

use anyhow::Result;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{Html, Json},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, RwLock};
use tower_http::cors::CorsLayer;
use tracing::{debug, info, warn};

use crate::backend::{BackendClient, Health, SerialPort, SerialStatus};
use crate::domain::{ConnectionStatus, Reading, StreamSnapshot};

// ==============================================================================
// shared state
// ==============================================================================
// written by the stream mirror and the pollers, read by the http handlers.

#[derive(Clone, Default, Serialize)]
pub struct DashboardState {
    /// latest stream status + reading
    pub stream: StreamSnapshot,
    /// last successful health answer
    pub health: Option<Health>,
    /// set when the last health poll failed
    pub health_error: Option<String>,
    /// serial bridge status
    pub serial: SerialStatus,
    /// latest raw bridge payload (only while connected)
    pub serial_data: Option<Value>,
    /// ports from the last listing, `None` until the page first asks
    pub ports: Option<Vec<SerialPort>>,
    /// unix timestamp (ms) of last state change
    pub last_update: u64,
}

pub type SharedState = Arc<RwLock<DashboardState>>;

impl DashboardState {
    fn touch(&mut self) {
        self.last_update = now_ms();
    }
}

fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

// ==============================================================================
// background tasks
// ==============================================================================

/// Copy every stream snapshot into the dashboard state until the client goes away
pub async fn mirror_stream(
    mut snapshots: watch::Receiver<StreamSnapshot>,
    state: SharedState,
    show_sensor_data: bool,
) {
    let mut last_status: Option<ConnectionStatus> = None;
    let mut last_reading: Option<Arc<Reading>> = None;

    while snapshots.changed().await.is_ok() {
        let snapshot = snapshots.borrow_and_update().clone();

        if last_status != Some(snapshot.status) {
            info!(status = %snapshot.status, "Stream status changed");
            last_status = Some(snapshot.status);
        }
        let fresh = last_reading
            .as_ref()
            .map_or(true, |prev| !Arc::ptr_eq(prev, &snapshot.reading));
        if fresh && !snapshot.reading.is_empty() && show_sensor_data {
            let r = &snapshot.reading;
            info!(
                temp = %format_value(r.temperature_celsius, "°C", 1),
                humidity = %format_value(r.humidity_percent, "%", 0),
                distance = %format_value(r.distance_centimeters, "cm", 1),
                "Reading"
            );
        }
        last_reading = Some(Arc::clone(&snapshot.reading));

        let mut guard = state.write().await;
        guard.stream = snapshot;
        guard.touch();
    }
    debug!("Stream snapshot channel closed");
}

pub async fn poll_health(backend: BackendClient, state: SharedState, every: Duration) {
    let mut ticker = tokio::time::interval(every);
    loop {
        ticker.tick().await;
        let result = backend.health().await;
        let mut guard = state.write().await;
        match result {
            Ok(health) => {
                guard.health = Some(health);
                guard.health_error = None;
            }
            Err(e) => {
                warn!(error = %e, "Health check failed");
                guard.health = None;
                guard.health_error = Some("Failed to connect to backend".to_string());
            }
        }
        guard.touch();
    }
}

/// Poll bridge status, and the bridge's latest payload while it is connected
pub async fn poll_serial(backend: BackendClient, state: SharedState, every: Duration) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let status = match backend.serial_status().await {
            Ok(status) => status,
            Err(e) => {
                debug!(error = %e, "Serial status poll failed");
                continue;
            }
        };
        let data = if status.connected {
            match backend.serial_data().await {
                Ok(d) => d.data,
                Err(e) => {
                    debug!(error = %e, "Serial data poll failed");
                    None
                }
            }
        } else {
            None
        };

        let mut guard = state.write().await;
        guard.serial = status;
        if data.is_some() || !guard.serial.connected {
            guard.serial_data = data;
        }
        guard.touch();
    }
}

// ==============================================================================
// web server
// ==============================================================================

#[derive(Clone)]
struct AppContext {
    state: SharedState,
    backend: BackendClient,
    baudrate: u32,
}

pub fn router(state: SharedState, backend: BackendClient, baudrate: u32) -> Router {
    Router::new()
        .route("/", get(dashboard_handler))
        .route("/api", get(api_handler))
        .route("/api/serial/ports", get(ports_handler))
        .route("/api/serial/connect", post(connect_handler))
        .route("/api/serial/auto-connect", post(auto_connect_handler))
        .route("/api/serial/disconnect", post(disconnect_handler))
        .layer(CorsLayer::permissive())
        .with_state(AppContext {
            state,
            backend,
            baudrate,
        })
}

pub async fn serve(bind: &str, app: Router) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!(addr = %listener.local_addr()?, "Dashboard listening");
    axum::serve(listener, app).await?;
    Ok(())
}

type ApiResult = Result<Json<Value>, (StatusCode, Json<Value>)>;

fn api_error(status: StatusCode, message: impl Into<String>) -> (StatusCode, Json<Value>) {
    (
        status,
        Json(json!({"status": "error", "message": message.into()})),
    )
}

async fn dashboard_handler(State(ctx): State<AppContext>) -> Html<String> {
    let state = ctx.state.read().await;
    Html(render_dashboard(&state))
}

/// json api endpoint for programmatic access
async fn api_handler(State(ctx): State<AppContext>) -> Json<DashboardState> {
    let state = ctx.state.read().await;
    Json(state.clone())
}

async fn ports_handler(State(ctx): State<AppContext>) -> ApiResult {
    match ctx.backend.list_ports().await {
        Ok(ports) => {
            let body = json!({ "ports": ports });
            let mut state = ctx.state.write().await;
            state.ports = Some(ports);
            state.touch();
            Ok(Json(body))
        }
        Err(e) => Err(api_error(StatusCode::BAD_GATEWAY, e.to_string())),
    }
}

#[derive(Debug, Deserialize)]
struct ConnectParams {
    #[serde(default)]
    port: String,
    baudrate: Option<u32>,
}

async fn connect_handler(
    State(ctx): State<AppContext>,
    Json(params): Json<ConnectParams>,
) -> ApiResult {
    let port = params.port.trim();
    if port.is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "Please select a port"));
    }
    let baudrate = params.baudrate.unwrap_or(ctx.baudrate);
    match ctx.backend.connect(port, baudrate).await {
        Ok(conn) => {
            info!(port = %conn.port, baudrate = conn.baudrate, "Serial bridge connected");
            Ok(Json(json!(conn)))
        }
        Err(e) => Err(api_error(StatusCode::BAD_GATEWAY, e.to_string())),
    }
}

#[derive(Debug, Deserialize)]
struct AutoConnectParams {
    baudrate: Option<u32>,
}

async fn auto_connect_handler(
    State(ctx): State<AppContext>,
    Query(params): Query<AutoConnectParams>,
) -> ApiResult {
    let baudrate = params.baudrate.unwrap_or(ctx.baudrate);
    match ctx.backend.auto_connect(baudrate).await {
        Ok(conn) => {
            info!(port = %conn.port, "Serial bridge auto-connected");
            Ok(Json(json!(conn)))
        }
        Err(e) => Err(api_error(StatusCode::BAD_GATEWAY, e.to_string())),
    }
}

async fn disconnect_handler(State(ctx): State<AppContext>) -> ApiResult {
    match ctx.backend.disconnect().await {
        Ok(()) => {
            let mut state = ctx.state.write().await;
            state.serial_data = None;
            state.serial.connected = false;
            state.touch();
            Ok(Json(json!({"status": "disconnected"})))
        }
        Err(e) => Err(api_error(StatusCode::BAD_GATEWAY, e.to_string())),
    }
}

// ==============================================================================
// html rendering
// ==============================================================================

/// (label, css class) for a stream status
pub fn status_badge(status: ConnectionStatus) -> (&'static str, &'static str) {
    match status {
        ConnectionStatus::Connected => ("Live", "ok"),
        ConnectionStatus::Connecting => ("Connecting...", "warning"),
        ConnectionStatus::Disconnected => ("Disconnected", "error"),
    }
}

/// `--` for absent values; a real zero still renders as a number
pub fn format_value(value: Option<f64>, unit: &str, decimals: usize) -> String {
    match value {
        Some(v) => format!("{v:.decimals$}{unit}"),
        None => "--".to_string(),
    }
}

pub fn render_dashboard(state: &DashboardState) -> String {
    let (status_text, status_class) = status_badge(state.stream.status);
    let reading = &state.stream.reading;

    let tiles = [
        ("🌡️", "Temperature", format_value(reading.temperature_celsius, "°C", 1)),
        ("💧", "Humidity", format_value(reading.humidity_percent, "%", 0)),
        ("📏", "Distance", format_value(reading.distance_centimeters, "cm", 1)),
    ]
    .iter()
    .map(|(icon, label, value)| {
        format!(
            r#"<div class="sensor-tile"><div class="sensor-icon">{icon}</div><div class="sensor-label">{label}</div><div class="sensor-value">{value}</div></div>"#
        )
    })
    .collect::<Vec<_>>()
    .join("\n      ");

    let health = match (&state.health, &state.health_error) {
        (Some(h), _) => format!(
            r#"<div class="status"><div class="status-indicator ok"></div><p>Status: {}</p></div>
      <p>Time (UTC): {}</p>
      <div class="status"><div class="status-indicator {}"></div><p>Database: {}</p></div>"#,
            html_escape(&h.status),
            html_escape(&h.time_utc),
            if h.db_ok { "ok" } else { "error" },
            if h.db_ok { "Connected" } else { "Disconnected" },
        ),
        (None, Some(err)) => format!(
            r#"<div class="status"><div class="status-indicator error"></div><p>{}</p></div>"#,
            html_escape(err)
        ),
        (None, None) => "<p>Loading...</p>".to_string(),
    };

    let serial = if state.serial.connected {
        format!(
            "Connected to {}",
            html_escape(state.serial.port.as_deref().unwrap_or("unknown port"))
        )
    } else {
        "Not connected".to_string()
    };
    let serial_class = if state.serial.connected { "ok" } else { "error" };
    let serial_data = state
        .serial_data
        .as_ref()
        .and_then(|d| serde_json::to_string_pretty(d).ok())
        .map(|d| format!("<h3>Latest Data:</h3><pre>{}</pre>", html_escape(&d)))
        .unwrap_or_default();
    let controls = render_serial_controls(state);
    let timestamp = reading
        .timestamp_utc
        .as_deref()
        .map(|ts| format!("<p>Last reading (UTC): {}</p>", html_escape(ts)))
        .unwrap_or_default();

    format!(
        r#"<!doctype html>
<html>
<head>
  <meta charset="utf-8">
  <title>DeskBuddy Dashboard</title>
  <style>
    body {{ font-family: system-ui; padding: 2rem; background: #1a1a2e; color: #eee; }}
    .card {{ background: #16213e; padding: 1rem 1.5rem; border-radius: 8px; margin-bottom: 1rem; }}
    .status {{ display: flex; align-items: center; gap: 0.5rem; }}
    .status-indicator {{ width: 12px; height: 12px; border-radius: 50%; }}
    .ok {{ background: #4ade80; }} .warning {{ background: #facc15; }} .error {{ background: #f87171; }}
    .sensor-grid {{ display: grid; grid-template-columns: repeat(3, 1fr); gap: 1rem; margin-bottom: 1rem; }}
    .sensor-tile {{ background: #16213e; padding: 1rem; border-radius: 8px; text-align: center; }}
    .sensor-value {{ font-size: 2rem; font-weight: bold; }}
    pre {{ background: #1a1a1a; padding: 1rem; border-radius: 4px; overflow: auto; max-height: 300px; }}
  </style>
</head>
<body>
  <h1>Dashboard</h1>
  <div class="card">
    <div class="status"><div class="status-indicator {status_class}"></div><p>Stream: {status_text}</p></div>
    {timestamp}
  </div>
  <div class="sensor-grid">
      {tiles}
  </div>
  <div class="card">
    <h2>Backend Status</h2>
      {health}
  </div>
  <div class="card">
    <h2>ESP32 Connection</h2>
    <div class="status"><div class="status-indicator {serial_class}"></div><p>{serial}</p></div>
    {controls}
    {serial_data}
  </div>
  <script>{SERIAL_SCRIPT}</script>
</body>
</html>"#
    )
}

/// port picker plus connect / auto-connect / disconnect / refresh buttons
fn render_serial_controls(state: &DashboardState) -> String {
    let connected_port = state.serial.port.as_deref().filter(|_| state.serial.connected);
    let options = match &state.ports {
        Some(ports) if !ports.is_empty() => ports
            .iter()
            .map(|p| {
                let selected = if connected_port == Some(p.port.as_str()) {
                    " selected"
                } else {
                    ""
                };
                let label = if p.description.is_empty() {
                    html_escape(&p.port)
                } else {
                    format!("{} - {}", html_escape(&p.port), html_escape(&p.description))
                };
                format!(r#"<option value="{}"{selected}>{label}</option>"#, html_escape(&p.port))
            })
            .collect::<Vec<_>>()
            .join(""),
        Some(_) => r#"<option value="">No ports found</option>"#.to_string(),
        None => r#"<option value="">Loading ports...</option>"#.to_string(),
    };
    let disabled = if state.serial.connected { " disabled" } else { "" };
    format!(
        r#"<div class="controls" data-ports-loaded="{}">
      <select id="port"{disabled}>{options}</select>
      <button onclick="refreshPorts()">Refresh</button>
      <button onclick="serial('connect')"{disabled}>Connect</button>
      <button onclick="serial('auto-connect')"{disabled}>Auto-connect</button>
      <button onclick="serial('disconnect')">Disconnect</button>
      <p id="serial-msg"></p>
    </div>"#,
        state.ports.is_some()
    )
}

/// drives the /api/serial/* proxies; reloads every 2s unless the picker is in use
const SERIAL_SCRIPT: &str = r#"
const portSelect = document.getElementById('port');
const msg = document.getElementById('serial-msg');
const saved = sessionStorage.getItem('port');
if (saved && !portSelect.disabled) { portSelect.value = saved; }
portSelect.addEventListener('change', () => sessionStorage.setItem('port', portSelect.value));
async function refreshPorts() {
  const res = await fetch('/api/serial/ports');
  if (res.ok) { location.reload(); } else { msg.textContent = (await res.json()).message; }
}
async function serial(action) {
  const opts = { method: 'POST', headers: { 'Content-Type': 'application/json' } };
  if (action === 'connect') { opts.body = JSON.stringify({ port: portSelect.value }); }
  const res = await fetch('/api/serial/' + action, opts);
  const body = await res.json();
  msg.textContent = res.ok ? (body.port ? 'Connected to ' + body.port : 'Disconnected') : body.message;
}
if (document.querySelector('.controls').dataset.portsLoaded === 'false') {
  fetch('/api/serial/ports').then(r => { if (r.ok) { location.reload(); } });
}
setInterval(() => { if (document.activeElement !== portSelect) { location.reload(); } }, 2000);
"#;

/// escape html special characters to prevent xss
fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state_with(reading: Reading, status: ConnectionStatus) -> DashboardState {
        DashboardState {
            stream: StreamSnapshot {
                status,
                reading: Arc::new(reading),
            },
            ..DashboardState::default()
        }
    }

    #[test]
    fn formats_absent_and_zero_values() {
        assert_eq!(format_value(None, "°C", 1), "--");
        assert_eq!(format_value(Some(0.0), "°C", 1), "0.0°C");
        assert_eq!(format_value(Some(45.6), "%", 0), "46%");
        assert_eq!(format_value(Some(87.26), "cm", 1), "87.3cm");
    }

    #[test]
    fn maps_status_to_badge() {
        assert_eq!(status_badge(ConnectionStatus::Connected), ("Live", "ok"));
        assert_eq!(
            status_badge(ConnectionStatus::Connecting),
            ("Connecting...", "warning")
        );
        assert_eq!(
            status_badge(ConnectionStatus::Disconnected),
            ("Disconnected", "error")
        );
    }

    #[test]
    fn renders_partial_reading_with_placeholders() {
        let state = state_with(
            Reading {
                temperature_celsius: Some(21.5),
                ..Reading::default()
            },
            ConnectionStatus::Connected,
        );
        let html = render_dashboard(&state);

        assert!(html.contains("Stream: Live"));
        assert!(html.contains("21.5°C"));
        assert_eq!(html.matches(r#"<div class="sensor-value">--</div>"#).count(), 2);
        assert!(html.contains("<p>Loading...</p>"));
        assert!(html.contains("Not connected"));
    }

    #[test]
    fn renders_health_and_escapes_serial_data() {
        let mut state = state_with(Reading::default(), ConnectionStatus::Disconnected);
        state.health = Some(Health {
            status: "ok".into(),
            time_utc: "2025-01-05T10:00:00+00:00".into(),
            db_ok: false,
        });
        state.serial = SerialStatus {
            connected: true,
            port: Some("/dev/ttyUSB0".into()),
            has_data: true,
        };
        state.serial_data = Some(json!({"raw": "<script>"}));

        let html = render_dashboard(&state);
        assert!(html.contains("Stream: Disconnected"));
        assert!(html.contains("Database: Disconnected"));
        assert!(html.contains("Connected to /dev/ttyUSB0"));
        assert!(html.contains("&lt;script&gt;"));
        // only the page's own script tag
        assert_eq!(html.matches("<script>").count(), 1);
    }

    #[test]
    fn renders_port_picker_with_connected_port_selected() {
        let mut state = DashboardState::default();
        assert!(render_dashboard(&state).contains("Loading ports..."));

        state.ports = Some(Vec::new());
        assert!(render_dashboard(&state).contains("No ports found"));

        state.ports = Some(vec![
            SerialPort {
                port: "COM3".into(),
                description: "CP2102 USB to UART".into(),
                hwid: String::new(),
            },
            SerialPort {
                port: "/dev/ttyUSB0".into(),
                description: String::new(),
                hwid: String::new(),
            },
        ]);
        state.serial = SerialStatus {
            connected: true,
            port: Some("/dev/ttyUSB0".into()),
            has_data: false,
        };
        let html = render_dashboard(&state);
        assert!(html.contains(r#"<option value="COM3">COM3 - CP2102 USB to UART</option>"#));
        assert!(html.contains(r#"<option value="/dev/ttyUSB0" selected>/dev/ttyUSB0</option>"#));
        assert!(html.contains(r#"<select id="port" disabled>"#));
        assert!(html.contains(r#"data-ports-loaded="true""#));
    }

    #[test]
    fn renders_health_error() {
        let mut state = DashboardState::default();
        state.health_error = Some("Failed to connect to backend".into());
        let html = render_dashboard(&state);
        assert!(html.contains("Failed to connect to backend"));
    }

    #[tokio::test]
    async fn mirrors_stream_snapshots_into_state() {
        let (tx, rx) = watch::channel(StreamSnapshot::default());
        let state: SharedState = Arc::new(RwLock::new(DashboardState::default()));
        let mirror = tokio::spawn(mirror_stream(rx, state.clone(), false));

        tx.send_replace(StreamSnapshot {
            status: ConnectionStatus::Connected,
            reading: Arc::new(Reading {
                humidity_percent: Some(48.0),
                ..Reading::default()
            }),
        });
        drop(tx);
        mirror.await.expect("mirror task finishes");

        let guard = state.read().await;
        assert_eq!(guard.stream.status, ConnectionStatus::Connected);
        assert_eq!(guard.stream.reading.humidity_percent, Some(48.0));
        assert!(guard.last_update > 0);
    }
}
