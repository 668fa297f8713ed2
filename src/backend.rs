//! ==============================================================================
//! backend.rs - REST client for the DeskBuddy backend
//! ==============================================================================
//!
//! purpose:
//!     thin typed wrappers over the backend's plain REST endpoints:
//!     - GET  /health                 backend + database health
//!     - GET  /serial/ports           serial ports visible to the backend
//!     - POST /serial/connect         open a specific port
//!     - POST /serial/auto-connect    let the backend find the ESP32
//!     - POST /serial/disconnect      close the bridge
//!     - GET  /serial/status          bridge status
//!     - GET  /serial/data            latest raw bridge payload
//!
//! relationships:
//!     - used by: dashboard.rs (pollers and proxy handlers)
//!     - independent of the live stream client
//!
//! ==============================================================================

use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::error::ApiError;

pub const DEFAULT_BAUDRATE: u32 = 115_200;

/// GET /health
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Health {
    pub status: String,
    pub time_utc: String,
    pub db_ok: bool,
}

/// one serial port as listed by the backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerialPort {
    pub port: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub hwid: String,
}

#[derive(Debug, Deserialize)]
struct PortList {
    #[serde(default)]
    ports: Vec<SerialPort>,
}

/// GET /serial/status
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SerialStatus {
    pub connected: bool,
    pub port: Option<String>,
    #[serde(default)]
    pub has_data: bool,
}

/// GET /serial/data
///
/// `data` is whatever the bridge last parsed; it is shown verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerialData {
    pub connected: bool,
    pub port: Option<String>,
    pub data: Option<serde_json::Value>,
}

/// answer to connect / auto-connect
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerialConnection {
    pub status: String,
    pub port: String,
    pub baudrate: u32,
    #[serde(default)]
    pub auto_detected: bool,
}

#[derive(Debug, Serialize)]
struct ConnectRequest<'a> {
    port: &'a str,
    baudrate: u32,
}

/// FastAPI error body
#[derive(Debug, Deserialize)]
struct ErrorBody {
    detail: serde_json::Value,
}

#[derive(Debug, Clone)]
pub struct BackendClient {
    http: Client,
    base_url: String,
}

impl BackendClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ApiError> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn health(&self) -> Result<Health, ApiError> {
        self.send(self.http.get(self.url("/health"))).await
    }

    pub async fn list_ports(&self) -> Result<Vec<SerialPort>, ApiError> {
        let list: PortList = self.send(self.http.get(self.url("/serial/ports"))).await?;
        Ok(list.ports)
    }

    pub async fn connect(&self, port: &str, baudrate: u32) -> Result<SerialConnection, ApiError> {
        let body = ConnectRequest { port, baudrate };
        self.send(self.http.post(self.url("/serial/connect")).json(&body))
            .await
    }

    pub async fn auto_connect(&self, baudrate: u32) -> Result<SerialConnection, ApiError> {
        let request = self
            .http
            .post(self.url("/serial/auto-connect"))
            .query(&[("baudrate", baudrate)]);
        self.send(request).await
    }

    pub async fn disconnect(&self) -> Result<(), ApiError> {
        let _: serde_json::Value = self.send(self.http.post(self.url("/serial/disconnect"))).await?;
        Ok(())
    }

    pub async fn serial_status(&self) -> Result<SerialStatus, ApiError> {
        self.send(self.http.get(self.url("/serial/status"))).await
    }

    pub async fn serial_data(&self) -> Result<SerialData, ApiError> {
        self.send(self.http.get(self.url("/serial/data"))).await
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, ApiError> {
        let response = request.send().await?;
        let response = check_status(response).await?;
        Ok(response.json().await?)
    }
}

async fn check_status(response: Response) -> Result<Response, ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    debug!(status = status.as_u16(), url = %response.url(), "Backend request failed");
    let body = response.text().await.unwrap_or_default();
    Err(ApiError::Status {
        status: status.as_u16(),
        detail: error_detail(&body),
    })
}

/// FastAPI puts the message in `detail` (a string, or a list for validation
/// errors); anything else is passed through as-is.
fn error_detail(body: &str) -> String {
    match serde_json::from_str::<ErrorBody>(body) {
        Ok(ErrorBody {
            detail: serde_json::Value::String(s),
        }) => s,
        Ok(ErrorBody { detail }) => detail.to_string(),
        Err(_) if body.trim().is_empty() => "no details".to_string(),
        Err(_) => body.trim().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_fastapi_detail() {
        assert_eq!(
            error_detail(r#"{"detail": "No ESP32 device found."}"#),
            "No ESP32 device found."
        );
        assert_eq!(
            error_detail(r#"{"detail": [{"loc": ["body", "port"]}]}"#),
            r#"[{"loc":["body","port"]}]"#
        );
        assert_eq!(error_detail("Internal Server Error"), "Internal Server Error");
        assert_eq!(error_detail(""), "no details");
    }

    #[test]
    fn trims_trailing_slash_from_base_url() {
        let client = BackendClient::new("http://127.0.0.1:8000/", Duration::from_secs(1))
            .expect("client builds");
        assert_eq!(client.base_url(), "http://127.0.0.1:8000");
        assert_eq!(client.url("/health"), "http://127.0.0.1:8000/health");
    }

    #[test]
    fn decodes_serial_payloads() {
        let status: SerialStatus =
            serde_json::from_str(r#"{"connected": true, "port": "/dev/ttyUSB0", "has_data": false}"#)
                .expect("status decodes");
        assert!(status.connected);
        assert_eq!(status.port.as_deref(), Some("/dev/ttyUSB0"));

        let data: SerialData =
            serde_json::from_str(r#"{"connected": false, "port": null, "data": null}"#)
                .expect("data decodes");
        assert!(data.data.is_none());

        let list: PortList = serde_json::from_str(
            r#"{"ports": [{"port": "COM3", "description": "CP2102 USB to UART", "hwid": "USB VID:PID=10C4:EA60"}]}"#,
        )
        .expect("ports decode");
        assert_eq!(list.ports[0].port, "COM3");
    }
}
