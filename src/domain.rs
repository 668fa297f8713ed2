//! ==============================================================================
//! domain.rs - stream data model and frame decoding
//! ==============================================================================
//!
//! purpose:
//!     the values the stream client hands to its consumer:
//!     - ConnectionStatus: connecting / connected / disconnected
//!     - Reading: latest decoded sensor payload (immutable snapshot)
//!     - StreamUpdate: one ordered emission (status change or new reading)
//!     - StreamSnapshot: the latest status + reading pair
//!
//! wire format:
//!     {"temp_c": 21.5, "hum_pct": 40, "distance_cm": 88.2, "ts_utc": "..."}
//!     every key is optional, null means absent, unknown keys are ignored.
//!
//! ==============================================================================

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Connection state of the live stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Connecting,
    Connected,
    Disconnected,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Disconnected => "disconnected",
        };
        f.write_str(s)
    }
}

/// latest decoded sensor payload
///
/// absent fields stay `None`; a real zero reading is `Some(0.0)`.
/// a new frame replaces the whole reading, it is never merged into the old one.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub temperature_celsius: Option<f64>,
    pub humidity_percent: Option<f64>,
    pub distance_centimeters: Option<f64>,
    pub timestamp_utc: Option<String>,
}

/// shape of one inbound frame
#[derive(Debug, Deserialize)]
struct WireReading {
    #[serde(default)]
    temp_c: Option<f64>,
    #[serde(default)]
    hum_pct: Option<f64>,
    #[serde(default)]
    distance_cm: Option<f64>,
    #[serde(default)]
    ts_utc: Option<String>,
}

impl Reading {
    /// decode one text frame
    ///
    /// the frame must be a JSON object; arrays and scalars are rejected even
    /// though serde would happily map an array onto the struct.
    pub fn from_frame(text: &str) -> Result<Self, serde_json::Error> {
        let object: serde_json::Map<String, serde_json::Value> = serde_json::from_str(text)?;
        let wire: WireReading = serde_json::from_value(serde_json::Value::Object(object))?;

        Ok(Self {
            temperature_celsius: wire.temp_c,
            humidity_percent: wire.hum_pct,
            distance_centimeters: wire.distance_cm,
            timestamp_utc: wire.ts_utc,
        })
    }

    /// true when no field carries a value (e.g. before the first frame)
    pub fn is_empty(&self) -> bool {
        self.temperature_celsius.is_none()
            && self.humidity_percent.is_none()
            && self.distance_centimeters.is_none()
            && self.timestamp_utc.is_none()
    }
}

/// one ordered emission from the stream client
#[derive(Debug, Clone, PartialEq)]
pub enum StreamUpdate {
    Status(ConnectionStatus),
    Reading(Arc<Reading>),
}

/// latest status and reading, as seen by a consumer at any point in time
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreamSnapshot {
    pub status: ConnectionStatus,
    pub reading: Arc<Reading>,
}

impl Default for StreamSnapshot {
    fn default() -> Self {
        Self {
            status: ConnectionStatus::Disconnected,
            reading: Arc::new(Reading::default()),
        }
    }
}
