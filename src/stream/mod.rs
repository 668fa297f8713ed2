//! ==============================================================================
//! stream - resilient live-data stream client
//! ==============================================================================
//!
//! purpose:
//!     keeps exactly one websocket connection to the backend's /stream endpoint,
//!     reconnects forever with capped exponential backoff, and hands the latest
//!     reading plus connection status to whoever renders them.
//!
//! layout:
//!     - backoff.rs:   delay schedule (500ms doubling, capped at 5s)
//!     - machine.rs:   pure state machine (connecting/connected/disconnected)
//!     - transport.rs: Connector/FrameSource seam + tokio-tungstenite impl
//!     - client.rs:    tokio task that drives the machine, start/stop lifecycle
//!
//! ==============================================================================

mod backoff;
mod client;
mod machine;
mod transport;

pub use backoff::{Backoff, BackoffPolicy};
pub use client::StreamClient;
pub use machine::{Command, Step, StreamMachine};
pub use transport::{Connector, FrameSource, WsConnector};

use std::fmt;
use std::str::FromStr;

use tokio_tungstenite::tungstenite::http::Uri;

use crate::error::StreamError;

/// Validated `ws://` or `wss://` stream address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint(String);

impl Endpoint {
    pub fn parse(raw: &str) -> Result<Self, StreamError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(StreamError::MissingEndpoint);
        }

        let invalid = |reason: String| StreamError::InvalidEndpoint {
            endpoint: trimmed.to_string(),
            reason,
        };
        let uri: Uri = trimmed.parse().map_err(|e| invalid(format!("{e}")))?;

        match uri.scheme_str() {
            Some("ws") | Some("wss") => {}
            Some(other) => {
                return Err(StreamError::UnsupportedScheme {
                    scheme: other.to_string(),
                })
            }
            None => return Err(invalid("missing scheme".to_string())),
        }
        if uri.host().map_or(true, str::is_empty) {
            return Err(invalid("missing host".to_string()));
        }

        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for Endpoint {
    type Err = StreamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
