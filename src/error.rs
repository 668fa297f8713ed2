use thiserror::Error;

/// Caller misuse of the stream client.
///
/// These are the only stream failures that are reported synchronously;
/// everything that goes wrong on the wire is absorbed by the reconnect loop.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StreamError {
    /// `start` was called with an empty or whitespace-only endpoint.
    #[error("stream endpoint is empty")]
    MissingEndpoint,
    /// The endpoint could not be parsed as a URI.
    #[error("invalid stream endpoint '{endpoint}': {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },
    /// The endpoint scheme is not `ws` or `wss`.
    #[error("unsupported stream scheme '{scheme}' (expected ws or wss)")]
    UnsupportedScheme { scheme: String },
    /// `start` was called outside a tokio runtime.
    #[error("stream client must be started from within a tokio runtime")]
    NoRuntime,
}

/// Transport-level failure on the live stream.
///
/// Never surfaced to consumers; the client treats it as a close.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

/// Errors returned by the backend REST client.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Request could not be sent or the body could not be read.
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// Backend answered with a non-success status.
    #[error("backend returned {status}: {detail}")]
    Status { status: u16, detail: String },
}

impl ApiError {
    /// HTTP status reported by the backend, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Status { status, .. } => Some(*status),
            ApiError::Http(e) => e.status().map(|s| s.as_u16()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_misuse_messages() {
        let err = StreamError::UnsupportedScheme {
            scheme: "http".into(),
        };
        assert_eq!(
            err.to_string(),
            "unsupported stream scheme 'http' (expected ws or wss)"
        );
        assert_eq!(StreamError::MissingEndpoint.to_string(), "stream endpoint is empty");
    }

    #[test]
    fn exposes_status_of_backend_errors() {
        let err = ApiError::Status {
            status: 404,
            detail: "No ESP32 device found".into(),
        };
        assert_eq!(err.status(), Some(404));
        assert_eq!(err.to_string(), "backend returned 404: No ESP32 device found");
    }
}
