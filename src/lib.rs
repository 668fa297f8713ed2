//! DeskBuddy dashboard.
//!
//! The heart of the crate is [`stream::StreamClient`], a websocket client that
//! keeps the live sensor feed up with capped exponential backoff and never
//! emits anything once stopped. The rest is the consumer around it: backend
//! REST wrappers, configuration, logging and the axum dashboard.

/// Backend REST client (health, serial bridge).
pub mod backend;
/// `dashboard.toml` schema and loader.
pub mod config;
/// Consumer: shared state, pollers, web server and HTML rendering.
pub mod dashboard;
/// Stream data model and frame decoding.
pub mod domain;
/// Error types.
pub mod error;
/// Tracing bootstrap.
pub mod logging;
/// Resilient live-data stream client.
pub mod stream;

pub use domain::{ConnectionStatus, Reading, StreamSnapshot, StreamUpdate};
pub use error::{ApiError, StreamError, TransportError};
pub use stream::{BackoffPolicy, Endpoint, StreamClient};
