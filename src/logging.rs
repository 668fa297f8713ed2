//! Tracing/logging bootstrap for the dashboard.

use std::env;

use tracing_subscriber::EnvFilter;

const LOG_ENV: &str = "DESKBUDDY_LOG";

/// Initialize global tracing subscriber with severity gating.
///
/// Precedence:
/// 1) `RUST_LOG`
/// 2) `DESKBUDDY_LOG`
/// 3) `configured_level` (from `[logging] level`)
pub fn init(configured_level: &str) {
    let env_filter = filter_from_env(configured_level);
    let _ = tracing_subscriber::fmt()
        .with_target(true)
        .with_env_filter(env_filter)
        .try_init();
}

fn filter_from_env(configured_level: &str) -> EnvFilter {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }

    let from_var = env::var(LOG_ENV)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .and_then(|v| EnvFilter::try_new(v).ok());
    if let Some(filter) = from_var {
        return filter;
    }

    EnvFilter::try_new(default_directives(configured_level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Quiet the HTTP stack unless explicitly asked for.
fn default_directives(level: &str) -> String {
    let level = match level.trim() {
        "" => "info",
        other => other,
    };
    format!("{level},hyper=warn,reqwest=warn,tungstenite=warn")
}
