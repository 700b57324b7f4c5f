//! # Health and Status Handlers
//!
//! `/health` for load balancers, `/` for humans and keep-alive pings.

use crate::state::AppState;
use axum::{extract::State, Json};
use chrono::Utc;
use serde_json::{json, Value};

/// Health check endpoint
///
/// ## Route
/// GET /health
///
/// ## Response
/// ```json
/// {
///   "status": "healthy",
///   "service": "fastkey-broker"
/// }
/// ```
///
/// Never fails, so it returns `Json<Value>` directly.
pub async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "service": env!("CARGO_PKG_NAME")
    }))
}

/// Service status
///
/// ## Route
/// GET /
pub async fn status(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "online",
        "service": "FastKey Authentication API",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime": format_uptime(state.started_at.elapsed().as_secs()),
        "timestamp": Utc::now().to_rfc3339(),
        "pendingAuthSessions": state.sessions.len().await,
        "connectedChannels": state.hub.connected().await,
        "environment": state.config.environment.as_str(),
    }))
}

fn format_uptime(secs: u64) -> String {
    format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uptime_format() {
        assert_eq!(format_uptime(0), "0h 0m 0s");
        assert_eq!(format_uptime(3723), "1h 2m 3s");
    }
}
