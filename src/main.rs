//! # FastKey Broker
//!
//! Cross-device passkey broker. A desktop browser (the initiator) opens a
//! pairing session and shows its URL as a QR code; a phone (the responder)
//! opens it and runs a passkey ceremony against this server; the result is
//! pushed back to the desktop over a WebSocket, a broadcast, and a poll
//! endpoint.
//!
//! ## Key Concepts
//! - **Pairing session**: short-lived link between initiator and responder
//! - **Ceremony**: the two-step WebAuthn exchange (begin, complete)
//! - **Fan-out**: redundant delivery of the outcome to the initiator

mod ceremony;
mod channels;
mod config;
mod db;
mod error;
mod fanout;
mod handlers;
mod middleware;
mod sessions;
mod state;
mod token;

use crate::config::Config;
use crate::state::AppState;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Main application entry point
///
/// 1. Set up logging (`RUST_LOG` overrides the default filter)
/// 2. Load configuration from the environment and `.env`
/// 3. Open the database and restore the Session Table
/// 4. Start the expiry sweeper
/// 5. Serve HTTP and WebSocket traffic
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,fastkey_broker=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    tracing::info!(
        environment = config.environment.as_str(),
        lenient_sessions = config.lenient_sessions,
        rp_id = %config.rp_id,
        rp_origin = %config.rp_origin,
        "Configuration loaded"
    );
    if config.is_development() {
        tracing::warn!("Development mode: origin and device checks are relaxed");
    }

    let sweep_interval = config.sweep_interval;
    let bind_addr = config.bind_address();

    let app_state = AppState::new(config).await?;
    tracing::info!("Application state initialized");

    sessions::sweeper::spawn(app_state.sessions.clone(), sweep_interval);

    let app = handlers::router(app_state);

    tracing::info!("Starting server on {}", bind_addr);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
