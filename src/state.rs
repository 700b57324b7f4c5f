//! # Application State
//!
//! Shared state handed to every request handler and socket task. Axum clones
//! it per request, which only bumps reference counts.
//!
//! ## Wiring
//! 1. Open the SQLite pool and run migrations
//! 2. Restore the Session Table from its snapshot
//! 3. Build the channel hub, fan-out, token issuer, and Ceremony Manager on top

use crate::ceremony::verifier::{CeremonyVerifier, SignatureVerifier};
use crate::ceremony::{CeremonyManager, CeremonyPolicy};
use crate::channels::ChannelHub;
use crate::config::Config;
use crate::db::{self, RecordStore, SqliteRecordStore};
use crate::fanout::OutcomeFanout;
use crate::sessions::SessionTable;
use crate::token::TokenIssuer;
use anyhow::Result;
use sqlx::sqlite::SqlitePool;
use std::sync::Arc;
use std::time::Instant;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,

    /// Pending pairing sessions and unread poll outcomes
    pub sessions: Arc<SessionTable>,

    /// The only writer of user records
    pub ceremonies: Arc<CeremonyManager>,

    /// Live WebSocket channels
    pub hub: Arc<ChannelHub>,

    pub tokens: TokenIssuer,

    pub started_at: Instant,
}

impl AppState {
    /// Connect to the configured database and build the full state.
    ///
    /// # Errors
    /// Fails if the database cannot be opened, migrations fail, or the
    /// session snapshot cannot be read.
    pub async fn new(config: Config) -> Result<Self> {
        let pool = db::connect(&config.database_url, config.store_timeout).await?;
        let verifier = Arc::new(SignatureVerifier::new(&config.rp_id));
        Self::with_verifier(config, pool, verifier).await
    }

    pub async fn with_verifier(
        config: Config,
        pool: SqlitePool,
        verifier: Arc<dyn CeremonyVerifier>,
    ) -> Result<Self> {
        let sessions = Arc::new(
            SessionTable::load(pool.clone(), config.session_ttl, config.store_timeout).await?,
        );
        let store: Arc<dyn RecordStore> = Arc::new(SqliteRecordStore::new(pool));
        let hub = Arc::new(ChannelHub::new());
        let fanout = Arc::new(OutcomeFanout::new(hub.clone(), sessions.clone()));
        let tokens = TokenIssuer::new(&config.jwt_secret);

        let ceremonies = Arc::new(CeremonyManager::new(
            store,
            sessions.clone(),
            verifier,
            fanout,
            tokens.clone(),
            CeremonyPolicy::from_config(&config),
        ));

        Ok(AppState {
            config: Arc::new(config),
            sessions,
            ceremonies,
            hub,
            tokens,
            started_at: Instant::now(),
        })
    }

    #[cfg(test)]
    pub async fn for_tests(config: Config) -> Self {
        let verifier = Arc::new(SignatureVerifier::new(&config.rp_id));
        Self::with_verifier(config, db::test_pool().await, verifier)
            .await
            .expect("test state")
    }
}
