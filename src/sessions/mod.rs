//! # Session Table
//!
//! Owns every pairing session (`PendingSession`) and every unread poll
//! outcome (`PollOutcome`). The maps live in memory and are authoritative
//! while the process runs; each mutation writes its row to the SQLite
//! snapshot before touching memory. A write that fails outright leaves memory
//! unchanged and returns the error. A write that times out may still commit,
//! so memory takes the change and the lag is logged; the snapshot only
//! matters again on restart.
//!
//! Mutations hold the map lock across the snapshot write. Session volume is
//! low, so serialising them is cheap and keeps the ordering obvious.

pub mod sweeper;

use crate::db::models::{CeremonyMode, PendingSession, PollOutcome};
use crate::db::sessions as snapshot;
use crate::error::{bounded, AppError, AppResult};
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Channel id recorded on a session before any initiator is bound to it.
pub const UNBOUND_CHANNEL: &str = "unbound";

pub struct SessionTable {
    pool: SqlitePool,
    ttl: chrono::Duration,
    op_timeout: Duration,
    sessions: Mutex<HashMap<String, PendingSession>>,
    outcomes: Mutex<HashMap<String, PollOutcome>>,
}

impl SessionTable {
    /// Restore the table from its snapshot.
    pub async fn load(pool: SqlitePool, ttl: Duration, op_timeout: Duration) -> AppResult<Self> {
        let sessions = snapshot::load_sessions(&pool)
            .await?
            .into_iter()
            .map(|s| (s.session_id.clone(), s))
            .collect::<HashMap<_, _>>();
        let outcomes = snapshot::load_outcomes(&pool)
            .await?
            .into_iter()
            .map(|o| (o.session_id.clone(), o))
            .collect::<HashMap<_, _>>();

        tracing::info!(
            sessions = sessions.len(),
            outcomes = outcomes.len(),
            "Session table restored from snapshot"
        );

        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|_| AppError::Internal("session TTL out of range".to_string()))?;

        Ok(Self {
            pool,
            ttl,
            op_timeout,
            sessions: Mutex::new(sessions),
            outcomes: Mutex::new(outcomes),
        })
    }

    /// Open a new pairing session with an unguessable id.
    pub async fn create(
        &self,
        username: &str,
        mode: CeremonyMode,
        channel_id: Option<&str>,
    ) -> AppResult<PendingSession> {
        let session = PendingSession::new(
            Uuid::new_v4().to_string(),
            username.to_string(),
            channel_id.unwrap_or(UNBOUND_CHANNEL).to_string(),
            mode,
        );
        self.insert(session).await
    }

    /// Store `session` under its own id. Never overwrites: an existing id is
    /// reported as `SessionExists`.
    pub async fn insert(&self, session: PendingSession) -> AppResult<PendingSession> {
        let mut sessions = self.sessions.lock().await;
        if sessions.contains_key(&session.session_id) {
            tracing::error!(session_id = %session.session_id, "Session id collision");
            return Err(AppError::SessionExists(session.session_id));
        }

        self.persist("insert", &session.session_id, snapshot::insert_session(&self.pool, &session))
            .await?;
        sessions.insert(session.session_id.clone(), session.clone());

        tracing::debug!(
            session_id = %session.session_id,
            username = %session.username,
            mode = ?session.mode,
            "Pairing session created"
        );
        Ok(session)
    }

    /// Lenient lookup used by ceremony endpoints: return the session, or
    /// create a minimal one under the caller's id.
    ///
    /// Only the existence of the pairing session is relaxed here; challenge
    /// and counter checks run unchanged afterwards.
    pub async fn ensure(
        &self,
        session_id: &str,
        username: &str,
        mode: CeremonyMode,
        placeholder_channel: &str,
    ) -> AppResult<PendingSession> {
        if let Some(existing) = self.get(session_id).await {
            return Ok(existing);
        }

        tracing::warn!(session_id, username, "No pending session found, creating one");
        let session = PendingSession::new(
            session_id.to_string(),
            username.to_string(),
            placeholder_channel.to_string(),
            mode,
        );
        match self.insert(session).await {
            // Lost a race with another request creating the same id
            Err(AppError::SessionExists(_)) => self
                .get(session_id)
                .await
                .ok_or_else(|| AppError::SessionNotFound(session_id.to_string())),
            other => other,
        }
    }

    pub async fn get(&self, session_id: &str) -> Option<PendingSession> {
        self.sessions.lock().await.get(session_id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    /// Bind a live delivery channel to an existing session.
    pub async fn associate(&self, session_id: &str, channel_id: &str) -> AppResult<PendingSession> {
        self.modify(session_id, |s| s.channel_id = channel_id.to_string()).await
    }

    /// Keep a session alive across pairing retries.
    pub async fn touch(&self, session_id: &str) -> AppResult<PendingSession> {
        self.modify(session_id, |s| s.created_at = Utc::now()).await
    }

    /// Move a session to another user. Only lenient endpoints call this.
    pub async fn rebind_username(&self, session_id: &str, username: &str) -> AppResult<PendingSession> {
        self.modify(session_id, |s| s.username = username.to_string()).await
    }

    async fn modify<F>(&self, session_id: &str, change: F) -> AppResult<PendingSession>
    where
        F: FnOnce(&mut PendingSession),
    {
        let mut sessions = self.sessions.lock().await;
        let mut updated = sessions
            .get(session_id)
            .cloned()
            .ok_or_else(|| AppError::SessionNotFound(session_id.to_string()))?;
        change(&mut updated);

        self.persist("update", session_id, snapshot::update_session(&self.pool, &updated))
            .await?;
        sessions.insert(session_id.to_string(), updated.clone());
        Ok(updated)
    }

    /// Remove a session. Returns whether it existed; retiring twice is fine.
    pub async fn retire(&self, session_id: &str) -> AppResult<bool> {
        let mut sessions = self.sessions.lock().await;
        if !sessions.contains_key(session_id) {
            return Ok(false);
        }

        self.persist("delete", session_id, snapshot::delete_session(&self.pool, session_id))
            .await?;
        sessions.remove(session_id);
        tracing::debug!(session_id, "Pairing session retired");
        Ok(true)
    }

    /// Park a ceremony result for the initiator's poll.
    pub async fn record_outcome(&self, outcome: PollOutcome) -> AppResult<()> {
        let mut outcomes = self.outcomes.lock().await;
        self.persist("outcome", &outcome.session_id, snapshot::upsert_outcome(&self.pool, &outcome))
            .await?;
        outcomes.insert(outcome.session_id.clone(), outcome);
        Ok(())
    }

    /// Hand out a parked result exactly once.
    pub async fn take_outcome(&self, session_id: &str) -> AppResult<Option<PollOutcome>> {
        let mut outcomes = self.outcomes.lock().await;
        if !outcomes.contains_key(session_id) {
            return Ok(None);
        }

        self.persist("outcome delete", session_id, snapshot::delete_outcome(&self.pool, session_id))
            .await?;
        Ok(outcomes.remove(session_id))
    }

    /// Retire every session (and drop every unread outcome) older than the TTL
    /// as of `now`. Returns the retired session ids. A session that fails to
    /// retire is logged and left for the next sweep.
    pub async fn sweep_expired(&self, now: DateTime<Utc>) -> Vec<String> {
        let cutoff = now - self.ttl;

        let expired: Vec<String> = {
            let sessions = self.sessions.lock().await;
            sessions
                .values()
                .filter(|s| s.created_at < cutoff)
                .map(|s| s.session_id.clone())
                .collect()
        };

        let mut retired = Vec::with_capacity(expired.len());
        for session_id in expired {
            match self.retire(&session_id).await {
                Ok(true) => {
                    tracing::info!(session_id = %session_id, "Cleaning up expired session");
                    retired.push(session_id);
                }
                Ok(false) => {}
                Err(e) => tracing::error!(session_id = %session_id, "Failed to retire expired session: {}", e),
            }
        }

        let stale: Vec<String> = {
            let outcomes = self.outcomes.lock().await;
            outcomes
                .values()
                .filter(|o| o.created_at < cutoff)
                .map(|o| o.session_id.clone())
                .collect()
        };
        for session_id in stale {
            match self.take_outcome(&session_id).await {
                Ok(_) => tracing::debug!(session_id = %session_id, "Dropped unread poll outcome"),
                Err(e) => tracing::error!(session_id = %session_id, "Failed to drop poll outcome: {}", e),
            }
        }

        retired
    }

    /// Bounded snapshot write. A timeout counts as applied: the statement
    /// may still commit, and memory is the source of truth until restart.
    async fn persist<F>(&self, op: &str, session_id: &str, write: F) -> AppResult<()>
    where
        F: Future<Output = AppResult<()>>,
    {
        match bounded(self.op_timeout, write).await {
            Err(AppError::Timeout(limit)) => {
                tracing::warn!(session_id, op, ?limit, "Snapshot write timed out, applying in memory");
                Ok(())
            }
            other => other,
        }
    }
}
