//! # Session Snapshot
//!
//! Durable copy of the Session Table. The in-memory map is authoritative
//! while the process runs; these rows exist so that a restart does not drop
//! pairing sessions or unread poll outcomes.

use crate::db::models::{PendingSession, PollOutcome};
use crate::error::AppResult;
use sqlx::SqlitePool;

// Pending sessions

pub async fn load_sessions(pool: &SqlitePool) -> AppResult<Vec<PendingSession>> {
    let sessions = sqlx::query_as::<_, PendingSession>(
        "SELECT session_id, username, channel_id, mode, created_at FROM pending_sessions",
    )
    .fetch_all(pool)
    .await?;

    Ok(sessions)
}

/// Plain INSERT: a duplicate id is a primary-key violation, never an overwrite.
pub async fn insert_session(pool: &SqlitePool, session: &PendingSession) -> AppResult<()> {
    sqlx::query(
        "INSERT INTO pending_sessions (session_id, username, channel_id, mode, created_at)
         VALUES (?, ?, ?, ?, ?)",
    )
    .bind(&session.session_id)
    .bind(&session.username)
    .bind(&session.channel_id)
    .bind(session.mode)
    .bind(session.created_at)
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn update_session(pool: &SqlitePool, session: &PendingSession) -> AppResult<()> {
    sqlx::query(
        "UPDATE pending_sessions
         SET username = ?, channel_id = ?, mode = ?, created_at = ?
         WHERE session_id = ?",
    )
    .bind(&session.username)
    .bind(&session.channel_id)
    .bind(session.mode)
    .bind(session.created_at)
    .bind(&session.session_id)
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn delete_session(pool: &SqlitePool, session_id: &str) -> AppResult<()> {
    sqlx::query("DELETE FROM pending_sessions WHERE session_id = ?")
        .bind(session_id)
        .execute(pool)
        .await?;

    Ok(())
}

// Poll outcomes

pub async fn load_outcomes(pool: &SqlitePool) -> AppResult<Vec<PollOutcome>> {
    let outcomes = sqlx::query_as::<_, PollOutcome>(
        "SELECT session_id, username, user_id, mode, success, created_at FROM poll_outcomes",
    )
    .fetch_all(pool)
    .await?;

    Ok(outcomes)
}

/// Replaces any earlier outcome for the same session; only the latest result matters.
pub async fn upsert_outcome(pool: &SqlitePool, outcome: &PollOutcome) -> AppResult<()> {
    sqlx::query(
        "INSERT INTO poll_outcomes (session_id, username, user_id, mode, success, created_at)
         VALUES (?, ?, ?, ?, ?, ?)
         ON CONFLICT (session_id) DO UPDATE SET
             username = excluded.username,
             user_id = excluded.user_id,
             mode = excluded.mode,
             success = excluded.success,
             created_at = excluded.created_at",
    )
    .bind(&outcome.session_id)
    .bind(&outcome.username)
    .bind(&outcome.user_id)
    .bind(outcome.mode)
    .bind(outcome.success)
    .bind(outcome.created_at)
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn delete_outcome(pool: &SqlitePool, session_id: &str) -> AppResult<()> {
    sqlx::query("DELETE FROM poll_outcomes WHERE session_id = ?")
        .bind(session_id)
        .execute(pool)
        .await?;

    Ok(())
}
