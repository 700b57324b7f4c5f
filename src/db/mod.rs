//! # Database Module
//!
//! - `models`: User, Credential, Device, PendingSession, PollOutcome
//! - `users`: the SQLite-backed [`RecordStore`]
//! - `credentials` / `devices`: child rows of a user record
//! - `sessions`: durable snapshot rows for the Session Table
//!
//! The ceremony code only sees the [`RecordStore`] trait: keyed
//! read/create/update of whole user records, with no transactions promised.
//! Callers serialise read-modify-write sequences themselves (see
//! `ceremony::locks`).

pub mod credentials;
pub mod devices;
pub mod models;
pub mod sessions;
pub mod users;

use crate::db::models::User;
use crate::error::AppResult;
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use std::time::Duration;

pub use users::SqliteRecordStore;

/// Per-user record store consumed by the Ceremony Manager.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn find_by_username(&self, username: &str) -> AppResult<Option<User>>;

    async fn find_by_id(&self, user_id: &str) -> AppResult<Option<User>>;

    /// Insert a fresh record for `username`. Fails if the name is taken.
    async fn create(&self, username: &str) -> AppResult<User>;

    /// Overwrite the stored record with `user` (row plus all children).
    async fn update(&self, user: &User) -> AppResult<()>;
}

/// Open the SQLite pool and bring the schema up to date.
///
/// In-memory databases are per-connection in SQLite, so they get a pool of
/// exactly one connection.
pub async fn connect(database_url: &str, acquire_timeout: Duration) -> anyhow::Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
    let in_memory = database_url.contains(":memory:");

    let mut pool_options = SqlitePoolOptions::new()
        .max_connections(if in_memory { 1 } else { 8 })
        .acquire_timeout(acquire_timeout);
    if in_memory {
        // Closing the only connection would drop the database with it
        pool_options = pool_options.idle_timeout(None).max_lifetime(None);
    }
    let pool = pool_options.connect_with(options).await?;

    sqlx::migrate!("./migrations").run(&pool).await?;

    Ok(pool)
}

#[cfg(test)]
pub async fn test_pool() -> SqlitePool {
    connect("sqlite::memory:", Duration::from_secs(5))
        .await
        .expect("in-memory database")
}
