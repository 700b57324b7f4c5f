//! # Credential Rows
//!
//! Passkeys are stored in registration order (`position`) and never deleted.
//! Only public keys are stored; private keys never leave the authenticator.

use crate::db::models::Credential;
use crate::error::AppResult;
use sqlx::{SqliteConnection, SqlitePool};

pub async fn find_by_user_id(pool: &SqlitePool, user_id: &str) -> AppResult<Vec<Credential>> {
    let credentials = sqlx::query_as::<_, Credential>(
        "SELECT id, public_key, counter, created_at, last_used_at
         FROM credentials
         WHERE user_id = ?
         ORDER BY position",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    Ok(credentials)
}

/// Insert a credential, or refresh its counter and last-use time.
///
/// The counter column is written as-is: the monotonic check happens in
/// `ceremony::authentication` under the per-user lock before we get here.
pub async fn upsert(
    conn: &mut SqliteConnection,
    user_id: &str,
    position: usize,
    credential: &Credential,
) -> AppResult<()> {
    sqlx::query(
        "INSERT INTO credentials (user_id, id, public_key, counter, position, created_at, last_used_at)
         VALUES (?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT (user_id, id) DO UPDATE SET
             public_key = excluded.public_key,
             counter = excluded.counter,
             last_used_at = excluded.last_used_at",
    )
    .bind(user_id)
    .bind(&credential.id)
    .bind(&credential.public_key)
    .bind(credential.counter as i64) // SQLite integers are i64
    .bind(position as i64)
    .bind(&credential.created_at)
    .bind(&credential.last_used_at)
    .execute(conn)
    .await?;

    Ok(())
}
