use crate::db::models::{BrowserSession, Device};
use crate::error::AppResult;
use sqlx::{SqliteConnection, SqlitePool};

// Paired phones

pub async fn find_devices(pool: &SqlitePool, user_id: &str) -> AppResult<Vec<Device>> {
    let devices = sqlx::query_as::<_, Device>(
        "SELECT token, info, registered_at, last_seen
         FROM devices
         WHERE user_id = ?
         ORDER BY registered_at",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    Ok(devices)
}

pub async fn upsert_device(conn: &mut SqliteConnection, user_id: &str, device: &Device) -> AppResult<()> {
    sqlx::query(
        "INSERT INTO devices (user_id, token, info, registered_at, last_seen)
         VALUES (?, ?, ?, ?, ?)
         ON CONFLICT (user_id, token) DO UPDATE SET
             info = excluded.info,
             last_seen = excluded.last_seen",
    )
    .bind(user_id)
    .bind(&device.token)
    .bind(&device.info)
    .bind(&device.registered_at)
    .bind(&device.last_seen)
    .execute(conn)
    .await?;

    Ok(())
}

// Desktop browsers bound to a push channel

pub async fn find_browser_sessions(pool: &SqlitePool, user_id: &str) -> AppResult<Vec<BrowserSession>> {
    let sessions = sqlx::query_as::<_, BrowserSession>(
        "SELECT device_id, channel_id, expires_at
         FROM browser_sessions
         WHERE user_id = ?",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    Ok(sessions)
}

pub async fn delete_browser_sessions(conn: &mut SqliteConnection, user_id: &str) -> AppResult<()> {
    sqlx::query("DELETE FROM browser_sessions WHERE user_id = ?")
        .bind(user_id)
        .execute(conn)
        .await?;

    Ok(())
}

pub async fn upsert_browser_session(
    conn: &mut SqliteConnection,
    user_id: &str,
    session: &BrowserSession,
) -> AppResult<()> {
    sqlx::query(
        "INSERT INTO browser_sessions (user_id, device_id, channel_id, expires_at)
         VALUES (?, ?, ?, ?)
         ON CONFLICT (user_id, device_id) DO UPDATE SET
             channel_id = excluded.channel_id,
             expires_at = excluded.expires_at",
    )
    .bind(user_id)
    .bind(&session.device_id)
    .bind(&session.channel_id)
    .bind(&session.expires_at)
    .execute(conn)
    .await?;

    Ok(())
}
