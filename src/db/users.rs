use crate::db::models::{User, UserRow};
use crate::db::{credentials, devices, RecordStore};
use crate::error::{AppError, AppResult};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;

/// [`RecordStore`] over the SQLite pool.
///
/// `update` writes the user row and all child rows inside one SQLite
/// transaction so a crash never leaves half a record on disk. That is an
/// adapter detail: callers still serialise their own read-modify-write.
#[derive(Clone)]
pub struct SqliteRecordStore {
    pool: SqlitePool,
}

impl SqliteRecordStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn hydrate(&self, row: UserRow) -> AppResult<User> {
        let creds = credentials::find_by_user_id(&self.pool, &row.id).await?;
        let devs = devices::find_devices(&self.pool, &row.id).await?;
        let browsers = devices::find_browser_sessions(&self.pool, &row.id).await?;
        Ok(row.into_user(creds, devs, browsers))
    }

    async fn find_row(&self, column: &str, value: &str) -> AppResult<Option<User>> {
        let sql = format!(
            "SELECT id, username, current_challenge, challenge_session, challenge_issued_at, created_at, updated_at
             FROM users WHERE {} = ?",
            column
        );
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(value)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(Some(self.hydrate(row).await?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    async fn find_by_username(&self, username: &str) -> AppResult<Option<User>> {
        self.find_row("username", username).await
    }

    async fn find_by_id(&self, user_id: &str) -> AppResult<Option<User>> {
        self.find_row("id", user_id).await
    }

    async fn create(&self, username: &str) -> AppResult<User> {
        let user = User::new(username.to_string());

        sqlx::query(
            "INSERT INTO users (id, username, current_challenge, created_at, updated_at)
             VALUES (?, ?, NULL, ?, ?)",
        )
        .bind(&user.id)
        .bind(&user.username)
        .bind(&user.created_at)
        .bind(&user.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                AppError::BadRequest(format!("User '{}' already exists", username))
            }
            _ => AppError::StoreUnavailable(e),
        })?;

        tracing::debug!(username, user_id = %user.id, "Created user record");
        Ok(user)
    }

    async fn update(&self, user: &User) -> AppResult<()> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            "UPDATE users
             SET current_challenge = ?, challenge_session = ?, challenge_issued_at = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(&user.current_challenge)
        .bind(&user.challenge_session)
        .bind(user.challenge_issued_at)
        .bind(Utc::now().to_rfc3339())
        .bind(&user.id)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(AppError::UserNotFound(user.username.clone()));
        }

        for (position, credential) in user.credentials.iter().enumerate() {
            credentials::upsert(&mut *tx, &user.id, position, credential).await?;
        }
        for device in &user.devices {
            devices::upsert_device(&mut *tx, &user.id, device).await?;
        }
        // Browser associations are rewritten so pruned entries leave the table
        devices::delete_browser_sessions(&mut *tx, &user.id).await?;
        for session in &user.browser_sessions {
            devices::upsert_browser_session(&mut *tx, &user.id, session).await?;
        }

        tx.commit().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::{BrowserSession, Credential, Device};
    use crate::db::test_pool;

    #[tokio::test]
    async fn create_then_find_by_name_and_id() {
        let store = SqliteRecordStore::new(test_pool().await);
        let created = store.create("alice").await.unwrap();
        assert_eq!(created.id.len(), 24);

        let by_name = store.find_by_username("alice").await.unwrap().unwrap();
        assert_eq!(by_name.id, created.id);
        assert!(by_name.credentials.is_empty());
        assert!(by_name.current_challenge.is_none());

        let by_id = store.find_by_id(&created.id).await.unwrap().unwrap();
        assert_eq!(by_id.username, "alice");

        assert!(store.find_by_username("bob").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_username_is_rejected() {
        let store = SqliteRecordStore::new(test_pool().await);
        store.create("alice").await.unwrap();
        let err = store.create("alice").await.unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
    }

    #[tokio::test]
    async fn update_round_trips_children_in_order() {
        let store = SqliteRecordStore::new(test_pool().await);
        let mut user = store.create("alice").await.unwrap();

        user.issue_challenge("chal".into(), "s-1");
        user.credentials.push(Credential::new("cred-b".into(), "pk-b".into()));
        user.credentials.push(Credential::new("cred-a".into(), "pk-a".into()));
        user.devices.push(Device {
            token: "phone".into(),
            info: "{}".into(),
            registered_at: Utc::now().to_rfc3339(),
            last_seen: Utc::now().to_rfc3339(),
        });
        store.update(&user).await.unwrap();

        user.credentials[0].counter = 9;
        store.update(&user).await.unwrap();

        let loaded = store.find_by_username("alice").await.unwrap().unwrap();
        assert_eq!(loaded.current_challenge.as_deref(), Some("chal"));
        assert_eq!(loaded.challenge_session.as_deref(), Some("s-1"));
        assert!(loaded.challenge_issued_at.is_some());
        let ids: Vec<_> = loaded.credentials.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, ["cred-b", "cred-a"]);
        assert_eq!(loaded.credentials[0].counter, 9);
        assert!(loaded.has_device("phone"));
    }

    #[tokio::test]
    async fn pruned_browser_sessions_leave_the_table() {
        let store = SqliteRecordStore::new(test_pool().await);
        let mut user = store.create("alice").await.unwrap();
        user.browser_sessions.push(BrowserSession {
            device_id: "old".into(),
            channel_id: "c1".into(),
            expires_at: (Utc::now() - chrono::Duration::days(1)).to_rfc3339(),
        });
        user.browser_sessions.push(BrowserSession {
            device_id: "new".into(),
            channel_id: "c2".into(),
            expires_at: (Utc::now() + chrono::Duration::days(1)).to_rfc3339(),
        });
        store.update(&user).await.unwrap();

        user.prune_browser_sessions(Utc::now());
        store.update(&user).await.unwrap();

        let loaded = store.find_by_username("alice").await.unwrap().unwrap();
        assert_eq!(loaded.browser_sessions.len(), 1);
        assert_eq!(loaded.browser_sessions[0].device_id, "new");
    }

    #[tokio::test]
    async fn update_of_unknown_user_fails() {
        let store = SqliteRecordStore::new(test_pool().await);
        let ghost = User::new("ghost".into());
        let err = store.update(&ghost).await.unwrap_err();
        assert!(matches!(err, AppError::UserNotFound(_)));
    }
}
