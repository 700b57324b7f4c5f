//! Device-side operations that mutate a user record without a passkey
//! ceremony: phone registration, push-style login approval, and desktop
//! browser association. They share the ceremony locks so they never race a
//! ceremony on the same user.

use crate::ceremony::types::CeremonySuccess;
use crate::ceremony::CeremonyManager;
use crate::db::models::{BrowserSession, CeremonyMode, Device};
use crate::error::{AppError, AppResult};
use chrono::{Duration, Utc};
use serde_json::Value;

/// Browser associations stay valid this long after the last `associate`.
const BROWSER_SESSION_DAYS: i64 = 7;

impl CeremonyManager {
    pub async fn username_exists(&self, username: &str) -> AppResult<bool> {
        Ok(self.load_user(username.trim()).await?.is_some())
    }

    /// Add a phone to the user, or refresh its info if already known.
    ///
    /// The caller must already hold a token for `username`; the HTTP layer
    /// checks that before calling in.
    pub async fn register_device(&self, username: &str, device_token: &str, info: &Value) -> AppResult<Device> {
        if device_token.is_empty() {
            return Err(AppError::BadRequest("deviceToken is required".to_string()));
        }

        let _guard = self.locks.acquire(username).await;
        let mut user = self.require_user(username).await?;

        let now = Utc::now().to_rfc3339();
        let info = info.to_string();
        match user.devices.iter_mut().find(|d| d.token == device_token) {
            Some(device) => {
                device.info = info;
                device.last_seen = now;
            }
            None => user.devices.push(Device {
                token: device_token.to_string(),
                info,
                registered_at: now.clone(),
                last_seen: now,
            }),
        }
        self.save_user(&mut user).await?;

        tracing::info!(username, device_token, devices = user.devices.len(), "Device registered");

        user.devices
            .into_iter()
            .find(|d| d.token == device_token)
            .ok_or_else(|| AppError::Internal("registered device vanished".to_string()))
    }

    /// Approve a pending login from a registered phone, without a passkey
    /// ceremony. Succeeds exactly like a ceremony: token, fan-out, retire.
    pub async fn approve_login(
        &self,
        session_id: &str,
        username: &str,
        device_token: &str,
    ) -> AppResult<CeremonySuccess> {
        let session = self
            .sessions
            .get(session_id)
            .await
            .ok_or_else(|| AppError::SessionNotFound(session_id.to_string()))?;
        if session.username != username {
            tracing::warn!(session_id, expected = %session.username, got = username, "Login approval for another user's session");
            return Err(AppError::BadRequest(format!(
                "Session {} belongs to another user",
                session_id
            )));
        }

        let user = {
            let _guard = self.locks.acquire(username).await;
            let mut user = self.require_user(username).await?;

            if !user.has_device(device_token) {
                if !self.policy.allows_unregistered_devices() {
                    return Err(AppError::Unauthorized(format!(
                        "Device is not registered for '{}'",
                        username
                    )));
                }
                tracing::warn!(username, device_token, "Unregistered device approving login in development");
            } else if let Some(device) = user.devices.iter_mut().find(|d| d.token == device_token) {
                device.last_seen = Utc::now().to_rfc3339();
                self.save_user(&mut user).await?;
            }
            user
        };

        tracing::info!(username, session_id, "Login approved from device");
        self.succeed(&user, &session, CeremonyMode::Authentication, device_token.to_string())
            .await
    }

    /// Remember that `device_id` (a desktop browser) is reachable on
    /// `channel_id`. Returns `Ok(false)` for an unknown user.
    pub async fn associate_browser(&self, username: &str, device_id: &str, channel_id: &str) -> AppResult<bool> {
        let _guard = self.locks.acquire(username).await;
        let Some(mut user) = self.load_user(username).await? else {
            tracing::info!(username, "Association for unknown user ignored");
            return Ok(false);
        };

        let now = Utc::now();
        user.prune_browser_sessions(now);
        let expires_at = (now + Duration::days(BROWSER_SESSION_DAYS)).to_rfc3339();
        match user.browser_sessions.iter_mut().find(|b| b.device_id == device_id) {
            Some(existing) => {
                existing.channel_id = channel_id.to_string();
                existing.expires_at = expires_at;
            }
            None => user.browser_sessions.push(BrowserSession {
                device_id: device_id.to_string(),
                channel_id: channel_id.to_string(),
                expires_at,
            }),
        }
        self.save_user(&mut user).await?;

        tracing::info!(username, device_id, channel_id, "Browser associated");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use crate::ceremony::testing::*;
    use crate::config::Config;
    use crate::db::models::{BrowserSession, CeremonyMode};
    use crate::db::RecordStore;
    use crate::error::AppError;
    use chrono::Utc;
    use serde_json::json;

    #[tokio::test]
    async fn register_device_upserts() {
        let h = harness(Config::for_tests()).await;
        let err = h
            .manager
            .register_device("alice", "tok-1", &json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::UserNotFound(_)));

        h.store.create("alice").await.unwrap();
        h.manager.register_device("alice", "tok-1", &json!({"model": "a"})).await.unwrap();
        let device = h
            .manager
            .register_device("alice", "tok-1", &json!({"model": "b"}))
            .await
            .unwrap();
        assert!(device.info.contains("\"b\""));

        let user = h.store.find_by_username("alice").await.unwrap().unwrap();
        assert_eq!(user.devices.len(), 1);
        assert!(h.manager.username_exists("alice").await.unwrap());
        assert!(!h.manager.username_exists("bob").await.unwrap());
    }

    #[tokio::test]
    async fn approve_login_requires_registered_device_in_production() {
        let h = harness(Config::for_tests()).await;
        h.store.create("alice").await.unwrap();
        let session = h.sessions.create("alice", CeremonyMode::Authentication, None).await.unwrap();

        let err = h
            .manager
            .approve_login(&session.session_id, "alice", "tok-1")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Unauthorized(_)));

        h.manager.register_device("alice", "tok-1", &json!({})).await.unwrap();
        let result = h.manager.approve_login(&session.session_id, "alice", "tok-1").await.unwrap();
        assert_eq!(result.device_id, "tok-1");
        assert!(h.sessions.get(&session.session_id).await.is_none());

        let err = h
            .manager
            .approve_login(&session.session_id, "alice", "tok-1")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::SessionNotFound(_)));
    }

    #[tokio::test]
    async fn approve_login_is_bound_to_the_session_owner() {
        for config in [Config::for_tests(), development()] {
            let h = harness(config).await;
            h.store.create("alice").await.unwrap();
            h.manager.register_device("alice", "tok-1", &json!({})).await.unwrap();
            let session = h.sessions.create("mallory", CeremonyMode::Authentication, None).await.unwrap();

            let err = h
                .manager
                .approve_login(&session.session_id, "alice", "tok-1")
                .await
                .unwrap_err();
            assert!(matches!(err, AppError::BadRequest(_)));
            assert!(h.sessions.get(&session.session_id).await.is_some());
        }
    }

    #[tokio::test]
    async fn approve_login_allows_unknown_device_in_development() {
        let h = harness(development()).await;
        h.store.create("alice").await.unwrap();
        let session = h.sessions.create("alice", CeremonyMode::Authentication, None).await.unwrap();
        assert!(h.manager.approve_login(&session.session_id, "alice", "tok-x").await.is_ok());
    }

    #[tokio::test]
    async fn browser_association_updates_channel() {
        let h = harness(Config::for_tests()).await;
        assert!(!h.manager.associate_browser("ghost", "d1", "c1").await.unwrap());

        h.store.create("alice").await.unwrap();
        assert!(h.manager.associate_browser("alice", "d1", "c1").await.unwrap());
        assert!(h.manager.associate_browser("alice", "d1", "c2").await.unwrap());

        let user = h.store.find_by_username("alice").await.unwrap().unwrap();
        assert_eq!(user.browser_sessions.len(), 1);
        assert_eq!(user.browser_sessions[0].channel_id, "c2");
    }

    #[tokio::test]
    async fn association_drops_expired_browsers() {
        let h = harness(Config::for_tests()).await;
        let mut user = h.store.create("alice").await.unwrap();
        user.browser_sessions.push(BrowserSession {
            device_id: "stale".into(),
            channel_id: "c0".into(),
            expires_at: (Utc::now() - chrono::Duration::hours(1)).to_rfc3339(),
        });
        h.store.update(&user).await.unwrap();

        assert!(h.manager.associate_browser("alice", "d1", "c1").await.unwrap());

        let user = h.store.find_by_username("alice").await.unwrap().unwrap();
        let ids: Vec<_> = user.browser_sessions.iter().map(|b| b.device_id.as_str()).collect();
        assert_eq!(ids, ["d1"]);
    }
}
