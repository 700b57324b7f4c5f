use crate::channels::events::ServerEvent;
use crate::channels::{ChannelHub, DeliveryError};
use crate::db::models::PollOutcome;
use crate::fanout::{CeremonyOutcome, DeliveryStrategy};
use crate::sessions::SessionTable;
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;

/// `authSuccess` to the channel bound to the session.
pub struct DirectPush {
    hub: Arc<ChannelHub>,
}

impl DirectPush {
    pub fn new(hub: Arc<ChannelHub>) -> Self {
        Self { hub }
    }
}

#[async_trait]
impl DeliveryStrategy for DirectPush {
    fn name(&self) -> &'static str {
        "direct-push"
    }

    async fn deliver(&self, outcome: &CeremonyOutcome) -> Result<(), DeliveryError> {
        if !self.hub.is_live(&outcome.channel_id).await {
            return Err(DeliveryError::NotLive(outcome.channel_id.clone()));
        }

        let event = ServerEvent::AuthSuccess {
            token: outcome.token.clone(),
            username: outcome.username.clone(),
            device_id: outcome.device_id.clone(),
            is_registration: outcome.mode.is_registration(),
            session_id: outcome.session_id.clone(),
        };
        self.hub.emit_to(&outcome.channel_id, &event).await
    }
}

/// `authBroadcast` to every connected channel. Carries no token.
pub struct Broadcast {
    hub: Arc<ChannelHub>,
}

impl Broadcast {
    pub fn new(hub: Arc<ChannelHub>) -> Self {
        Self { hub }
    }
}

#[async_trait]
impl DeliveryStrategy for Broadcast {
    fn name(&self) -> &'static str {
        "broadcast"
    }

    async fn deliver(&self, outcome: &CeremonyOutcome) -> Result<(), DeliveryError> {
        let event = ServerEvent::AuthBroadcast {
            session_id: outcome.session_id.clone(),
            username: outcome.username.clone(),
            success: true,
            is_registration: outcome.mode.is_registration(),
        };
        let receivers = self.hub.emit_all(&event)?;
        tracing::debug!(session_id = %outcome.session_id, receivers, "Broadcast sent");
        Ok(())
    }
}

/// Parks the result in the Session Table for `GET /api/auth-status`.
pub struct PollCache {
    sessions: Arc<SessionTable>,
}

impl PollCache {
    pub fn new(sessions: Arc<SessionTable>) -> Self {
        Self { sessions }
    }
}

#[async_trait]
impl DeliveryStrategy for PollCache {
    fn name(&self) -> &'static str {
        "poll-cache"
    }

    async fn deliver(&self, outcome: &CeremonyOutcome) -> Result<(), DeliveryError> {
        self.sessions
            .record_outcome(PollOutcome {
                session_id: outcome.session_id.clone(),
                username: outcome.username.clone(),
                user_id: outcome.user_id.clone(),
                mode: outcome.mode,
                success: true,
                created_at: Utc::now(),
            })
            .await
            .map_err(|e| DeliveryError::Store(e.to_string()))
    }
}
