//! # Outcome Fan-out
//!
//! A successful ceremony is announced to the initiator over every delivery
//! path at once. None of them is reliable on its own: the initiator's socket
//! may have reconnected under a new channel id, the broadcast may reach a tab
//! that already closed, and the poll cache is only read if the page polls.
//! The initiator keeps whichever copy arrives first and drops the rest by
//! session id.
//!
//! Delivery failures are logged and never returned to the responder. The
//! pairing session is retired once every strategy has run.

mod strategies;

pub use strategies::{Broadcast, DirectPush, PollCache};

use crate::channels::{ChannelHub, DeliveryError};
use crate::db::models::CeremonyMode;
use crate::sessions::SessionTable;
use async_trait::async_trait;
use futures_util::future::join_all;
use std::sync::Arc;

/// Everything a delivery path may need to announce one result.
#[derive(Debug, Clone)]
pub struct CeremonyOutcome {
    pub session_id: String,
    /// Initiator channel recorded on the session
    pub channel_id: String,
    pub username: String,
    pub user_id: String,
    pub mode: CeremonyMode,
    pub token: String,
    pub device_id: String,
}

#[async_trait]
pub trait DeliveryStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    async fn deliver(&self, outcome: &CeremonyOutcome) -> Result<(), DeliveryError>;
}

/// Which strategies succeeded for one outcome.
#[derive(Debug, Default)]
pub struct FanoutReport {
    pub delivered: Vec<&'static str>,
    pub failed: Vec<(&'static str, String)>,
}

pub struct OutcomeFanout {
    strategies: Vec<Box<dyn DeliveryStrategy>>,
    sessions: Arc<SessionTable>,
}

impl OutcomeFanout {
    /// Direct push, broadcast, and poll cache.
    pub fn new(hub: Arc<ChannelHub>, sessions: Arc<SessionTable>) -> Self {
        Self::with_strategies(
            vec![
                Box::new(DirectPush::new(hub.clone())),
                Box::new(Broadcast::new(hub)),
                Box::new(PollCache::new(sessions.clone())),
            ],
            sessions,
        )
    }

    pub fn with_strategies(strategies: Vec<Box<dyn DeliveryStrategy>>, sessions: Arc<SessionTable>) -> Self {
        Self { strategies, sessions }
    }

    /// Attempt every strategy, then retire the session.
    pub async fn publish(&self, outcome: &CeremonyOutcome) -> FanoutReport {
        let attempts = self.strategies.iter().map(|strategy| async move {
            (strategy.name(), strategy.deliver(outcome).await)
        });

        let mut report = FanoutReport::default();
        for (name, result) in join_all(attempts).await {
            match result {
                Ok(()) => {
                    tracing::debug!(session_id = %outcome.session_id, strategy = name, "Outcome delivered");
                    report.delivered.push(name);
                }
                Err(e) => {
                    tracing::warn!(
                        session_id = %outcome.session_id,
                        channel_id = %outcome.channel_id,
                        strategy = name,
                        "Outcome delivery failed: {}",
                        e
                    );
                    report.failed.push((name, e.to_string()));
                }
            }
        }

        if let Err(e) = self.sessions.retire(&outcome.session_id).await {
            // The sweeper will reclaim it
            tracing::warn!(session_id = %outcome.session_id, "Could not retire session: {}", e);
        }

        tracing::info!(
            session_id = %outcome.session_id,
            username = %outcome.username,
            delivered = ?report.delivered,
            "Ceremony outcome published"
        );
        report
    }
}
