//! # Channel Hub
//!
//! Registry of live push channels (one per WebSocket connection). Each
//! channel gets a private queue for direct pushes and a subscription to a
//! shared broadcast bus. A channel is live exactly as long as it is
//! registered; the socket task unregisters on disconnect.

pub mod events;

use crate::channels::events::ServerEvent;
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, RwLock};
use uuid::Uuid;

/// Messages a slow client may fall behind on the broadcast bus before it
/// starts skipping.
const BROADCAST_CAPACITY: usize = 256;

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("channel '{0}' is not connected")]
    NotLive(String),

    #[error("no channels connected")]
    NoListeners,

    #[error("could not encode event: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("poll cache write failed: {0}")]
    Store(String),
}

/// Receiving ends handed to the socket task of a newly registered channel.
pub struct ChannelHandle {
    pub channel_id: String,
    pub direct: mpsc::UnboundedReceiver<String>,
    pub broadcast: broadcast::Receiver<String>,
}

pub struct ChannelHub {
    channels: RwLock<HashMap<String, mpsc::UnboundedSender<String>>>,
    bus: broadcast::Sender<String>,
}

impl Default for ChannelHub {
    fn default() -> Self {
        Self::new()
    }
}

impl ChannelHub {
    pub fn new() -> Self {
        let (bus, _rx) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            channels: RwLock::new(HashMap::new()),
            bus,
        }
    }

    pub async fn register(&self) -> ChannelHandle {
        let channel_id = Uuid::new_v4().to_string();
        let (tx, rx) = mpsc::unbounded_channel();
        self.channels.write().await.insert(channel_id.clone(), tx);
        tracing::debug!(channel_id = %channel_id, "Channel registered");

        ChannelHandle {
            channel_id,
            direct: rx,
            broadcast: self.bus.subscribe(),
        }
    }

    pub async fn unregister(&self, channel_id: &str) {
        self.channels.write().await.remove(channel_id);
        tracing::debug!(channel_id, "Channel unregistered");
    }

    pub async fn is_live(&self, channel_id: &str) -> bool {
        self.channels
            .read()
            .await
            .get(channel_id)
            .is_some_and(|tx| !tx.is_closed())
    }

    pub async fn connected(&self) -> usize {
        self.channels.read().await.len()
    }

    /// Push `event` to one channel.
    pub async fn emit_to(&self, channel_id: &str, event: &ServerEvent) -> Result<(), DeliveryError> {
        let frame = event.to_json()?;
        let channels = self.channels.read().await;
        let tx = channels
            .get(channel_id)
            .ok_or_else(|| DeliveryError::NotLive(channel_id.to_string()))?;
        tx.send(frame)
            .map_err(|_| DeliveryError::NotLive(channel_id.to_string()))
    }

    /// Push `event` to every connected channel; returns how many received it.
    pub fn emit_all(&self, event: &ServerEvent) -> Result<usize, DeliveryError> {
        let frame = event.to_json()?;
        self.bus.send(frame).map_err(|_| DeliveryError::NoListeners)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn heartbeat() -> ServerEvent {
        ServerEvent::HeartbeatResponse { timestamp: 42 }
    }

    #[tokio::test]
    async fn direct_push_reaches_only_target() {
        let hub = ChannelHub::new();
        let mut a = hub.register().await;
        let mut b = hub.register().await;

        hub.emit_to(&a.channel_id, &heartbeat()).await.unwrap();
        let frame = a.direct.recv().await.unwrap();
        assert!(frame.contains("heartbeat-response"));
        assert!(b.direct.try_recv().is_err());
    }

    #[tokio::test]
    async fn liveness_follows_registration() {
        let hub = ChannelHub::new();
        let handle = hub.register().await;
        assert!(hub.is_live(&handle.channel_id).await);

        hub.unregister(&handle.channel_id).await;
        assert!(!hub.is_live(&handle.channel_id).await);
        assert!(matches!(
            hub.emit_to(&handle.channel_id, &heartbeat()).await,
            Err(DeliveryError::NotLive(_))
        ));
    }

    #[tokio::test]
    async fn broadcast_reaches_everyone() {
        let hub = ChannelHub::new();
        assert!(matches!(hub.emit_all(&heartbeat()), Err(DeliveryError::NoListeners)));

        let mut a = hub.register().await;
        let mut b = hub.register().await;
        assert_eq!(hub.emit_all(&heartbeat()).unwrap(), 2);
        assert_eq!(a.broadcast.recv().await.unwrap(), b.broadcast.recv().await.unwrap());
    }
}
