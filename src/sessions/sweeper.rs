//! Expiry sweeper.
//!
//! Advisory garbage collection only: ceremony verification checks the
//! challenge itself, so a late sweep just delays reclaiming memory and rows.

use crate::sessions::SessionTable;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

pub fn spawn(table: Arc<SessionTable>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        // The first tick fires immediately; sweeping right after startup also
        // clears whatever expired while the process was down.
        loop {
            interval.tick().await;
            tracing::debug!("Running session sweep");
            let retired = table.sweep_expired(Utc::now()).await;
            if !retired.is_empty() {
                tracing::info!(count = retired.len(), "Expired pairing sessions retired");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::{CeremonyMode, PendingSession};
    use crate::db::test_pool;

    #[tokio::test]
    async fn background_sweep_removes_stale_sessions() {
        let table = Arc::new(
            SessionTable::load(test_pool().await, Duration::from_secs(900), Duration::from_secs(5))
                .await
                .unwrap(),
        );

        let mut stale = PendingSession::new("stale".into(), "alice".into(), "c".into(), CeremonyMode::Registration);
        stale.created_at = Utc::now() - chrono::Duration::minutes(16);
        table.insert(stale).await.unwrap();
        table.create("bob", CeremonyMode::Authentication, None).await.unwrap();

        let handle = spawn(table.clone(), Duration::from_millis(20));
        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.abort();

        assert!(table.get("stale").await.is_none());
        assert_eq!(table.len().await, 1);
    }
}
