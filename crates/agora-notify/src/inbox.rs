//! Recipient-facing notification queries.

use agora_core::{Clock, RequestContext, UserId};
use agora_store::{Database, Notification, NotificationId, Purged, StoreError};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Upper bound on a single listing.
pub const MAX_PAGE: usize = 100;

/// Reads and updates a recipient's notifications.
#[derive(Debug, Clone)]
pub struct Inbox {
    db: Database,
    clock: Arc<dyn Clock>,
}

impl Inbox {
    /// Creates an inbox over `db`.
    #[must_use]
    pub fn new(db: Database, clock: Arc<dyn Clock>) -> Self {
        Self { db, clock }
    }

    /// Lists unexpired notifications, unseen first, most recently updated first.
    pub async fn list(
        &self,
        ctx: &RequestContext,
        recipient: UserId,
        limit: usize,
    ) -> Result<Vec<Notification>, StoreError> {
        let now = self.clock.now();
        let limit = limit.clamp(1, MAX_PAGE);
        self.db
            .connection_for(ctx)
            .await?
            .notifications_for(recipient, now, limit)
            .await
    }

    /// Marks notifications seen, returning how many changed.
    pub async fn mark_seen(
        &self,
        ctx: &RequestContext,
        recipient: UserId,
        ids: &[NotificationId],
    ) -> Result<usize, StoreError> {
        let ids = ids.to_vec();
        self.db
            .run_tx_for(ctx, move |tx| {
                Box::pin(async move { tx.mark_seen(recipient, &ids).await })
            })
            .await
    }

    /// Marks an actionable notification as acted upon.
    pub async fn mark_acted(
        &self,
        ctx: &RequestContext,
        recipient: UserId,
        id: NotificationId,
    ) -> Result<(), StoreError> {
        self.db
            .run_tx_for(ctx, move |tx| {
                Box::pin(async move { tx.mark_acted(recipient, id).await })
            })
            .await
    }

    /// Deletes expired notifications and the delivery markers that
    /// expired with them.
    pub async fn purge_expired(&self) -> Result<Purged, StoreError> {
        let purged = self.db.purge_expired(self.clock.now()).await?;
        if purged != Purged::default() {
            tracing::info!(
                notifications = purged.notifications,
                deliveries = purged.deliveries,
                "expired notifications purged"
            );
        }
        Ok(purged)
    }

    /// Spawns a task that purges every `interval` until aborted.
    pub fn spawn_purger(&self, interval: Duration) -> JoinHandle<()> {
        let inbox = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if let Err(err) = inbox.purge_expired().await {
                    tracing::warn!(error = %err, "notification purge failed");
                }
            }
        })
    }
}
