//! Transaction runner.
//!
//! A [`Transaction`] owns one pooled connection with an open `BEGIN` and the
//! database's writer permit. Dropping it uncommitted rolls back, so an early
//! `?` return, a panic inside the body, or the enclosing future being
//! cancelled all end the same way.

use crate::error::StoreError;
use crate::model::{NewNotification, NewPost, Notification, NotificationId, Post};
use crate::pool::Database;
use crate::queries::{self, FoldChange, Purged, StoredDeadLetter};
use agora_core::{PostId, RequestContext, UserId};
use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use sqlx::{Sqlite, SqliteConnection};
use std::fmt::Display;
use tokio::sync::OwnedSemaphorePermit;
use tokio::time::Instant;

/// An open write transaction.
///
/// Statements run in program order on the transaction's connection and are
/// invisible to other connections until [`commit`](Self::commit).
pub struct Transaction {
    inner: sqlx::Transaction<'static, Sqlite>,
    _writer: OwnedSemaphorePermit,
}

impl Transaction {
    pub(crate) fn new(inner: sqlx::Transaction<'static, Sqlite>, writer: OwnedSemaphorePermit) -> Self {
        Self {
            inner,
            _writer: writer,
        }
    }

    fn conn(&mut self) -> &mut SqliteConnection {
        &mut self.inner
    }

    /// Makes the transaction's writes visible and releases the connection.
    pub async fn commit(self) -> Result<(), StoreError> {
        self.inner.commit().await?;
        tracing::debug!("transaction committed");
        Ok(())
    }

    /// Discards the transaction's writes and releases the connection.
    pub async fn rollback(self) -> Result<(), StoreError> {
        self.inner.rollback().await?;
        tracing::debug!("transaction rolled back");
        Ok(())
    }

    // ------------------------------------------------------------------
    // posts
    // ------------------------------------------------------------------

    /// Inserts a post and returns its ID. A `None` ID is assigned by the
    /// database.
    pub async fn insert_post(&mut self, new: NewPost) -> Result<PostId, StoreError> {
        queries::insert_post(self.conn(), new).await
    }

    /// Fetches a post if it exists.
    pub async fn post(&mut self, id: PostId) -> Result<Option<Post>, StoreError> {
        queries::post(self.conn(), id).await
    }

    /// Deletes a post with its audience rows and reactions.
    pub async fn delete_post(&mut self, id: PostId) -> Result<(), StoreError> {
        queries::delete_post(self.conn(), id).await
    }

    /// Adds `user` to the post's selected audience.
    pub async fn add_audience_member(&mut self, post: PostId, user: UserId) -> Result<(), StoreError> {
        queries::add_audience_member(self.conn(), post, user).await
    }

    /// Returns `true` if `user` is in the post's selected audience.
    pub async fn is_audience_member(&mut self, post: PostId, user: UserId) -> Result<bool, StoreError> {
        queries::is_audience_member(self.conn(), post, user).await
    }

    /// Likes or unlikes; returns `true` if the post is now liked.
    pub async fn toggle_reaction(
        &mut self,
        post: PostId,
        user: UserId,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        queries::toggle_reaction(self.conn(), post, user, now).await
    }

    /// Number of likes on `post`.
    pub async fn reaction_count(&mut self, post: PostId) -> Result<usize, StoreError> {
        queries::reaction_count(self.conn(), post).await
    }

    // ------------------------------------------------------------------
    // notifications
    // ------------------------------------------------------------------

    /// Inserts a notification and returns its ID.
    pub async fn insert_notification(&mut self, new: NewNotification) -> Result<NotificationId, StoreError> {
        queries::insert_notification(self.conn(), new).await
    }

    /// Fetches a notification if it exists.
    pub async fn notification(&mut self, id: NotificationId) -> Result<Option<Notification>, StoreError> {
        queries::notification(self.conn(), id).await
    }

    /// Newest unseen aggregated row for (recipient, kind, source entity)
    /// created at or after `since`.
    pub async fn find_aggregation_target(
        &mut self,
        recipient: UserId,
        kind: &str,
        source_entity: i64,
        since: DateTime<Utc>,
    ) -> Result<Option<NotificationId>, StoreError> {
        queries::find_aggregation_target(self.conn(), recipient, kind, source_entity, since).await
    }

    /// Adds `actor` to an aggregated row, or only bumps `updated_at` if the
    /// actor is already listed.
    pub async fn fold_actor(
        &mut self,
        id: NotificationId,
        actor: UserId,
        now: DateTime<Utc>,
    ) -> Result<FoldChange, StoreError> {
        queries::fold_actor(self.conn(), id, actor, now).await
    }

    /// Marks `ids` seen for `recipient`; returns how many rows changed.
    pub async fn mark_seen(&mut self, recipient: UserId, ids: &[NotificationId]) -> Result<usize, StoreError> {
        queries::mark_seen(self.conn(), recipient, ids).await
    }

    /// Marks a notification acted on (and seen).
    pub async fn mark_acted(&mut self, recipient: UserId, id: NotificationId) -> Result<(), StoreError> {
        queries::mark_acted(self.conn(), recipient, id).await
    }

    /// Deletes expired notifications and delivery markers.
    pub async fn purge_expired(&mut self, now: DateTime<Utc>) -> Result<Purged, StoreError> {
        queries::purge_expired(self.conn(), now).await
    }

    // ------------------------------------------------------------------
    // events
    // ------------------------------------------------------------------

    /// Records that `event_id` reached `recipient`, kept until `expires_at`.
    /// Returns `false` if it already had.
    pub async fn record_delivery(
        &mut self,
        event_id: &str,
        recipient: UserId,
        expires_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        queries::record_delivery(self.conn(), event_id, recipient, expires_at).await
    }

    /// Appends an encoded event to the outbox; it becomes visible to the
    /// consumer only if this transaction commits.
    pub async fn append_event(&mut self, payload: &[u8], now: DateTime<Utc>) -> Result<i64, StoreError> {
        queries::append_event(self.conn(), payload, now).await
    }

    /// Drops outbox records up to and including `through`.
    pub async fn commit_events(&mut self, through: i64) -> Result<usize, StoreError> {
        queries::commit_events(self.conn(), through).await
    }

    /// Sets an outbox record aside.
    pub async fn dead_letter_event(
        &mut self,
        letter: &StoredDeadLetter,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        queries::dead_letter_event(self.conn(), letter, now).await
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction").finish_non_exhaustive()
    }
}

impl Database {
    /// Runs `body` inside a transaction.
    ///
    /// Commits when `body` returns `Ok`; rolls back when it returns `Err`,
    /// panics, or is cancelled. The connection is always released.
    ///
    /// `body` must only capture owned data, since the future it returns
    /// borrows nothing but the transaction.
    ///
    /// # Example
    ///
    /// ```
    /// # tokio_test::block_on(async {
    /// use agora_store::{AudienceTag, Database, NewPost, PoolConfig, StoreError};
    ///
    /// let db = Database::connect(PoolConfig::in_memory()).await?;
    /// let id = db
    ///     .run_tx(|tx| {
    ///         Box::pin(async move {
    ///             tx.insert_post(NewPost {
    ///                 id: None,
    ///                 creator_id: 1,
    ///                 group_id: 0,
    ///                 audience: AudienceTag::Public,
    ///                 body: "hi".into(),
    ///                 image_id: None,
    ///                 created_at: chrono::Utc::now(),
    ///             })
    ///             .await
    ///         })
    ///     })
    ///     .await?;
    /// assert_eq!(db.post(id).await?.body, "hi");
    /// # Ok::<_, StoreError>(())
    /// # });
    /// ```
    pub async fn run_tx<T, E, F>(&self, body: F) -> Result<T, E>
    where
        F: for<'t> FnOnce(&'t mut Transaction) -> BoxFuture<'t, Result<T, E>>,
        E: From<StoreError> + Display,
    {
        self.run_tx_until(None, body).await
    }

    /// Runs `body` inside a transaction bounded by the request's deadline.
    ///
    /// Waiting for the writer and running the body both stop at the
    /// deadline. A deadline that has already passed fails without running
    /// `body`; a body that overruns is dropped and rolled back.
    pub async fn run_tx_for<T, E, F>(&self, ctx: &RequestContext, body: F) -> Result<T, E>
    where
        F: for<'t> FnOnce(&'t mut Transaction) -> BoxFuture<'t, Result<T, E>>,
        E: From<StoreError> + Display,
    {
        self.run_tx_until(ctx.deadline(), body).await
    }

    async fn run_tx_until<T, E, F>(&self, deadline: Option<Instant>, body: F) -> Result<T, E>
    where
        F: for<'t> FnOnce(&'t mut Transaction) -> BoxFuture<'t, Result<T, E>>,
        E: From<StoreError> + Display,
    {
        let mut tx = self.begin_until(deadline).await?;
        let result = match deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, body(&mut tx))
                .await
                .unwrap_or_else(|_| Err(StoreError::DeadlineExceeded.into())),
            None => body(&mut tx).await,
        };
        let value = match result {
            Ok(value) => value,
            Err(err) => {
                tracing::warn!(error = %err, "transaction failed, rolling back");
                if let Err(rollback) = tx.rollback().await {
                    tracing::warn!(error = %rollback, "rollback failed");
                }
                return Err(err);
            }
        };
        if deadline.is_some_and(|deadline| deadline <= Instant::now()) {
            tracing::warn!("deadline passed before commit, rolling back");
            drop(tx);
            return Err(StoreError::DeadlineExceeded.into());
        }
        tx.commit().await?;
        Ok(value)
    }
}
