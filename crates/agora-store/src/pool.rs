//! Connection pool.
//!
//! SQLite through `sqlx`. Reads run on any pooled connection; writes are
//! serialised through a single writer permit because SQLite admits one
//! writer at a time.

use crate::error::StoreError;
use crate::model::{Notification, Post};
use crate::queries::{self, Purged, StoredDeadLetter, StoredEvent};
use crate::tx::Transaction;
use agora_core::{PostId, RequestContext, UserId};
use chrono::{DateTime, Utc};
use sqlx::migrate::Migrator;
use sqlx::pool::PoolConnection;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use sqlx::Sqlite;
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::Instant;

static MIGRATOR: Migrator = sqlx::migrate!();

/// Where the database lives and how the pool is sized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// `sqlite://path` or `sqlite::memory:`.
    pub url: String,
    /// Maximum concurrently checked-out connections.
    pub max_connections: u32,
    /// How long an acquisition may wait for a free connection.
    pub acquire_timeout: Duration,
}

impl PoolConfig {
    /// A private in-memory database.
    ///
    /// The pool keeps exactly one connection open for its whole life, since
    /// every SQLite connection to `:memory:` is a separate database.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            url: "sqlite::memory:".to_string(),
            max_connections: 1,
            acquire_timeout: Duration::from_secs(5),
        }
    }

    /// A file-backed database at `path`, created if missing.
    #[must_use]
    pub fn file(path: impl AsRef<std::path::Path>) -> Self {
        Self {
            url: format!("sqlite://{}", path.as_ref().display()),
            ..Self::default()
        }
    }

    fn is_in_memory(&self) -> bool {
        self.url.contains(":memory:") || self.url.contains("mode=memory")
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://agora.db".to_string(),
            max_connections: 10,
            acquire_timeout: Duration::from_secs(5),
        }
    }
}

/// Handle to the database.
///
/// Cheap to clone; all clones share one pool and one writer permit.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
    writer: Arc<Semaphore>,
    config: PoolConfig,
}

impl Database {
    /// Opens the pool and brings the schema up to date.
    ///
    /// # Errors
    ///
    /// Fails if the URL is malformed, the file cannot be opened, or a
    /// migration fails.
    pub async fn connect(config: PoolConfig) -> Result<Self, StoreError> {
        let in_memory = config.is_in_memory();
        let mut options = SqliteConnectOptions::from_str(&config.url)?
            .create_if_missing(true)
            .foreign_keys(true)
            .busy_timeout(config.acquire_timeout);
        if !in_memory {
            options = options
                .journal_mode(SqliteJournalMode::Wal)
                .synchronous(SqliteSynchronous::Normal);
        }

        let mut pool = SqlitePoolOptions::new().acquire_timeout(config.acquire_timeout);
        pool = if in_memory {
            pool.max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            pool.max_connections(config.max_connections.max(1))
        };
        let pool = pool.connect_with(options).await?;
        MIGRATOR.run(&pool).await?;

        tracing::info!(
            url = %config.url,
            max_connections = config.max_connections,
            "database ready"
        );
        Ok(Self {
            pool,
            writer: Arc::new(Semaphore::new(1)),
            config,
        })
    }

    /// Returns the pool configuration.
    #[must_use]
    pub const fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Returns the number of idle connections.
    #[must_use]
    pub fn idle_connections(&self) -> usize {
        self.pool.num_idle()
    }

    /// Closes every connection. Later acquisitions fail with
    /// [`StoreError::Closed`].
    pub async fn close(&self) {
        self.writer.close();
        self.pool.close().await;
    }

    /// Checks out a connection, waiting at most the pool's acquire timeout.
    pub async fn connection(&self) -> Result<Connection, StoreError> {
        self.connection_until(None).await
    }

    /// Checks out a connection, also bounded by the request's deadline.
    pub async fn connection_for(&self, ctx: &RequestContext) -> Result<Connection, StoreError> {
        self.connection_until(ctx.deadline()).await
    }

    async fn connection_until(&self, deadline: Option<Instant>) -> Result<Connection, StoreError> {
        let conn = self.bounded(deadline, async {
            Ok(self.pool.acquire().await?)
        });
        Ok(Connection {
            conn: conn.await?,
            deadline,
        })
    }

    /// Opens a write transaction.
    ///
    /// The returned [`Transaction`] rolls back when dropped without
    /// [`Transaction::commit`].
    pub async fn begin(&self) -> Result<Transaction, StoreError> {
        self.begin_until(None).await
    }

    /// Opens a write transaction bounded by the request's deadline.
    pub async fn begin_for(&self, ctx: &RequestContext) -> Result<Transaction, StoreError> {
        self.begin_until(ctx.deadline()).await
    }

    pub(crate) async fn begin_until(
        &self,
        deadline: Option<Instant>,
    ) -> Result<Transaction, StoreError> {
        let opened = self.bounded(deadline, async {
            let writer = Arc::clone(&self.writer)
                .acquire_owned()
                .await
                .map_err(|_| StoreError::Closed)?;
            let inner = self.pool.begin().await?;
            Ok(Transaction::new(inner, writer))
        });
        match opened.await {
            Ok(tx) => {
                tracing::debug!("transaction begin");
                Ok(tx)
            }
            Err(err) => {
                tracing::warn!(error = %err, "could not open transaction");
                Err(err)
            }
        }
    }

    /// Runs `work` until the earlier of `deadline` and the acquire timeout.
    ///
    /// A deadline that has already passed fails before `work` is polled.
    async fn bounded<T>(
        &self,
        deadline: Option<Instant>,
        work: impl Future<Output = Result<T, StoreError>>,
    ) -> Result<T, StoreError> {
        let now = Instant::now();
        if deadline.is_some_and(|deadline| deadline <= now) {
            return Err(StoreError::DeadlineExceeded);
        }
        let pool_deadline = now + self.config.acquire_timeout;
        let (until, expired) = match deadline {
            Some(deadline) if deadline < pool_deadline => (deadline, StoreError::DeadlineExceeded),
            _ => (pool_deadline, StoreError::PoolTimeout),
        };
        match tokio::time::timeout_at(until, work).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(
                    max_connections = self.config.max_connections,
                    error = %expired,
                    "gave up waiting for the database"
                );
                Err(expired)
            }
        }
    }

    // ------------------------------------------------------------------
    // single-statement shortcuts
    // ------------------------------------------------------------------

    /// Fetches a post.
    pub async fn post(&self, id: PostId) -> Result<Post, StoreError> {
        self.connection()
            .await?
            .post(id)
            .await?
            .ok_or(StoreError::NotFound { entity: "post", id })
    }

    /// Returns `true` if `user` is in the post's selected audience.
    pub async fn is_audience_member(&self, post: PostId, user: UserId) -> Result<bool, StoreError> {
        self.connection().await?.is_audience_member(post, user).await
    }

    /// Lists a recipient's notifications.
    pub async fn notifications_for(
        &self,
        recipient: UserId,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Notification>, StoreError> {
        self.connection()
            .await?
            .notifications_for(recipient, now, limit)
            .await
    }

    /// Number of stored delivery markers.
    pub async fn delivery_count(&self) -> Result<usize, StoreError> {
        self.connection().await?.delivery_count().await
    }

    /// Deletes expired notifications and delivery markers.
    pub async fn purge_expired(&self, now: DateTime<Utc>) -> Result<Purged, StoreError> {
        let mut tx = self.begin().await?;
        let purged = tx.purge_expired(now).await?;
        tx.commit().await?;
        Ok(purged)
    }
}

/// A checked-out connection for reads.
///
/// Every write goes through a [`Transaction`]. Statements stop at the
/// deadline of the request the connection was checked out for.
#[derive(Debug)]
pub struct Connection {
    conn: PoolConnection<Sqlite>,
    deadline: Option<Instant>,
}

impl Connection {
    /// Fetches a post if it exists.
    pub async fn post(&mut self, id: PostId) -> Result<Option<Post>, StoreError> {
        within(self.deadline, queries::post(&mut self.conn, id)).await
    }

    /// Returns `true` if `user` is in the post's selected audience.
    pub async fn is_audience_member(&mut self, post: PostId, user: UserId) -> Result<bool, StoreError> {
        within(self.deadline, queries::is_audience_member(&mut self.conn, post, user)).await
    }

    /// Number of likes on `post`.
    pub async fn reaction_count(&mut self, post: PostId) -> Result<usize, StoreError> {
        within(self.deadline, queries::reaction_count(&mut self.conn, post)).await
    }

    /// Fetches a notification if it exists.
    pub async fn notification(
        &mut self,
        id: crate::NotificationId,
    ) -> Result<Option<Notification>, StoreError> {
        within(self.deadline, queries::notification(&mut self.conn, id)).await
    }

    /// Unexpired notifications for `recipient`, unseen first, then newest.
    pub async fn notifications_for(
        &mut self,
        recipient: UserId,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Notification>, StoreError> {
        within(
            self.deadline,
            queries::notifications_for(&mut self.conn, recipient, now, limit),
        )
        .await
    }

    /// Returns `true` if `event_id` was already delivered to `recipient`.
    pub async fn was_delivered(&mut self, event_id: &str, recipient: UserId) -> Result<bool, StoreError> {
        within(
            self.deadline,
            queries::was_delivered(&mut self.conn, event_id, recipient),
        )
        .await
    }

    /// Number of stored delivery markers.
    pub async fn delivery_count(&mut self) -> Result<usize, StoreError> {
        within(self.deadline, queries::delivery_count(&mut self.conn)).await
    }

    /// Up to `max` outbox records, oldest first.
    pub async fn pending_events(&mut self, max: usize) -> Result<Vec<StoredEvent>, StoreError> {
        within(self.deadline, queries::pending_events(&mut self.conn, max)).await
    }

    /// Number of outbox records not yet committed by the consumer.
    pub async fn event_backlog(&mut self) -> Result<usize, StoreError> {
        within(self.deadline, queries::event_backlog(&mut self.conn)).await
    }

    /// Records the consumer set aside.
    pub async fn dead_letters(&mut self) -> Result<Vec<StoredDeadLetter>, StoreError> {
        within(self.deadline, queries::dead_letters(&mut self.conn)).await
    }
}

async fn within<T>(
    deadline: Option<Instant>,
    statement: impl Future<Output = Result<T, StoreError>>,
) -> Result<T, StoreError> {
    match deadline {
        Some(deadline) => tokio::time::timeout_at(deadline, statement)
            .await
            .unwrap_or(Err(StoreError::DeadlineExceeded)),
        None => statement.await,
    }
}
