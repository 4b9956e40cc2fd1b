//! Typed statements.
//!
//! Every function here runs against one borrowed connection, so the same
//! statement serves a [`Transaction`](crate::Transaction) and a plain
//! [`Connection`](crate::Connection). Statements that read before they write
//! are only reached through a transaction.

use crate::error::StoreError;
use crate::model::{
    to_nanos, NewNotification, NewPost, Notification, NotificationId, NotificationRow, Post,
    PostRow,
};
use agora_core::{PostId, UserId};
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{QueryBuilder, Sqlite, SqliteConnection};

/// Result of folding an actor into an aggregated notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FoldChange {
    /// The actor was new; count and IDs grew by one.
    Added,
    /// The actor was already listed; only `updated_at` moved.
    AlreadyPresent,
}

/// What one expiry sweep removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Purged {
    /// Expired notifications deleted.
    pub notifications: usize,
    /// Expired delivery markers deleted.
    pub deliveries: usize,
}

/// A record in the event outbox.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct StoredEvent {
    /// Position in the outbox, strictly increasing.
    pub position: i64,
    /// Encoded event.
    pub payload: Vec<u8>,
}

/// An outbox record set aside by the consumer.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct StoredDeadLetter {
    /// Position the record held in the outbox.
    pub position: i64,
    /// Encoded event.
    pub payload: Vec<u8>,
    /// Why it was set aside.
    pub reason: String,
}

const POST_COLUMNS: &str = "id, creator_id, group_id, audience, body, image_id, created_at";

const NOTIFICATION_COLUMNS: &str = "id, recipient, kind, source_service, source_entity, seen, \
     needs_action, acted, payload, created_at, updated_at, expires_at, aggregated_count, \
     aggregated_ids";

fn count(affected: u64) -> usize {
    usize::try_from(affected).unwrap_or(usize::MAX)
}

fn limit(rows: usize) -> i64 {
    i64::try_from(rows).unwrap_or(i64::MAX)
}

// ----------------------------------------------------------------------
// posts
// ----------------------------------------------------------------------

pub(crate) async fn insert_post(conn: &mut SqliteConnection, new: NewPost) -> Result<PostId, StoreError> {
    let id = sqlx::query_scalar(
        "INSERT INTO posts (id, creator_id, group_id, audience, body, image_id, created_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?) RETURNING id",
    )
    .bind(new.id)
    .bind(new.creator_id)
    .bind(new.group_id)
    .bind(new.audience.as_str())
    .bind(new.body)
    .bind(new.image_id)
    .bind(to_nanos(new.created_at))
    .fetch_one(&mut *conn)
    .await?;
    Ok(id)
}

pub(crate) async fn post(conn: &mut SqliteConnection, id: PostId) -> Result<Option<Post>, StoreError> {
    let sql = format!("SELECT {POST_COLUMNS} FROM posts WHERE id = ?");
    sqlx::query_as::<_, PostRow>(&sql)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .map(Post::try_from)
        .transpose()
}

pub(crate) async fn delete_post(conn: &mut SqliteConnection, id: PostId) -> Result<(), StoreError> {
    let done = sqlx::query("DELETE FROM posts WHERE id = ?")
        .bind(id)
        .execute(&mut *conn)
        .await?;
    if done.rows_affected() == 0 {
        return Err(StoreError::NotFound { entity: "post", id });
    }
    Ok(())
}

pub(crate) async fn add_audience_member(
    conn: &mut SqliteConnection,
    post: PostId,
    user: UserId,
) -> Result<(), StoreError> {
    sqlx::query("INSERT INTO post_audience (post_id, user_id) VALUES (?, ?)")
        .bind(post)
        .bind(user)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

pub(crate) async fn is_audience_member(
    conn: &mut SqliteConnection,
    post: PostId,
    user: UserId,
) -> Result<bool, StoreError> {
    let listed = sqlx::query_scalar(
        "SELECT EXISTS (SELECT 1 FROM post_audience WHERE post_id = ? AND user_id = ?)",
    )
    .bind(post)
    .bind(user)
    .fetch_one(&mut *conn)
    .await?;
    Ok(listed)
}

/// Deletes the like if present, otherwise inserts it. The delete runs first
/// so the statement takes the write lock before reading anything.
pub(crate) async fn toggle_reaction(
    conn: &mut SqliteConnection,
    post: PostId,
    user: UserId,
    now: DateTime<Utc>,
) -> Result<bool, StoreError> {
    let removed = sqlx::query("DELETE FROM reactions WHERE post_id = ? AND user_id = ?")
        .bind(post)
        .bind(user)
        .execute(&mut *conn)
        .await?;
    if removed.rows_affected() > 0 {
        return Ok(false);
    }
    sqlx::query("INSERT INTO reactions (post_id, user_id, created_at) VALUES (?, ?, ?)")
        .bind(post)
        .bind(user)
        .bind(to_nanos(now))
        .execute(&mut *conn)
        .await?;
    Ok(true)
}

pub(crate) async fn reaction_count(conn: &mut SqliteConnection, post: PostId) -> Result<usize, StoreError> {
    let likes: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM reactions WHERE post_id = ?")
        .bind(post)
        .fetch_one(&mut *conn)
        .await?;
    Ok(usize::try_from(likes).unwrap_or_default())
}

// ----------------------------------------------------------------------
// notifications
// ----------------------------------------------------------------------

pub(crate) async fn insert_notification(
    conn: &mut SqliteConnection,
    new: NewNotification,
) -> Result<NotificationId, StoreError> {
    let (aggregated_count, aggregated_ids) = match new.aggregated_actor {
        Some(actor) => (Some(1_i64), vec![actor]),
        None => (None, Vec::new()),
    };
    let created_at = to_nanos(new.created_at);
    let id = sqlx::query_scalar(
        "INSERT INTO notifications \
         (recipient, kind, source_service, source_entity, needs_action, payload, \
          created_at, updated_at, expires_at, aggregated_count, aggregated_ids) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) RETURNING id",
    )
    .bind(new.recipient)
    .bind(new.kind)
    .bind(new.source_service)
    .bind(new.source_entity)
    .bind(new.needs_action)
    .bind(Json(new.payload))
    .bind(created_at)
    .bind(created_at)
    .bind(to_nanos(new.expires_at))
    .bind(aggregated_count)
    .bind(Json(aggregated_ids))
    .fetch_one(&mut *conn)
    .await?;
    Ok(id)
}

pub(crate) async fn notification(
    conn: &mut SqliteConnection,
    id: NotificationId,
) -> Result<Option<Notification>, StoreError> {
    let sql = format!("SELECT {NOTIFICATION_COLUMNS} FROM notifications WHERE id = ?");
    sqlx::query_as::<_, NotificationRow>(&sql)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .map(Notification::try_from)
        .transpose()
}

/// Most recent unseen aggregated row for (recipient, kind, source entity)
/// created at or after `since`. Served by `notifications_aggregation_idx`.
pub(crate) async fn find_aggregation_target(
    conn: &mut SqliteConnection,
    recipient: UserId,
    kind: &str,
    source_entity: i64,
    since: DateTime<Utc>,
) -> Result<Option<NotificationId>, StoreError> {
    let target = sqlx::query_scalar(
        "SELECT id FROM notifications \
         WHERE recipient = ? AND kind = ? AND source_entity = ? AND created_at >= ? \
           AND seen = FALSE AND aggregated_count IS NOT NULL \
         ORDER BY created_at DESC, id DESC \
         LIMIT 1",
    )
    .bind(recipient)
    .bind(kind)
    .bind(source_entity)
    .bind(to_nanos(since))
    .fetch_optional(&mut *conn)
    .await?;
    Ok(target)
}

pub(crate) async fn fold_actor(
    conn: &mut SqliteConnection,
    id: NotificationId,
    actor: UserId,
    now: DateTime<Utc>,
) -> Result<FoldChange, StoreError> {
    let row: Option<(Option<i64>, Json<Vec<UserId>>)> =
        sqlx::query_as("SELECT aggregated_count, aggregated_ids FROM notifications WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?;
    let (count, Json(mut actors)) = row.ok_or(StoreError::NotFound {
        entity: "notification",
        id,
    })?;
    let Some(count) = count else {
        return Err(StoreError::CheckViolation {
            constraint: "notifications_fold_requires_aggregate".to_string(),
        });
    };

    let change = if actors.contains(&actor) {
        FoldChange::AlreadyPresent
    } else {
        actors.push(actor);
        FoldChange::Added
    };
    let count = match change {
        FoldChange::Added => count + 1,
        FoldChange::AlreadyPresent => count,
    };
    sqlx::query(
        "UPDATE notifications SET updated_at = ?, aggregated_count = ?, aggregated_ids = ? \
         WHERE id = ?",
    )
    .bind(to_nanos(now))
    .bind(count)
    .bind(Json(actors))
    .bind(id)
    .execute(&mut *conn)
    .await?;
    Ok(change)
}

/// Unexpired rows for `recipient`: unseen first, then most recently updated.
pub(crate) async fn notifications_for(
    conn: &mut SqliteConnection,
    recipient: UserId,
    now: DateTime<Utc>,
    rows: usize,
) -> Result<Vec<Notification>, StoreError> {
    let sql = format!(
        "SELECT {NOTIFICATION_COLUMNS} FROM notifications \
         WHERE recipient = ? AND expires_at > ? \
         ORDER BY seen ASC, updated_at DESC, id DESC \
         LIMIT ?"
    );
    sqlx::query_as::<_, NotificationRow>(&sql)
        .bind(recipient)
        .bind(to_nanos(now))
        .bind(limit(rows))
        .fetch_all(&mut *conn)
        .await?
        .into_iter()
        .map(Notification::try_from)
        .collect()
}

/// Marks `ids` seen. Rows of other recipients and rows already seen are
/// left alone and not counted.
pub(crate) async fn mark_seen(
    conn: &mut SqliteConnection,
    recipient: UserId,
    ids: &[NotificationId],
) -> Result<usize, StoreError> {
    if ids.is_empty() {
        return Ok(0);
    }
    let mut query = QueryBuilder::<Sqlite>::new(
        "UPDATE notifications SET seen = TRUE WHERE seen = FALSE AND recipient = ",
    );
    query.push_bind(recipient).push(" AND id IN (");
    let mut list = query.separated(", ");
    for id in ids {
        list.push_bind(*id);
    }
    list.push_unseparated(")");
    let done = query.build().execute(&mut *conn).await?;
    Ok(count(done.rows_affected()))
}

pub(crate) async fn mark_acted(
    conn: &mut SqliteConnection,
    recipient: UserId,
    id: NotificationId,
) -> Result<(), StoreError> {
    let done = sqlx::query(
        "UPDATE notifications SET acted = TRUE, seen = TRUE WHERE id = ? AND recipient = ?",
    )
    .bind(id)
    .bind(recipient)
    .execute(&mut *conn)
    .await?;
    if done.rows_affected() == 0 {
        return Err(StoreError::NotFound {
            entity: "notification",
            id,
        });
    }
    Ok(())
}

/// Deletes expired notifications and expired delivery markers.
pub(crate) async fn purge_expired(conn: &mut SqliteConnection, now: DateTime<Utc>) -> Result<Purged, StoreError> {
    let now = to_nanos(now);
    let notifications = sqlx::query("DELETE FROM notifications WHERE expires_at <= ?")
        .bind(now)
        .execute(&mut *conn)
        .await?;
    let deliveries = sqlx::query("DELETE FROM deliveries WHERE expires_at <= ?")
        .bind(now)
        .execute(&mut *conn)
        .await?;
    Ok(Purged {
        notifications: count(notifications.rows_affected()),
        deliveries: count(deliveries.rows_affected()),
    })
}

// ----------------------------------------------------------------------
// event idempotency
// ----------------------------------------------------------------------

/// Returns `false` if the marker already existed.
pub(crate) async fn record_delivery(
    conn: &mut SqliteConnection,
    event_id: &str,
    recipient: UserId,
    expires_at: DateTime<Utc>,
) -> Result<bool, StoreError> {
    let done = sqlx::query(
        "INSERT INTO deliveries (event_id, recipient, expires_at) VALUES (?, ?, ?) \
         ON CONFLICT (event_id, recipient) DO NOTHING",
    )
    .bind(event_id)
    .bind(recipient)
    .bind(to_nanos(expires_at))
    .execute(&mut *conn)
    .await?;
    Ok(done.rows_affected() == 1)
}

pub(crate) async fn was_delivered(
    conn: &mut SqliteConnection,
    event_id: &str,
    recipient: UserId,
) -> Result<bool, StoreError> {
    let delivered = sqlx::query_scalar(
        "SELECT EXISTS (SELECT 1 FROM deliveries WHERE event_id = ? AND recipient = ?)",
    )
    .bind(event_id)
    .bind(recipient)
    .fetch_one(&mut *conn)
    .await?;
    Ok(delivered)
}

pub(crate) async fn delivery_count(conn: &mut SqliteConnection) -> Result<usize, StoreError> {
    let markers: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM deliveries")
        .fetch_one(&mut *conn)
        .await?;
    Ok(usize::try_from(markers).unwrap_or_default())
}

// ----------------------------------------------------------------------
// event outbox
// ----------------------------------------------------------------------

pub(crate) async fn append_event(
    conn: &mut SqliteConnection,
    payload: &[u8],
    now: DateTime<Utc>,
) -> Result<i64, StoreError> {
    let position = sqlx::query_scalar(
        "INSERT INTO event_log (payload, created_at) VALUES (?, ?) RETURNING position",
    )
    .bind(payload)
    .bind(to_nanos(now))
    .fetch_one(&mut *conn)
    .await?;
    Ok(position)
}

pub(crate) async fn pending_events(conn: &mut SqliteConnection, max: usize) -> Result<Vec<StoredEvent>, StoreError> {
    let events = sqlx::query_as::<_, StoredEvent>(
        "SELECT position, payload FROM event_log ORDER BY position LIMIT ?",
    )
    .bind(limit(max))
    .fetch_all(&mut *conn)
    .await?;
    Ok(events)
}

/// Drops every record up to and including `through`.
///
/// Positions never handed out are rejected; committing an already committed
/// position is a no-op.
pub(crate) async fn commit_events(conn: &mut SqliteConnection, through: i64) -> Result<usize, StoreError> {
    let issued: Option<i64> =
        sqlx::query_scalar("SELECT seq FROM sqlite_sequence WHERE name = 'event_log'")
            .fetch_optional(&mut *conn)
            .await?;
    if through > issued.unwrap_or(0) {
        return Err(StoreError::NotFound {
            entity: "event log position",
            id: through,
        });
    }
    let done = sqlx::query("DELETE FROM event_log WHERE position <= ?")
        .bind(through)
        .execute(&mut *conn)
        .await?;
    Ok(count(done.rows_affected()))
}

pub(crate) async fn event_backlog(conn: &mut SqliteConnection) -> Result<usize, StoreError> {
    let pending: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM event_log")
        .fetch_one(&mut *conn)
        .await?;
    Ok(usize::try_from(pending).unwrap_or_default())
}

pub(crate) async fn dead_letter_event(
    conn: &mut SqliteConnection,
    letter: &StoredDeadLetter,
    now: DateTime<Utc>,
) -> Result<(), StoreError> {
    sqlx::query(
        "INSERT INTO event_dead_letters (position, payload, reason, created_at) VALUES (?, ?, ?, ?) \
         ON CONFLICT (position) DO UPDATE SET reason = excluded.reason",
    )
    .bind(letter.position)
    .bind(letter.payload.as_slice())
    .bind(letter.reason.as_str())
    .bind(to_nanos(now))
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub(crate) async fn dead_letters(conn: &mut SqliteConnection) -> Result<Vec<StoredDeadLetter>, StoreError> {
    let letters = sqlx::query_as::<_, StoredDeadLetter>(
        "SELECT position, payload, reason FROM event_dead_letters ORDER BY position",
    )
    .fetch_all(&mut *conn)
    .await?;
    Ok(letters)
}
