//! Row types.

use crate::error::StoreError;
use agora_core::{GroupId, ImageId, PostId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;
use std::collections::BTreeMap;
use std::str::FromStr;

/// Notification primary key.
pub type NotificationId = i64;

/// Who may see a post.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudienceTag {
    /// Everyone.
    Public,
    /// Followers of the creator.
    Followers,
    /// Users listed in the post's audience rows.
    Selected,
    /// Members of the post's group.
    Group,
}

impl AudienceTag {
    /// Returns the snake_case tag.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Followers => "followers",
            Self::Selected => "selected",
            Self::Group => "group",
        }
    }
}

impl FromStr for AudienceTag {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "public" => Ok(Self::Public),
            "followers" => Ok(Self::Followers),
            "selected" => Ok(Self::Selected),
            "group" => Ok(Self::Group),
            other => Err(format!("unknown audience tag: {other}")),
        }
    }
}

/// A stored post.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
    /// Primary key.
    pub id: PostId,
    /// Author.
    pub creator_id: UserId,
    /// Owning group, zero when the post is not in a group.
    pub group_id: GroupId,
    /// Visibility policy.
    pub audience: AudienceTag,
    /// Post text.
    pub body: String,
    /// Attached image, if any.
    pub image_id: Option<ImageId>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

/// Values for inserting a post.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPost {
    /// Explicit key; allocated by the database when `None`.
    pub id: Option<PostId>,
    /// Author.
    pub creator_id: UserId,
    /// Owning group, zero when none.
    pub group_id: GroupId,
    /// Visibility policy.
    pub audience: AudienceTag,
    /// Post text.
    pub body: String,
    /// Attached image.
    pub image_id: Option<ImageId>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

/// A stored notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    /// Primary key.
    pub id: NotificationId,
    /// Recipient user.
    pub recipient: UserId,
    /// Notification type tag.
    pub kind: String,
    /// Service that produced the source event.
    pub source_service: String,
    /// Entity the notification is about.
    pub source_entity: i64,
    /// Whether the recipient has seen it.
    pub seen: bool,
    /// Whether the recipient must act on it.
    pub needs_action: bool,
    /// Whether the recipient has acted on it.
    pub acted: bool,
    /// Opaque payload.
    pub payload: BTreeMap<String, String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last modification time (bumped by folds).
    pub updated_at: DateTime<Utc>,
    /// Expiry time. Always after `created_at`.
    pub expires_at: DateTime<Utc>,
    /// Number of folded events, for aggregatable notifications.
    pub aggregated_count: Option<u32>,
    /// Distinct actors in arrival order, for aggregatable notifications.
    pub aggregated_ids: Vec<UserId>,
}

impl Notification {
    /// Actors folded in after the one that created the row.
    ///
    /// For aggregated rows `aggregated_count == 1 + folded_actor_ids().len()`.
    #[must_use]
    pub fn folded_actor_ids(&self) -> &[UserId] {
        self.aggregated_ids.get(1..).unwrap_or_default()
    }

    /// Returns `true` once the row is past its expiry.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Values for inserting a notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewNotification {
    /// Recipient user.
    pub recipient: UserId,
    /// Notification type tag.
    pub kind: String,
    /// Service that produced the source event.
    pub source_service: String,
    /// Entity the notification is about.
    pub source_entity: i64,
    /// Whether the recipient must act on it.
    pub needs_action: bool,
    /// Opaque payload.
    pub payload: BTreeMap<String, String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Expiry time.
    pub expires_at: DateTime<Utc>,
    /// First actor, for aggregatable notifications.
    pub aggregated_actor: Option<UserId>,
}

/// Stored form of a timestamp: Unix nanoseconds.
///
/// Clamps outside the representable range (years before 1677 or after 2262).
pub(crate) fn to_nanos(at: DateTime<Utc>) -> i64 {
    at.timestamp_nanos_opt().unwrap_or(if at.timestamp() < 0 { i64::MIN } else { i64::MAX })
}

pub(crate) fn from_nanos(nanos: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_nanos(nanos)
}

#[derive(Debug, FromRow)]
pub(crate) struct PostRow {
    id: i64,
    creator_id: i64,
    group_id: i64,
    audience: String,
    body: String,
    image_id: Option<i64>,
    created_at: i64,
}

impl TryFrom<PostRow> for Post {
    type Error = StoreError;

    fn try_from(row: PostRow) -> Result<Self, StoreError> {
        Ok(Self {
            id: row.id,
            creator_id: row.creator_id,
            group_id: row.group_id,
            audience: row.audience.parse().map_err(StoreError::Decode)?,
            body: row.body,
            image_id: row.image_id,
            created_at: from_nanos(row.created_at),
        })
    }
}

#[derive(Debug, FromRow)]
pub(crate) struct NotificationRow {
    id: i64,
    recipient: i64,
    kind: String,
    source_service: String,
    source_entity: i64,
    seen: bool,
    needs_action: bool,
    acted: bool,
    payload: Json<BTreeMap<String, String>>,
    created_at: i64,
    updated_at: i64,
    expires_at: i64,
    aggregated_count: Option<i64>,
    aggregated_ids: Json<Vec<UserId>>,
}

impl TryFrom<NotificationRow> for Notification {
    type Error = StoreError;

    fn try_from(row: NotificationRow) -> Result<Self, StoreError> {
        let aggregated_count = row
            .aggregated_count
            .map(u32::try_from)
            .transpose()
            .map_err(|_| StoreError::Decode(format!("notification {} has a negative count", row.id)))?;
        Ok(Self {
            id: row.id,
            recipient: row.recipient,
            kind: row.kind,
            source_service: row.source_service,
            source_entity: row.source_entity,
            seen: row.seen,
            needs_action: row.needs_action,
            acted: row.acted,
            payload: row.payload.0,
            created_at: from_nanos(row.created_at),
            updated_at: from_nanos(row.updated_at),
            expires_at: from_nanos(row.expires_at),
            aggregated_count,
            aggregated_ids: row.aggregated_ids.0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audience_tag_parses() {
        for tag in [
            AudienceTag::Public,
            AudienceTag::Followers,
            AudienceTag::Selected,
            AudienceTag::Group,
        ] {
            assert_eq!(tag.as_str().parse::<AudienceTag>().unwrap(), tag);
        }
        assert!("friends".parse::<AudienceTag>().is_err());
    }

    #[test]
    fn timestamps_keep_nanoseconds() {
        let at = DateTime::from_timestamp(1_700_000_000, 123_456_789).unwrap();
        assert_eq!(from_nanos(to_nanos(at)), at);
        assert_eq!(to_nanos(DateTime::<Utc>::MAX_UTC), i64::MAX);
    }
}
