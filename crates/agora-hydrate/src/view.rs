//! Hydratable views over stored rows.

use crate::hydrator::Hydratable;
use agora_core::{GroupId, ImageId, PostId, UserId};
use agora_rpc::UserRecord;
use agora_store::{AudienceTag, Notification, Post};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// A post as served to clients, with its creator and image resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PostView {
    /// Post ID.
    pub id: PostId,
    /// Creator's profile. Zero-valued until hydrated or when unknown.
    pub creator: UserRecord,
    /// Owning group, zero when none.
    pub group_id: GroupId,
    /// Visibility policy.
    pub audience: AudienceTag,
    /// Post text.
    pub body: String,
    /// Attached image URL, empty when none or unresolved.
    pub image_url: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    #[serde(skip)]
    creator_id: UserId,
    #[serde(skip)]
    image_id: Option<ImageId>,
}

impl From<Post> for PostView {
    fn from(post: Post) -> Self {
        Self {
            id: post.id,
            creator: UserRecord {
                id: post.creator_id,
                ..UserRecord::default()
            },
            group_id: post.group_id,
            audience: post.audience,
            body: post.body,
            image_url: String::new(),
            created_at: post.created_at,
            creator_id: post.creator_id,
            image_id: post.image_id,
        }
    }
}

impl Hydratable for PostView {
    fn user_ref(&self) -> Option<UserId> {
        Some(self.creator_id)
    }

    fn image_ref(&self) -> Option<ImageId> {
        self.image_id
    }

    fn set_user(&mut self, user: UserRecord) {
        self.creator = user;
    }

    fn set_image_url(&mut self, url: String) {
        self.image_url = url;
    }
}

/// A notification as served to clients, with its latest actor resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationView {
    /// The stored row.
    #[serde(flatten)]
    pub notification: Notification,
    /// Profile of the actor who caused it, if the row names one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actor: Option<UserRecord>,
}

impl NotificationView {
    /// The actor named by the row: the latest aggregated actor, or the
    /// payload's `actor_id`.
    fn actor_id(&self) -> Option<UserId> {
        self.notification.aggregated_ids.last().copied().or_else(|| {
            self.notification
                .payload
                .get("actor_id")
                .and_then(|id| id.parse().ok())
        })
    }
}

impl From<Notification> for NotificationView {
    fn from(notification: Notification) -> Self {
        Self {
            notification,
            actor: None,
        }
    }
}

impl Hydratable for NotificationView {
    fn user_ref(&self) -> Option<UserId> {
        self.actor_id()
    }

    fn image_ref(&self) -> Option<ImageId> {
        None
    }

    fn set_user(&mut self, user: UserRecord) {
        self.actor = Some(user);
    }

    fn set_image_url(&mut self, _url: String) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn notification(aggregated_ids: Vec<UserId>, payload: &[(&str, &str)]) -> Notification {
        let now = Utc::now();
        Notification {
            id: 1,
            recipient: 7,
            kind: "post_liked".to_string(),
            source_service: "posts".to_string(),
            source_entity: 42,
            seen: false,
            needs_action: false,
            acted: false,
            payload: payload
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect::<BTreeMap<_, _>>(),
            created_at: now,
            updated_at: now,
            expires_at: now + chrono::Duration::days(30),
            aggregated_count: None,
            aggregated_ids,
        }
    }

    #[test]
    fn latest_aggregated_actor_wins() {
        let view = NotificationView::from(notification(vec![3, 4, 5], &[("actor_id", "9")]));
        assert_eq!(view.user_ref(), Some(5));
    }

    #[test]
    fn payload_actor_is_the_fallback() {
        let view = NotificationView::from(notification(vec![], &[("actor_id", "9")]));
        assert_eq!(view.user_ref(), Some(9));
        let view = NotificationView::from(notification(vec![], &[]));
        assert_eq!(view.user_ref(), None);
    }

    #[test]
    fn post_view_keeps_ids_out_of_json() {
        let view = PostView::from(Post {
            id: 1,
            creator_id: 7,
            group_id: 0,
            audience: AudienceTag::Public,
            body: "hi".to_string(),
            image_id: Some(3),
            created_at: Utc::now(),
        });
        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["creator"]["id"], 7);
        assert!(json.get("creator_id").is_none());
        assert_eq!(json["image_url"], "");
    }
}
