//! Notification events and their wire envelope.
//!
//! Events arrive as JSON objects tagged by `type`, next to the envelope's
//! `event_id`:
//!
//! ```json
//! {"event_id": "01J...", "type": "post_liked", "post_id": 77, "owner_id": 7, "liker_id": 3}
//! ```

use crate::error::NotifyError;
use agora_core::{GroupId, PostId, UserId};
use serde::{Deserialize, Serialize};

const fn yes() -> bool {
    true
}

/// `requester_id` asked to follow `target_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FollowRequestCreated {
    /// Who asked.
    pub requester_id: UserId,
    /// Whose approval is needed.
    pub target_id: UserId,
}

/// `follower_id` now follows `followee_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewFollower {
    /// The new follower.
    pub follower_id: UserId,
    /// The followed user.
    pub followee_id: UserId,
    /// Fold into a recent unseen row when one exists.
    #[serde(default = "yes")]
    pub aggregate: bool,
}

/// An invitation to a group changed state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupInvite {
    /// The group.
    pub group_id: GroupId,
    /// Who sent the invitation.
    pub inviter_id: UserId,
    /// Who received it.
    pub invitee_id: UserId,
}

/// A request to join a group changed state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupJoinRequest {
    /// The group.
    pub group_id: GroupId,
    /// Who asked to join.
    pub requester_id: UserId,
    /// Who decides.
    pub owner_id: UserId,
}

/// A group scheduled an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewEventInGroup {
    /// The group.
    pub group_id: GroupId,
    /// The scheduled event.
    pub group_event_id: i64,
    /// Who created it.
    pub creator_id: UserId,
    /// Members to notify.
    pub member_ids: Vec<UserId>,
    /// Event title.
    #[serde(default)]
    pub title: String,
}

/// `liker_id` liked a post.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostLiked {
    /// The post.
    pub post_id: PostId,
    /// The post's creator.
    pub owner_id: UserId,
    /// Who liked it.
    pub liker_id: UserId,
    /// Fold into a recent unseen row when one exists.
    #[serde(default = "yes")]
    pub aggregate: bool,
}

/// `commenter_id` commented on a post.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostCommented {
    /// The post.
    pub post_id: PostId,
    /// The post's creator.
    pub owner_id: UserId,
    /// Who commented.
    pub commenter_id: UserId,
    /// The comment.
    pub comment_id: i64,
    /// Fold into a recent unseen row when one exists.
    #[serde(default = "yes")]
    pub aggregate: bool,
}

/// `author_id` mentioned `mentioned_id` in a post.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mention {
    /// The post.
    pub post_id: PostId,
    /// Who wrote it.
    pub author_id: UserId,
    /// Who was mentioned.
    pub mentioned_id: UserId,
}

/// `sender_id` sent a message to a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMessage {
    /// The conversation.
    pub conversation_id: i64,
    /// Who sent it.
    pub sender_id: UserId,
    /// Conversation members to notify.
    pub recipient_ids: Vec<UserId>,
    /// Fold into a recent unseen row when one exists.
    #[serde(default = "yes")]
    pub aggregate: bool,
}

/// A social event that produces notifications.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NotificationEvent {
    /// See [`FollowRequestCreated`].
    FollowRequestCreated(FollowRequestCreated),
    /// See [`NewFollower`].
    NewFollower(NewFollower),
    /// An invitation was sent.
    GroupInviteCreated(GroupInvite),
    /// An invitation was accepted.
    GroupInviteAccepted(GroupInvite),
    /// An invitation was rejected.
    GroupInviteRejected(GroupInvite),
    /// A join request was sent.
    GroupJoinRequestCreated(GroupJoinRequest),
    /// A join request was accepted.
    GroupJoinRequestAccepted(GroupJoinRequest),
    /// A join request was rejected.
    GroupJoinRequestRejected(GroupJoinRequest),
    /// See [`NewEventInGroup`].
    NewEventInGroup(NewEventInGroup),
    /// See [`PostLiked`].
    PostLiked(PostLiked),
    /// See [`PostCommented`].
    PostCommented(PostCommented),
    /// See [`Mention`].
    Mention(Mention),
    /// See [`NewMessage`].
    NewMessage(NewMessage),
}

impl NotificationEvent {
    /// Every `type` tag an envelope may carry.
    pub const TAGS: [&'static str; 13] = [
        "follow_request_created",
        "new_follower",
        "group_invite_created",
        "group_invite_accepted",
        "group_invite_rejected",
        "group_join_request_created",
        "group_join_request_accepted",
        "group_join_request_rejected",
        "new_event_in_group",
        "post_liked",
        "post_commented",
        "mention",
        "new_message",
    ];

    /// Returns this event's `type` tag.
    #[must_use]
    pub const fn tag(&self) -> &'static str {
        let index = match self {
            Self::FollowRequestCreated(_) => 0,
            Self::NewFollower(_) => 1,
            Self::GroupInviteCreated(_) => 2,
            Self::GroupInviteAccepted(_) => 3,
            Self::GroupInviteRejected(_) => 4,
            Self::GroupJoinRequestCreated(_) => 5,
            Self::GroupJoinRequestAccepted(_) => 6,
            Self::GroupJoinRequestRejected(_) => 7,
            Self::NewEventInGroup(_) => 8,
            Self::PostLiked(_) => 9,
            Self::PostCommented(_) => 10,
            Self::Mention(_) => 11,
            Self::NewMessage(_) => 12,
        };
        Self::TAGS[index]
    }

    /// Users this event may notify, before self-notifications are dropped.
    #[must_use]
    pub fn recipients(&self) -> Vec<UserId> {
        match self {
            Self::FollowRequestCreated(e) => vec![e.target_id],
            Self::NewFollower(e) => vec![e.followee_id],
            Self::GroupInviteCreated(e) => vec![e.invitee_id],
            Self::GroupInviteAccepted(e) | Self::GroupInviteRejected(e) => vec![e.inviter_id],
            Self::GroupJoinRequestCreated(e) => vec![e.owner_id],
            Self::GroupJoinRequestAccepted(e) | Self::GroupJoinRequestRejected(e) => {
                vec![e.requester_id]
            }
            Self::NewEventInGroup(e) => e.member_ids.clone(),
            Self::PostLiked(e) => vec![e.owner_id],
            Self::PostCommented(e) => vec![e.owner_id],
            Self::Mention(e) => vec![e.mentioned_id],
            Self::NewMessage(e) => e.recipient_ids.clone(),
        }
    }
}

/// An event plus the ID that makes its delivery idempotent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Unique per published event; redeliveries carry the same ID.
    pub event_id: String,
    /// The event.
    #[serde(flatten)]
    pub event: NotificationEvent,
}

impl EventEnvelope {
    /// Wraps `event` under a fresh time-ordered ID.
    #[must_use]
    pub fn new(event: NotificationEvent) -> Self {
        Self {
            event_id: uuid::Uuid::now_v7().to_string(),
            event,
        }
    }

    /// Wraps `event` under a given ID.
    #[must_use]
    pub fn with_id(event_id: impl Into<String>, event: NotificationEvent) -> Self {
        Self {
            event_id: event_id.into(),
            event,
        }
    }

    /// Decodes an envelope from JSON.
    ///
    /// A well-formed envelope whose `type` is not a known tag is reported as
    /// [`NotifyError::UnknownEvent`] rather than a generic decode failure.
    pub fn decode(bytes: &[u8]) -> Result<Self, NotifyError> {
        let value: serde_json::Value = serde_json::from_slice(bytes)?;
        let tag = value
            .get("type")
            .and_then(serde_json::Value::as_str)
            .ok_or(NotifyError::MissingType)?;
        if !NotificationEvent::TAGS.contains(&tag) {
            return Err(NotifyError::UnknownEvent(tag.to_string()));
        }
        Ok(serde_json::from_value(value)?)
    }

    /// Encodes the envelope as JSON.
    pub fn encode(&self) -> Result<Vec<u8>, NotifyError> {
        Ok(serde_json::to_vec(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_tagged_event() {
        let raw = br#"{"event_id":"e1","type":"post_liked","post_id":77,"owner_id":7,"liker_id":3}"#;
        let envelope = EventEnvelope::decode(raw).unwrap();
        assert_eq!(envelope.event_id, "e1");
        assert_eq!(
            envelope.event,
            NotificationEvent::PostLiked(PostLiked {
                post_id: 77,
                owner_id: 7,
                liker_id: 3,
                aggregate: true,
            })
        );
        assert_eq!(envelope.event.tag(), "post_liked");
    }

    #[test]
    fn unknown_tag_is_its_own_error() {
        let err = EventEnvelope::decode(br#"{"event_id":"e1","type":"poke","from":1}"#).unwrap_err();
        assert!(matches!(err, NotifyError::UnknownEvent(tag) if tag == "poke"));
    }

    #[test]
    fn missing_type_and_bad_fields_are_rejected() {
        assert!(matches!(
            EventEnvelope::decode(br#"{"event_id":"e1"}"#),
            Err(NotifyError::MissingType)
        ));
        assert!(matches!(
            EventEnvelope::decode(br#"{"event_id":"e1","type":"mention","post_id":"x"}"#),
            Err(NotifyError::Decode(_))
        ));
        assert!(matches!(EventEnvelope::decode(b"not json"), Err(NotifyError::Decode(_))));
    }

    #[test]
    fn encoded_envelope_carries_tag_beside_id() {
        let envelope = EventEnvelope::with_id(
            "e9",
            NotificationEvent::GroupInviteAccepted(GroupInvite {
                group_id: 4,
                inviter_id: 1,
                invitee_id: 2,
            }),
        );
        let value: serde_json::Value = serde_json::from_slice(&envelope.encode().unwrap()).unwrap();
        assert_eq!(value["type"], "group_invite_accepted");
        assert_eq!(value["event_id"], "e9");
        assert_eq!(value["inviter_id"], 1);
        assert_eq!(EventEnvelope::decode(&envelope.encode().unwrap()).unwrap(), envelope);
    }

    #[test]
    fn every_tag_matches_its_variant() {
        let group = GroupInvite { group_id: 1, inviter_id: 2, invitee_id: 3 };
        let event = NotificationEvent::GroupInviteRejected(group);
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], event.tag());
        assert_eq!(event.recipients(), vec![2]);
    }
}
