//! Notification type tags.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The type tag stored on every notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    /// Someone asked to follow the recipient.
    FollowRequest,
    /// Someone followed the recipient.
    NewFollower,
    /// The recipient was invited to a group.
    GroupInvite,
    /// An invitation the recipient sent was accepted.
    GroupInviteAccepted,
    /// An invitation the recipient sent was rejected.
    GroupInviteRejected,
    /// Someone asked to join a group the recipient owns.
    GroupJoinRequest,
    /// The recipient's join request was accepted.
    GroupJoinRequestAccepted,
    /// The recipient's join request was rejected.
    GroupJoinRequestRejected,
    /// A group the recipient belongs to scheduled an event.
    NewEvent,
    /// Someone liked the recipient's post.
    PostLiked,
    /// Someone commented on the recipient's post.
    PostCommented,
    /// Someone mentioned the recipient.
    Mention,
    /// Someone messaged the recipient.
    NewMessage,
}

impl NotificationKind {
    /// Every kind.
    pub const ALL: [Self; 13] = [
        Self::FollowRequest,
        Self::NewFollower,
        Self::GroupInvite,
        Self::GroupInviteAccepted,
        Self::GroupInviteRejected,
        Self::GroupJoinRequest,
        Self::GroupJoinRequestAccepted,
        Self::GroupJoinRequestRejected,
        Self::NewEvent,
        Self::PostLiked,
        Self::PostCommented,
        Self::Mention,
        Self::NewMessage,
    ];

    /// Returns the stored type tag.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::FollowRequest => "follow_request",
            Self::NewFollower => "new_follower",
            Self::GroupInvite => "group_invite",
            Self::GroupInviteAccepted => "group_invite_accepted",
            Self::GroupInviteRejected => "group_invite_rejected",
            Self::GroupJoinRequest => "group_join_request",
            Self::GroupJoinRequestAccepted => "group_join_request_accepted",
            Self::GroupJoinRequestRejected => "group_join_request_rejected",
            Self::NewEvent => "new_event",
            Self::PostLiked => "post_liked",
            Self::PostCommented => "post_commented",
            Self::Mention => "mention",
            Self::NewMessage => "new_message",
        }
    }

    /// Whether the recipient is expected to accept or decline.
    #[must_use]
    pub const fn needs_action(self) -> bool {
        matches!(
            self,
            Self::FollowRequest | Self::GroupInvite | Self::GroupJoinRequest
        )
    }

    /// Whether repeated events fold into one row.
    #[must_use]
    pub const fn is_aggregatable(self) -> bool {
        matches!(
            self,
            Self::NewFollower | Self::PostLiked | Self::PostCommented | Self::NewMessage
        )
    }

    /// The service that owns the source entity.
    #[must_use]
    pub const fn source_service(self) -> &'static str {
        match self {
            Self::FollowRequest | Self::NewFollower => "users",
            Self::GroupInvite
            | Self::GroupInviteAccepted
            | Self::GroupInviteRejected
            | Self::GroupJoinRequest
            | Self::GroupJoinRequestAccepted
            | Self::GroupJoinRequestRejected => "groups",
            Self::NewEvent => "events",
            Self::PostLiked | Self::PostCommented | Self::Mention => "posts",
            Self::NewMessage => "chat",
        }
    }
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error for an unrecognised type tag.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown notification kind: {0}")]
pub struct UnknownKind(pub String);

impl FromStr for NotificationKind {
    type Err = UnknownKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| UnknownKind(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_round_trip_through_from_str() {
        for kind in NotificationKind::ALL {
            assert_eq!(kind.as_str().parse::<NotificationKind>(), Ok(kind));
        }
        assert!("poke".parse::<NotificationKind>().is_err());
    }

    #[test]
    fn actionable_and_aggregatable_are_disjoint() {
        for kind in NotificationKind::ALL {
            assert!(!(kind.needs_action() && kind.is_aggregatable()), "{kind}");
        }
        assert!(NotificationKind::GroupInvite.needs_action());
        assert!(!NotificationKind::GroupInviteAccepted.needs_action());
        assert!(NotificationKind::NewMessage.is_aggregatable());
    }
}
