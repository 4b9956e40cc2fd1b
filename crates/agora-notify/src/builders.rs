//! One builder per event variant.
//!
//! Every builder maps its event to the notifications it produces, one
//! [`NotificationDraft`] per recipient. Drafts are not yet persisted; the
//! dispatcher stamps times and decides between inserting and folding.

use crate::event::{
    FollowRequestCreated, GroupInvite, GroupJoinRequest, Mention, NewEventInGroup, NewFollower,
    NewMessage, NotificationEvent, PostCommented, PostLiked,
};
use crate::kind::NotificationKind;
use agora_core::UserId;
use std::collections::BTreeMap;

/// A notification about to be written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationDraft {
    /// Who receives it.
    pub recipient: UserId,
    /// Type tag.
    pub kind: NotificationKind,
    /// Entity the notification is about.
    pub source_entity: i64,
    /// Who caused it.
    pub actor: UserId,
    /// Fold into a recent unseen row when the kind allows it.
    pub aggregate: bool,
    /// Opaque payload.
    pub payload: BTreeMap<String, String>,
}

impl NotificationDraft {
    fn new(kind: NotificationKind, recipient: UserId, source_entity: i64, actor: UserId) -> Self {
        let mut payload = BTreeMap::new();
        payload.insert("actor_id".to_string(), actor.to_string());
        Self {
            recipient,
            kind,
            source_entity,
            actor,
            aggregate: false,
            payload,
        }
    }

    fn with(mut self, key: &str, value: impl ToString) -> Self {
        self.payload.insert(key.to_string(), value.to_string());
        self
    }

    fn aggregated(mut self, aggregate: bool) -> Self {
        self.aggregate = aggregate && self.kind.is_aggregatable();
        self
    }

    /// Whether the actor would be notifying themselves.
    #[must_use]
    pub const fn is_self_notification(&self) -> bool {
        self.recipient == self.actor
    }
}

/// Routes an event to its builder.
#[must_use]
pub fn build(event: &NotificationEvent) -> Vec<NotificationDraft> {
    match event {
        NotificationEvent::FollowRequestCreated(e) => follow_request_created(e),
        NotificationEvent::NewFollower(e) => new_follower(e),
        NotificationEvent::GroupInviteCreated(e) => group_invite_created(e),
        NotificationEvent::GroupInviteAccepted(e) => group_invite_accepted(e),
        NotificationEvent::GroupInviteRejected(e) => group_invite_rejected(e),
        NotificationEvent::GroupJoinRequestCreated(e) => group_join_request_created(e),
        NotificationEvent::GroupJoinRequestAccepted(e) => group_join_request_accepted(e),
        NotificationEvent::GroupJoinRequestRejected(e) => group_join_request_rejected(e),
        NotificationEvent::NewEventInGroup(e) => new_event_in_group(e),
        NotificationEvent::PostLiked(e) => post_liked(e),
        NotificationEvent::PostCommented(e) => post_commented(e),
        NotificationEvent::Mention(e) => mention(e),
        NotificationEvent::NewMessage(e) => new_message(e),
    }
}

/// Asks the target to approve a follow.
#[must_use]
pub fn follow_request_created(e: &FollowRequestCreated) -> Vec<NotificationDraft> {
    vec![NotificationDraft::new(
        NotificationKind::FollowRequest,
        e.target_id,
        e.requester_id,
        e.requester_id,
    )]
}

/// Tells the followee. Keyed on the followee so all new followers fold together.
#[must_use]
pub fn new_follower(e: &NewFollower) -> Vec<NotificationDraft> {
    vec![NotificationDraft::new(
        NotificationKind::NewFollower,
        e.followee_id,
        e.followee_id,
        e.follower_id,
    )
    .aggregated(e.aggregate)]
}

/// Asks the invitee to accept.
#[must_use]
pub fn group_invite_created(e: &GroupInvite) -> Vec<NotificationDraft> {
    vec![NotificationDraft::new(
        NotificationKind::GroupInvite,
        e.invitee_id,
        e.group_id,
        e.inviter_id,
    )]
}

/// Tells the inviter.
#[must_use]
pub fn group_invite_accepted(e: &GroupInvite) -> Vec<NotificationDraft> {
    vec![NotificationDraft::new(
        NotificationKind::GroupInviteAccepted,
        e.inviter_id,
        e.group_id,
        e.invitee_id,
    )]
}

/// Tells the inviter.
#[must_use]
pub fn group_invite_rejected(e: &GroupInvite) -> Vec<NotificationDraft> {
    vec![NotificationDraft::new(
        NotificationKind::GroupInviteRejected,
        e.inviter_id,
        e.group_id,
        e.invitee_id,
    )]
}

/// Asks the owner to decide.
#[must_use]
pub fn group_join_request_created(e: &GroupJoinRequest) -> Vec<NotificationDraft> {
    vec![NotificationDraft::new(
        NotificationKind::GroupJoinRequest,
        e.owner_id,
        e.group_id,
        e.requester_id,
    )
    .with("requester_id", e.requester_id)]
}

/// Tells the requester.
#[must_use]
pub fn group_join_request_accepted(e: &GroupJoinRequest) -> Vec<NotificationDraft> {
    vec![NotificationDraft::new(
        NotificationKind::GroupJoinRequestAccepted,
        e.requester_id,
        e.group_id,
        e.owner_id,
    )]
}

/// Tells the requester.
#[must_use]
pub fn group_join_request_rejected(e: &GroupJoinRequest) -> Vec<NotificationDraft> {
    vec![NotificationDraft::new(
        NotificationKind::GroupJoinRequestRejected,
        e.requester_id,
        e.group_id,
        e.owner_id,
    )]
}

/// Tells every member.
#[must_use]
pub fn new_event_in_group(e: &NewEventInGroup) -> Vec<NotificationDraft> {
    e.member_ids
        .iter()
        .map(|&member| {
            NotificationDraft::new(
                NotificationKind::NewEvent,
                member,
                e.group_event_id,
                e.creator_id,
            )
            .with("group_id", e.group_id)
            .with("title", &e.title)
        })
        .collect()
}

/// Tells the post's creator.
#[must_use]
pub fn post_liked(e: &PostLiked) -> Vec<NotificationDraft> {
    vec![
        NotificationDraft::new(NotificationKind::PostLiked, e.owner_id, e.post_id, e.liker_id)
            .aggregated(e.aggregate),
    ]
}

/// Tells the post's creator.
#[must_use]
pub fn post_commented(e: &PostCommented) -> Vec<NotificationDraft> {
    vec![NotificationDraft::new(
        NotificationKind::PostCommented,
        e.owner_id,
        e.post_id,
        e.commenter_id,
    )
    .with("comment_id", e.comment_id)
    .aggregated(e.aggregate)]
}

/// Tells the mentioned user.
#[must_use]
pub fn mention(e: &Mention) -> Vec<NotificationDraft> {
    vec![NotificationDraft::new(
        NotificationKind::Mention,
        e.mentioned_id,
        e.post_id,
        e.author_id,
    )]
}

/// Tells every conversation member.
#[must_use]
pub fn new_message(e: &NewMessage) -> Vec<NotificationDraft> {
    e.recipient_ids
        .iter()
        .map(|&recipient| {
            NotificationDraft::new(
                NotificationKind::NewMessage,
                recipient,
                e.conversation_id,
                e.sender_id,
            )
            .aggregated(e.aggregate)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn actionable_builders_set_needs_action_through_kind() {
        let drafts = build(&NotificationEvent::GroupJoinRequestCreated(GroupJoinRequest {
            group_id: 5,
            requester_id: 2,
            owner_id: 9,
        }));
        assert_eq!(drafts.len(), 1);
        assert_eq!(drafts[0].recipient, 9);
        assert!(drafts[0].kind.needs_action());
        assert!(!drafts[0].aggregate);
        assert_eq!(drafts[0].payload["requester_id"], "2");
    }

    #[test]
    fn like_is_aggregated_unless_asked_not_to() {
        let mut like = PostLiked {
            post_id: 77,
            owner_id: 7,
            liker_id: 3,
            aggregate: true,
        };
        assert!(post_liked(&like)[0].aggregate);
        like.aggregate = false;
        assert!(!post_liked(&like)[0].aggregate);
    }

    #[test]
    fn fan_out_builders_produce_one_draft_per_member() {
        let drafts = new_event_in_group(&NewEventInGroup {
            group_id: 4,
            group_event_id: 10,
            creator_id: 1,
            member_ids: vec![1, 2, 3],
            title: "picnic".to_string(),
        });
        assert_eq!(drafts.iter().map(|d| d.recipient).collect::<Vec<_>>(), [1, 2, 3]);
        assert!(drafts[0].is_self_notification());
        assert_eq!(drafts[2].payload["title"], "picnic");
        assert_eq!(drafts[2].source_entity, 10);
    }
}
