//! Outbound service ports.
//!
//! Every call takes the [`RequestContext`] so implementations can propagate
//! the trace and request IDs and stop at the request deadline. Failures are
//! reported as [`RpcStatus`] and classified by the caller.

use agora_core::{GroupId, ImageId, RequestContext, RpcStatus, UserId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Social-graph signals used by the access-check engine.
#[async_trait]
pub trait SocialGraph: Send + Sync {
    /// Returns `true` if `follower` follows `followee`.
    async fn is_following(
        &self,
        ctx: &RequestContext,
        follower: UserId,
        followee: UserId,
    ) -> Result<bool, RpcStatus>;

    /// Returns `true` if `user` belongs to `group`.
    async fn is_group_member(
        &self,
        ctx: &RequestContext,
        user: UserId,
        group: GroupId,
    ) -> Result<bool, RpcStatus>;
}

/// Batch user lookup.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Resolves users by ID. Unknown IDs are absent from the result.
    async fn get_users(
        &self,
        ctx: &RequestContext,
        ids: &[UserId],
    ) -> Result<HashMap<UserId, UserRecord>, RpcStatus>;
}

/// Batch image URL lookup.
#[async_trait]
pub trait MediaService: Send + Sync {
    /// Resolves image IDs to URLs.
    ///
    /// A failure for a single ID is reported in [`ImageBatch::failed`]; only a
    /// failure of the whole batch is an error.
    async fn get_image_urls(
        &self,
        ctx: &RequestContext,
        ids: &[ImageId],
    ) -> Result<ImageBatch, RpcStatus>;
}

/// Public profile of a user, as returned by the user directory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    /// User ID. Zero for the placeholder of an unknown user.
    pub id: UserId,
    /// Handle.
    pub username: String,
    /// Display name.
    #[serde(default)]
    pub display_name: String,
    /// Avatar URL, empty when unset.
    #[serde(default)]
    pub avatar_url: String,
}

/// Result of a batch image lookup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageBatch {
    /// Resolved URLs.
    #[serde(default)]
    pub urls: BTreeMap<ImageId, String>,
    /// IDs the media service could not resolve.
    #[serde(default)]
    pub failed: Vec<ImageId>,
}
