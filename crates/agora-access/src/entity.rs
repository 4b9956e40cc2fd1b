//! Entity lookup.

use agora_core::{GroupId, PostId, RequestContext, UserId};
use agora_store::{AudienceTag, Database, StoreError};
use async_trait::async_trait;

/// The fields of a visibility-controlled entity the engine reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntityRef {
    /// Entity ID.
    pub id: PostId,
    /// Creator.
    pub creator_id: UserId,
    /// Owning group, zero when none.
    pub group_id: GroupId,
    /// Audience policy.
    pub audience: AudienceTag,
}

/// Read access to entities and their selected audiences.
#[async_trait]
pub trait EntityStore: Send + Sync {
    /// Looks up an entity. `None` when it does not exist.
    async fn entity(&self, ctx: &RequestContext, id: PostId) -> Result<Option<EntityRef>, StoreError>;

    /// Returns `true` if `user` is listed in the entity's selected audience.
    async fn in_selected_audience(
        &self,
        ctx: &RequestContext,
        id: PostId,
        user: UserId,
    ) -> Result<bool, StoreError>;
}

#[async_trait]
impl EntityStore for Database {
    async fn entity(&self, ctx: &RequestContext, id: PostId) -> Result<Option<EntityRef>, StoreError> {
        let post = self.connection_for(ctx).await?.post(id).await?;
        Ok(post.map(|post| EntityRef {
            id: post.id,
            creator_id: post.creator_id,
            group_id: post.group_id,
            audience: post.audience,
        }))
    }

    async fn in_selected_audience(
        &self,
        ctx: &RequestContext,
        id: PostId,
        user: UserId,
    ) -> Result<bool, StoreError> {
        self.connection_for(ctx)
            .await?
            .is_audience_member(id, user)
            .await
    }
}
