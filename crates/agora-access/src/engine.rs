//! The access-check engine.

use crate::entity::{EntityRef, EntityStore};
use crate::error::AccessError;
use agora_core::{AgoraError, PostId, RequestContext, UserId};
use agora_rpc::SocialGraph;
use agora_store::AudienceTag;
use std::sync::Arc;

/// Outcome of an access check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AudienceDecision {
    /// The requester may see the entity.
    Allowed,
    /// The entity exists but the requester may not see it.
    Denied,
    /// The entity does not exist.
    NotFound,
}

impl AudienceDecision {
    /// Returns the label used in logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Allowed => "allowed",
            Self::Denied => "denied",
            Self::NotFound => "not_found",
        }
    }

    /// Returns `true` for [`AudienceDecision::Allowed`].
    #[must_use]
    pub const fn is_allowed(self) -> bool {
        matches!(self, Self::Allowed)
    }
}

/// Relationship facts between a requester and an entity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Signals {
    /// The requester follows the creator.
    pub is_following: bool,
    /// The requester belongs to the entity's group.
    pub is_group_member: bool,
    /// The requester is listed in the entity's selected audience.
    pub in_selected_audience: bool,
}

/// The audience predicate.
///
/// | Audience | Allowed when |
/// |----------|--------------|
/// | `public` | always |
/// | `followers` | requester follows the creator |
/// | `group` | requester is a group member |
/// | `selected` | requester is in the selected audience |
#[must_use]
pub const fn evaluate(audience: AudienceTag, signals: Signals) -> AudienceDecision {
    let allowed = match audience {
        AudienceTag::Public => true,
        AudienceTag::Followers => signals.is_following,
        AudienceTag::Group => signals.is_group_member,
        AudienceTag::Selected => signals.in_selected_audience,
    };
    if allowed {
        AudienceDecision::Allowed
    } else {
        AudienceDecision::Denied
    }
}

/// Decides whether a requester may see an entity.
///
/// Nothing is cached: every check reads the entity and the social graph
/// afresh.
#[derive(Clone)]
pub struct AccessEngine {
    entities: Arc<dyn EntityStore>,
    graph: Arc<dyn SocialGraph>,
}

impl std::fmt::Debug for AccessEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessEngine").finish_non_exhaustive()
    }
}

impl AccessEngine {
    /// Creates an engine.
    #[must_use]
    pub fn new(entities: Arc<dyn EntityStore>, graph: Arc<dyn SocialGraph>) -> Self {
        Self { entities, graph }
    }

    /// Decides whether `requester` may see `entity`. `None` is an anonymous
    /// requester, who may only see public entities.
    pub async fn can_view(
        &self,
        ctx: &RequestContext,
        requester: Option<UserId>,
        entity: PostId,
    ) -> Result<AudienceDecision, AccessError> {
        let result = self.decide(ctx, requester, entity).await;
        match &result {
            Ok(decision) => {
                agora_telemetry::record_access_decision(decision.as_str());
                tracing::debug!(
                    entity,
                    requester,
                    decision = decision.as_str(),
                    "access decision"
                );
            }
            Err(err) => {
                agora_telemetry::record_access_decision("indeterminate");
                tracing::warn!(entity, requester, error = %err, "access decision indeterminate");
            }
        }
        result
    }

    async fn decide(
        &self,
        ctx: &RequestContext,
        requester: Option<UserId>,
        id: PostId,
    ) -> Result<AudienceDecision, AccessError> {
        let Some(entity) = self.entities.entity(ctx, id).await? else {
            return Ok(AudienceDecision::NotFound);
        };
        let Some(requester) = requester else {
            return Ok(evaluate(entity.audience, Signals::default()));
        };
        if requester == entity.creator_id || entity.audience == AudienceTag::Public {
            return Ok(AudienceDecision::Allowed);
        }
        let signals = self.signals(ctx, requester, &entity).await?;
        Ok(evaluate(entity.audience, signals))
    }

    /// Gathers the signals the entity's audience reads, concurrently.
    async fn signals(
        &self,
        ctx: &RequestContext,
        requester: UserId,
        entity: &EntityRef,
    ) -> Result<Signals, AccessError> {
        let following = async {
            if entity.audience == AudienceTag::Followers {
                self.graph
                    .is_following(ctx, requester, entity.creator_id)
                    .await
                    .map(Some)
            } else {
                Ok(None)
            }
        };
        let member = async {
            if entity.audience == AudienceTag::Group && entity.group_id != 0 {
                self.graph
                    .is_group_member(ctx, requester, entity.group_id)
                    .await
                    .map(Some)
            } else {
                Ok(None)
            }
        };
        let selected = async {
            if entity.audience == AudienceTag::Selected {
                self.entities
                    .in_selected_audience(ctx, entity.id, requester)
                    .await
                    .map(Some)
            } else {
                Ok(None)
            }
        };

        let (following, member, selected) = tokio::join!(following, member, selected);
        Ok(Signals {
            is_following: following?.unwrap_or(false),
            is_group_member: member?.unwrap_or(false),
            in_selected_audience: selected?.unwrap_or(false),
        })
    }

    /// Guards a read by the context's caller.
    ///
    /// Denied is 403 and missing is 404. An indeterminate decision is reported
    /// with its classified error, so an unavailable graph surfaces as 503.
    pub async fn authorize_read(&self, ctx: &RequestContext, entity: PostId) -> Result<(), AgoraError> {
        match self.can_view(ctx, ctx.caller().user_id(), entity).await? {
            AudienceDecision::Allowed => Ok(()),
            AudienceDecision::Denied => Err(AgoraError::forbidden("you cannot view this post")),
            AudienceDecision::NotFound => Err(AgoraError::not_found("post not found")),
        }
    }

    /// Guards a write by the context's caller.
    ///
    /// Requires an authenticated caller. An indeterminate decision is a denial.
    pub async fn authorize_write(&self, ctx: &RequestContext, entity: PostId) -> Result<(), AgoraError> {
        let requester = ctx.require_principal()?.user_id();
        match self.can_view(ctx, Some(requester), entity).await {
            Ok(AudienceDecision::Allowed) => Ok(()),
            Ok(AudienceDecision::Denied) | Err(AccessError::Indeterminate(_)) => {
                Err(AgoraError::forbidden("you cannot modify this post"))
            }
            Ok(AudienceDecision::NotFound) => Err(AgoraError::not_found("post not found")),
            Err(err @ AccessError::Store(_)) => Err(err.into()),
        }
    }
}
