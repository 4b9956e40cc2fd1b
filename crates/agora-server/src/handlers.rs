//! Gateway handlers.
//!
//! Every handler runs behind the full stage chain, so the context always
//! carries an authenticated principal.

use crate::state::AppState;
use agora_core::{AgoraError, GroupId, ImageId, PostId, RequestContext, UserId};
use agora_hydrate::{NotificationView, PostView};
use agora_middleware::{Request, Response, ResponseExt};
use agora_notify::{EventEnvelope, NotificationEvent, PostLiked, MAX_PAGE};
use agora_store::{AudienceTag, NewPost, NotificationId};
use http::StatusCode;
use http_body_util::BodyExt;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

/// Notifications returned when the caller gives no `limit`.
pub const DEFAULT_PAGE: usize = 20;

/// Query of `GET /post/read`.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ReadQuery {
    /// Post to read.
    pub id: PostId,
}

/// Query of `GET /notifications`.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct ListQuery {
    /// Page size, 1 to [`MAX_PAGE`].
    pub limit: Option<usize>,
}

impl ListQuery {
    fn page_size(self) -> Result<usize, AgoraError> {
        match self.limit {
            None => Ok(DEFAULT_PAGE),
            Some(limit) if (1..=MAX_PAGE).contains(&limit) => Ok(limit),
            Some(_) => Err(AgoraError::bad_request(format!(
                "limit must be between 1 and {MAX_PAGE}"
            ))),
        }
    }
}

/// Body of `POST /post/create`.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreatePost {
    /// Post text.
    pub body: String,
    /// Visibility policy.
    #[serde(default = "public")]
    pub audience: AudienceTag,
    /// Owning group, required for group posts.
    #[serde(default)]
    pub group_id: GroupId,
    /// Attached image.
    #[serde(default)]
    pub image_id: Option<ImageId>,
    /// Allowed viewers, required for selected-audience posts.
    #[serde(default)]
    pub audience_ids: Vec<UserId>,
}

const fn public() -> AudienceTag {
    AudienceTag::Public
}

impl CreatePost {
    fn validate(&self) -> Result<(), AgoraError> {
        if self.body.trim().is_empty() {
            return Err(AgoraError::bad_request("post body must not be empty"));
        }
        match self.audience {
            AudienceTag::Group if self.group_id <= 0 => {
                Err(AgoraError::bad_request("group posts need a group_id"))
            }
            AudienceTag::Selected if self.audience_ids.is_empty() => {
                Err(AgoraError::bad_request("selected posts need audience_ids"))
            }
            AudienceTag::Public | AudienceTag::Followers | AudienceTag::Group
                if !self.audience_ids.is_empty() =>
            {
                Err(AgoraError::bad_request("audience_ids only apply to selected posts"))
            }
            _ => {
                let mut seen = HashSet::with_capacity(self.audience_ids.len());
                if self.audience_ids.iter().all(|id| seen.insert(*id)) {
                    Ok(())
                } else {
                    Err(AgoraError::bad_request("audience_ids must not repeat"))
                }
            }
        }
    }
}

/// Body of `POST /post/react`.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct React {
    /// Post to like or unlike.
    pub post_id: PostId,
}

/// Body of `POST /notifications/seen`.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MarkSeen {
    /// Notifications to mark.
    pub ids: Vec<NotificationId>,
}

/// Body of `POST /notifications/acted`.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MarkActed {
    /// Notification to mark.
    pub id: NotificationId,
}

#[derive(Debug, Serialize)]
struct Created {
    id: PostId,
}

#[derive(Debug, Serialize)]
struct Reacted {
    liked: bool,
    reactions: usize,
}

#[derive(Debug, Serialize)]
struct Page {
    notifications: Vec<NotificationView>,
}

#[derive(Debug, Serialize)]
struct Updated {
    updated: usize,
}

/// `GET /post/read?id=`
pub async fn read_post(
    state: AppState,
    ctx: Arc<RequestContext>,
    request: Request,
) -> Result<Response, AgoraError> {
    let ReadQuery { id } = query(&request)?;
    state.access.authorize_read(&ctx, id).await?;
    let post = state.db.post(id).await?;
    let view = state.hydrator.hydrate_one(&ctx, PostView::from(post)).await?;
    json(StatusCode::OK, &view)
}

/// `POST /post/create`
pub async fn create_post(
    state: AppState,
    ctx: Arc<RequestContext>,
    request: Request,
) -> Result<Response, AgoraError> {
    let creator = ctx.require_principal()?.user_id();
    let input: CreatePost = read_json(request).await?;
    input.validate()?;

    let new = NewPost {
        id: None,
        creator_id: creator,
        group_id: input.group_id,
        audience: input.audience,
        body: input.body,
        image_id: input.image_id,
        created_at: state.clock.now(),
    };
    let audience = input.audience_ids;
    let id = state
        .db
        .run_tx_for(&ctx, move |tx| {
            Box::pin(async move {
                let id = tx.insert_post(new).await?;
                for user in audience {
                    tx.add_audience_member(id, user).await?;
                }
                Ok::<_, AgoraError>(id)
            })
        })
        .await?;

    tracing::info!(post_id = id, user_id = creator, "post created");
    json(StatusCode::CREATED, &Created { id })
}

/// `POST /post/react`
///
/// Toggles the caller's like. A new like appends a `post_liked` event for the
/// post's creator to the outbox in the same transaction, so the event exists
/// exactly when the like does.
pub async fn react(
    state: AppState,
    ctx: Arc<RequestContext>,
    request: Request,
) -> Result<Response, AgoraError> {
    let liker = ctx.require_principal()?.user_id();
    let React { post_id } = read_json(request).await?;
    state.access.authorize_write(&ctx, post_id).await?;

    let now = state.clock.now();
    let (liked, reactions) = state
        .db
        .run_tx_for(&ctx, move |tx| {
            Box::pin(async move {
                let liked = tx.toggle_reaction(post_id, liker, now).await?;
                if liked {
                    let owner = tx
                        .post(post_id)
                        .await?
                        .map(|post| post.creator_id)
                        .ok_or_else(|| AgoraError::not_found("post not found"))?;
                    let event = EventEnvelope::new(NotificationEvent::PostLiked(PostLiked {
                        post_id,
                        owner_id: owner,
                        liker_id: liker,
                        aggregate: true,
                    }));
                    tx.append_event(&event.encode()?, now).await?;
                }
                Ok::<_, AgoraError>((liked, tx.reaction_count(post_id).await?))
            })
        })
        .await?;

    json(StatusCode::OK, &Reacted { liked, reactions })
}

/// `GET /notifications?limit=`
pub async fn list_notifications(
    state: AppState,
    ctx: Arc<RequestContext>,
    request: Request,
) -> Result<Response, AgoraError> {
    let recipient = ctx.require_principal()?.user_id();
    let limit = query::<ListQuery>(&request)?.page_size()?;
    let rows = state.inbox.list(&ctx, recipient, limit).await?;
    let notifications = state
        .hydrator
        .hydrate(&ctx, rows.into_iter().map(NotificationView::from).collect())
        .await?;
    json(StatusCode::OK, &Page { notifications })
}

/// `POST /notifications/seen`
pub async fn mark_seen(
    state: AppState,
    ctx: Arc<RequestContext>,
    request: Request,
) -> Result<Response, AgoraError> {
    let recipient = ctx.require_principal()?.user_id();
    let MarkSeen { ids } = read_json(request).await?;
    if ids.is_empty() {
        return Err(AgoraError::bad_request("ids must not be empty"));
    }
    let updated = state.inbox.mark_seen(&ctx, recipient, &ids).await?;
    json(StatusCode::OK, &Updated { updated })
}

/// `POST /notifications/acted`
pub async fn mark_acted(
    state: AppState,
    ctx: Arc<RequestContext>,
    request: Request,
) -> Result<Response, AgoraError> {
    let recipient = ctx.require_principal()?.user_id();
    let MarkActed { id } = read_json(request).await?;
    state.inbox.mark_acted(&ctx, recipient, id).await?;
    json(StatusCode::OK, &Updated { updated: 1 })
}

/// Decodes the URL query, percent-escapes included.
fn query<T: DeserializeOwned>(request: &Request) -> Result<T, AgoraError> {
    serde_urlencoded::from_str(request.uri().query().unwrap_or_default())
        .map_err(|err| AgoraError::bad_request(format!("invalid query: {err}")))
}

async fn read_json<T: DeserializeOwned>(request: Request) -> Result<T, AgoraError> {
    let body = request
        .into_body()
        .collect()
        .await
        .unwrap_or_else(|never| match never {})
        .to_bytes();
    serde_json::from_slice(&body).map_err(|err| AgoraError::bad_request(format!("invalid body: {err}")))
}

fn json<T: Serialize>(status: StatusCode, value: &T) -> Result<Response, AgoraError> {
    let body = serde_json::to_value(value)
        .map_err(|err| AgoraError::internal_with_source("failed to encode response", err))?;
    Ok(Response::json(status, &body))
}
