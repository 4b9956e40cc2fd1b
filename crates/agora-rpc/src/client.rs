//! JSON-over-HTTP clients for the downstream services.

use crate::ports::{ImageBatch, MediaService, SocialGraph, UserDirectory, UserRecord};
use agora_core::{GroupId, ImageId, RequestContext, RpcCode, RpcStatus, UserId};
use async_trait::async_trait;
use http::StatusCode;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

/// Settings shared by every downstream client.
#[derive(Debug, Clone)]
pub struct ClientSettings {
    /// Per-call timeout ceiling. The request deadline may cut it shorter.
    pub timeout: Duration,
    /// Header carrying the trace ID.
    pub trace_header: String,
    /// Header carrying the request ID.
    pub request_header: String,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(2),
            trace_header: "x-trace-id".to_string(),
            request_header: "x-request-id".to_string(),
        }
    }
}

/// Maps a downstream HTTP status to a transport code.
#[must_use]
pub fn code_for_status(status: StatusCode) -> RpcCode {
    match status.as_u16() {
        400 => RpcCode::InvalidArgument,
        401 => RpcCode::Unauthenticated,
        403 => RpcCode::PermissionDenied,
        404 => RpcCode::NotFound,
        409 => RpcCode::AlreadyExists,
        412 => RpcCode::FailedPrecondition,
        416 => RpcCode::OutOfRange,
        429 => RpcCode::ResourceExhausted,
        499 => RpcCode::Cancelled,
        501 => RpcCode::Unimplemented,
        502 | 503 => RpcCode::Unavailable,
        504 => RpcCode::DeadlineExceeded,
        500..=599 => RpcCode::Internal,
        _ => RpcCode::Unknown,
    }
}

fn transport_status(service: &str, err: &reqwest::Error) -> RpcStatus {
    let code = if err.is_timeout() {
        RpcCode::DeadlineExceeded
    } else if err.is_connect() || err.is_request() {
        RpcCode::Unavailable
    } else if err.is_decode() {
        RpcCode::Internal
    } else {
        RpcCode::Unknown
    };
    RpcStatus::new(code, service, err.to_string())
}

/// One downstream service reachable at a base URL.
#[derive(Debug, Clone)]
struct ServiceClient {
    service: &'static str,
    base_url: String,
    client: Client,
    settings: ClientSettings,
}

impl ServiceClient {
    fn new(
        service: &'static str,
        base_url: impl Into<String>,
        client: Client,
        settings: ClientSettings,
    ) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            service,
            base_url,
            client,
            settings,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn decorate(&self, ctx: &RequestContext, builder: RequestBuilder) -> RequestBuilder {
        let timeout = ctx
            .remaining()
            .map_or(self.settings.timeout, |left| left.min(self.settings.timeout));
        builder
            .timeout(timeout)
            .header(self.settings.trace_header.as_str(), ctx.trace_id().as_str())
            .header(
                self.settings.request_header.as_str(),
                ctx.request_id().to_string(),
            )
    }

    async fn send<T: DeserializeOwned>(
        &self,
        ctx: &RequestContext,
        builder: RequestBuilder,
    ) -> Result<T, RpcStatus> {
        let service = self.service;
        let request = self.decorate(ctx, builder);
        ctx.call(service, async move {
            let response = request
                .send()
                .await
                .map_err(|e| transport_status(service, &e))?;
            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                tracing::debug!(service, status = status.as_u16(), "downstream call failed");
                return Err(RpcStatus::new(code_for_status(status), service, body));
            }
            response
                .json::<T>()
                .await
                .map_err(|e| transport_status(service, &e))
        })
        .await
    }
}

#[derive(Deserialize)]
struct FollowingReply {
    following: bool,
}

#[derive(Deserialize)]
struct MemberReply {
    member: bool,
}

#[derive(Deserialize)]
struct UsersReply {
    users: Vec<UserRecord>,
}

/// Social-graph client.
///
/// `GET /v1/follows?follower={id}&followee={id}` and
/// `GET /v1/groups/{group}/members/{user}`.
#[derive(Debug, Clone)]
pub struct HttpSocialGraph {
    inner: ServiceClient,
}

impl HttpSocialGraph {
    /// Creates a client for the social-graph service at `base_url`.
    pub fn new(base_url: impl Into<String>, client: Client, settings: ClientSettings) -> Self {
        Self {
            inner: ServiceClient::new("graph", base_url, client, settings),
        }
    }
}

#[async_trait]
impl SocialGraph for HttpSocialGraph {
    async fn is_following(
        &self,
        ctx: &RequestContext,
        follower: UserId,
        followee: UserId,
    ) -> Result<bool, RpcStatus> {
        let builder = self
            .inner
            .client
            .get(self.inner.url("/v1/follows"))
            .query(&[("follower", follower), ("followee", followee)]);
        let reply: FollowingReply = self.inner.send(ctx, builder).await?;
        Ok(reply.following)
    }

    async fn is_group_member(
        &self,
        ctx: &RequestContext,
        user: UserId,
        group: GroupId,
    ) -> Result<bool, RpcStatus> {
        let builder = self
            .inner
            .client
            .get(self.inner.url(&format!("/v1/groups/{group}/members/{user}")));
        let reply: MemberReply = self.inner.send(ctx, builder).await?;
        Ok(reply.member)
    }
}

/// User-directory client. `POST /v1/users/batch` with `{"ids": [...]}`.
#[derive(Debug, Clone)]
pub struct HttpUserDirectory {
    inner: ServiceClient,
}

impl HttpUserDirectory {
    /// Creates a client for the users service at `base_url`.
    pub fn new(base_url: impl Into<String>, client: Client, settings: ClientSettings) -> Self {
        Self {
            inner: ServiceClient::new("users", base_url, client, settings),
        }
    }
}

#[async_trait]
impl UserDirectory for HttpUserDirectory {
    async fn get_users(
        &self,
        ctx: &RequestContext,
        ids: &[UserId],
    ) -> Result<HashMap<UserId, UserRecord>, RpcStatus> {
        let builder = self
            .inner
            .client
            .post(self.inner.url("/v1/users/batch"))
            .json(&serde_json::json!({ "ids": ids }));
        let reply: UsersReply = self.inner.send(ctx, builder).await?;
        Ok(reply.users.into_iter().map(|u| (u.id, u)).collect())
    }
}

/// Media client. `POST /v1/images/urls` with `{"ids": [...]}`.
#[derive(Debug, Clone)]
pub struct HttpMediaService {
    inner: ServiceClient,
}

impl HttpMediaService {
    /// Creates a client for the media service at `base_url`.
    pub fn new(base_url: impl Into<String>, client: Client, settings: ClientSettings) -> Self {
        Self {
            inner: ServiceClient::new("media", base_url, client, settings),
        }
    }
}

#[async_trait]
impl MediaService for HttpMediaService {
    async fn get_image_urls(
        &self,
        ctx: &RequestContext,
        ids: &[ImageId],
    ) -> Result<ImageBatch, RpcStatus> {
        let builder = self
            .inner
            .client
            .post(self.inner.url("/v1/images/urls"))
            .json(&serde_json::json!({ "ids": ids }));
        self.inner.send(ctx, builder).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_http_statuses() {
        assert_eq!(code_for_status(StatusCode::NOT_FOUND), RpcCode::NotFound);
        assert_eq!(
            code_for_status(StatusCode::FORBIDDEN),
            RpcCode::PermissionDenied
        );
        assert_eq!(
            code_for_status(StatusCode::SERVICE_UNAVAILABLE),
            RpcCode::Unavailable
        );
        assert_eq!(
            code_for_status(StatusCode::GATEWAY_TIMEOUT),
            RpcCode::DeadlineExceeded
        );
        assert_eq!(
            code_for_status(StatusCode::INTERNAL_SERVER_ERROR),
            RpcCode::Internal
        );
        assert_eq!(code_for_status(StatusCode::IM_A_TEAPOT), RpcCode::Unknown);
    }

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let client = ServiceClient::new(
            "users",
            "http://users.internal/",
            Client::new(),
            ClientSettings::default(),
        );
        assert_eq!(
            client.url("/v1/users/batch"),
            "http://users.internal/v1/users/batch"
        );
    }
}
