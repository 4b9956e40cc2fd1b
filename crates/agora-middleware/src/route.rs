//! Route assembly.
//!
//! [`GatewayStack`] holds the process-wide pieces (limiter, verifier, clock,
//! header conventions) and turns a [`RouteSpec`] into a [`RouteHandler`] whose
//! pipeline runs the stages in their fixed order.
//!
//! ```ignore
//! let route = RouteSpec::new("/post/read", handler(read_post))
//!     .methods([Method::GET])
//!     .require_auth()
//!     .ip_limit(BucketSpec::new(20, 5.0))
//!     .principal_limit(BucketSpec::new(40, 20.0));
//! let read = stack.build(route)?;
//! let response = read.call(request, Some(peer_ip)).await;
//! ```

use crate::claims::TokenVerifier;
use crate::context::MiddlewareContext;
use crate::limiter::{BucketSpec, RateLimiter};
use crate::middleware::BoxFuture;
use crate::pipeline::{Pipeline, PipelineError, Stage};
use crate::stages::{AuthStage, ContextEnrichStage, FailMode, MethodGate, RateLimitStage};
use crate::types::{Request, Response, ResponseExt};
use agora_core::{AgoraError, Clock, RequestContext};
use http::header::{HeaderName, HeaderValue};
use http::Method;
use std::future::Future;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

/// A business handler.
pub type HandlerFn = Arc<
    dyn Fn(Arc<RequestContext>, Request) -> BoxFuture<'static, Result<Response, AgoraError>>
        + Send
        + Sync,
>;

/// Wraps an async function as a [`HandlerFn`].
pub fn handler<F, Fut>(f: F) -> HandlerFn
where
    F: Fn(Arc<RequestContext>, Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Response, AgoraError>> + Send + 'static,
{
    Arc::new(move |ctx, request| Box::pin(f(ctx, request)))
}

#[derive(Debug, Clone, Copy)]
enum PrincipalLimit {
    Default,
    Custom(BucketSpec),
    Disabled,
}

/// Declarative description of one route.
pub struct RouteSpec {
    pattern: String,
    methods: Vec<Method>,
    require_auth: bool,
    ip_limit: Option<BucketSpec>,
    principal_limit: PrincipalLimit,
    handler: HandlerFn,
}

impl std::fmt::Debug for RouteSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouteSpec")
            .field("pattern", &self.pattern)
            .field("methods", &self.methods)
            .field("require_auth", &self.require_auth)
            .field("ip_limit", &self.ip_limit)
            .field("principal_limit", &self.principal_limit)
            .finish_non_exhaustive()
    }
}

impl RouteSpec {
    /// A `GET` route without auth, using the default IP limit.
    #[must_use]
    pub fn new(pattern: impl Into<String>, handler: HandlerFn) -> Self {
        Self {
            pattern: pattern.into(),
            methods: vec![Method::GET],
            require_auth: false,
            ip_limit: None,
            principal_limit: PrincipalLimit::Default,
            handler,
        }
    }

    /// Sets the accepted methods.
    #[must_use]
    pub fn methods(mut self, methods: impl IntoIterator<Item = Method>) -> Self {
        self.methods = methods.into_iter().collect();
        self
    }

    /// Requires a valid credential. Enables the default per-user limit.
    #[must_use]
    pub fn require_auth(mut self) -> Self {
        self.require_auth = true;
        self
    }

    /// Overrides the per-IP bucket.
    #[must_use]
    pub fn ip_limit(mut self, spec: BucketSpec) -> Self {
        self.ip_limit = Some(spec);
        self
    }

    /// Overrides the per-user bucket.
    #[must_use]
    pub fn principal_limit(mut self, spec: BucketSpec) -> Self {
        self.principal_limit = PrincipalLimit::Custom(spec);
        self
    }

    /// Drops the per-user limit.
    #[must_use]
    pub fn without_principal_limit(mut self) -> Self {
        self.principal_limit = PrincipalLimit::Disabled;
        self
    }

    /// Returns the path pattern.
    #[must_use]
    pub fn pattern(&self) -> &str {
        &self.pattern
    }
}

/// Header conventions and policies shared by every route.
#[derive(Debug, Clone)]
pub struct GatewaySettings {
    /// Cookie carrying the credential.
    pub cookie_name: String,
    /// Header carrying a propagated trace ID.
    pub trace_header: HeaderName,
    /// Header echoing the request ID.
    pub request_header: HeaderName,
    /// Trust `x-forwarded-for` / `x-real-ip` for the client IP.
    pub trust_forwarded_for: bool,
    /// Deadline attached to each request context.
    pub request_timeout: Option<Duration>,
    /// Per-IP bucket for routes that do not override it.
    pub ip_default: BucketSpec,
    /// Per-user bucket for authenticated routes that do not override it.
    pub principal_default: BucketSpec,
    /// Behaviour when the limiter fails on the IP stage.
    pub ip_fail_mode: FailMode,
    /// Behaviour when the limiter fails on the principal stage.
    pub principal_fail_mode: FailMode,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            cookie_name: "jwt".to_string(),
            trace_header: HeaderName::from_static("x-trace-id"),
            request_header: HeaderName::from_static("x-request-id"),
            trust_forwarded_for: false,
            request_timeout: Some(Duration::from_secs(10)),
            ip_default: BucketSpec::new(20, 5.0),
            principal_default: BucketSpec::new(40, 20.0),
            ip_fail_mode: FailMode::Open,
            principal_fail_mode: FailMode::Closed,
        }
    }
}

/// Shared pieces every route's pipeline is built from.
#[derive(Clone)]
pub struct GatewayStack {
    limiter: Arc<dyn RateLimiter>,
    verifier: TokenVerifier,
    clock: Arc<dyn Clock>,
    settings: GatewaySettings,
}

impl std::fmt::Debug for GatewayStack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayStack")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl GatewayStack {
    /// Creates a stack.
    #[must_use]
    pub fn new(
        limiter: Arc<dyn RateLimiter>,
        verifier: TokenVerifier,
        clock: Arc<dyn Clock>,
        settings: GatewaySettings,
    ) -> Self {
        Self {
            limiter,
            verifier,
            clock,
            settings,
        }
    }

    /// Returns the settings.
    #[must_use]
    pub const fn settings(&self) -> &GatewaySettings {
        &self.settings
    }

    /// Returns the credential verifier.
    #[must_use]
    pub const fn verifier(&self) -> &TokenVerifier {
        &self.verifier
    }

    /// Builds the handler for `route`.
    pub fn build(&self, route: RouteSpec) -> Result<RouteHandler, PipelineError> {
        let settings = &self.settings;
        let mut builder = Pipeline::builder()
            .stage(Stage::MethodGate, MethodGate::new(route.methods.iter().cloned()))
            .stage(
                Stage::IpRateLimit,
                RateLimitStage::per_ip(
                    Arc::clone(&self.limiter),
                    route.ip_limit.unwrap_or(settings.ip_default),
                    settings.ip_fail_mode,
                ),
            )
            .stage(
                Stage::ContextEnrich,
                ContextEnrichStage::new(
                    settings.trace_header.clone(),
                    settings.request_header.clone(),
                    settings.request_timeout,
                ),
            );

        if route.require_auth {
            builder = builder.stage(
                Stage::Auth,
                AuthStage::new(
                    self.verifier.clone(),
                    settings.cookie_name.clone(),
                    Arc::clone(&self.clock),
                ),
            );
        }

        let principal_limit = match (route.principal_limit, route.require_auth) {
            (PrincipalLimit::Custom(spec), _) => Some(spec),
            (PrincipalLimit::Default, true) => Some(settings.principal_default),
            (PrincipalLimit::Default | PrincipalLimit::Disabled, _) => None,
        };
        if let Some(spec) = principal_limit {
            builder = builder.stage(
                Stage::PrincipalRateLimit,
                RateLimitStage::per_principal(
                    Arc::clone(&self.limiter),
                    spec,
                    settings.principal_fail_mode,
                ),
            );
        }

        let pipeline = builder.build()?;
        tracing::debug!(
            route = %route.pattern,
            stages = ?pipeline.stage_names(),
            "route built"
        );
        Ok(RouteHandler {
            pattern: route.pattern,
            methods: route.methods,
            pipeline: Arc::new(pipeline),
            handler: route.handler,
            request_header: settings.request_header.clone(),
            trust_forwarded_for: settings.trust_forwarded_for,
        })
    }
}

/// A route ready to serve requests.
#[derive(Clone)]
pub struct RouteHandler {
    pattern: String,
    methods: Vec<Method>,
    pipeline: Arc<Pipeline>,
    handler: HandlerFn,
    request_header: HeaderName,
    trust_forwarded_for: bool,
}

impl std::fmt::Debug for RouteHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouteHandler")
            .field("pattern", &self.pattern)
            .field("methods", &self.methods)
            .field("pipeline", &self.pipeline)
            .finish_non_exhaustive()
    }
}

impl RouteHandler {
    /// Returns the path pattern.
    #[must_use]
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Returns the accepted methods.
    #[must_use]
    pub fn methods(&self) -> &[Method] {
        &self.methods
    }

    /// Returns the stage names in execution order.
    #[must_use]
    pub fn stage_names(&self) -> Vec<&'static str> {
        self.pipeline.stage_names()
    }

    /// Serves one request. `peer` is the socket's remote address.
    pub async fn call(&self, request: Request, peer: Option<IpAddr>) -> Response {
        let client_ip = client_ip(&request, peer, self.trust_forwarded_for);
        let mut ctx = MiddlewareContext::new(client_ip);
        let handler = Arc::clone(&self.handler);
        let route = self.pattern.clone();

        let mut response = self
            .pipeline
            .process(&mut ctx, request, move |ctx, request| {
                let context = ctx.request_context().cloned();
                Box::pin(async move {
                    let Some(context) = context else {
                        tracing::error!(route = %route, "handler reached without a request context");
                        return Response::from_error(&AgoraError::internal("internal error"));
                    };
                    let request_id = context.request_id();
                    match handler(context, request).await {
                        Ok(response) => response,
                        Err(err) => {
                            if err.status_code().is_server_error() {
                                agora_telemetry::log_request_error!(request_id, route, err);
                            }
                            Response::from_error(&err)
                        }
                    }
                })
            })
            .await;

        if !response.headers().contains_key(&self.request_header) {
            if let Ok(value) = HeaderValue::from_str(&ctx.request_id().to_string()) {
                response
                    .headers_mut()
                    .insert(self.request_header.clone(), value);
            }
        }

        let elapsed = ctx.started_at().elapsed();
        let status = response.status().as_u16();
        agora_telemetry::record_request(&self.pattern, status, elapsed);
        agora_telemetry::log_request_complete!(
            ctx.request_id(),
            self.pattern,
            status,
            u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
        );
        response
    }
}

/// Resolves the client IP: the peer address, or the first forwarded hop when
/// forwarded headers are trusted.
#[must_use]
pub fn client_ip(request: &Request, peer: Option<IpAddr>, trust_forwarded_for: bool) -> String {
    if trust_forwarded_for {
        let forwarded = request
            .headers()
            .get("x-forwarded-for")
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.split(',').next())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .or_else(|| {
                request
                    .headers()
                    .get("x-real-ip")
                    .and_then(|value| value.to_str().ok())
                    .map(str::trim)
                    .filter(|value| !value.is_empty())
            });
        if let Some(ip) = forwarded {
            return ip.to_string();
        }
    }
    peer.map_or_else(|| "unknown".to_string(), |ip| ip.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use http_body_util::Full;

    fn request_with(headers: &[(&str, &str)]) -> Request {
        let mut builder = http::Request::builder().uri("/");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        builder.body(Full::new(Bytes::new())).unwrap()
    }

    #[test]
    fn peer_address_unless_forwarding_is_trusted() {
        let peer: IpAddr = "10.1.1.1".parse().unwrap();
        let request = request_with(&[("x-forwarded-for", "203.0.113.7, 10.0.0.1")]);
        assert_eq!(client_ip(&request, Some(peer), false), "10.1.1.1");
        assert_eq!(client_ip(&request, Some(peer), true), "203.0.113.7");
    }

    #[test]
    fn real_ip_is_second_choice() {
        let request = request_with(&[("x-real-ip", "198.51.100.2")]);
        assert_eq!(client_ip(&request, None, true), "198.51.100.2");
        assert_eq!(client_ip(&request_with(&[]), None, true), "unknown");
    }
}
