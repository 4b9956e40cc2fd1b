//! Fixed-order gateway pipeline.
//!
//! ## Stages
//!
//! 1. **method-gate** - 405 unless the method is allowed
//! 2. **ip-rate-limit** - 429 when the client IP's bucket is empty
//! 3. **auth** - 401 unless a valid credential is presented (optional per route)
//! 4. **context-enrich** - freezes the request context and opens the request span
//! 5. **principal-rate-limit** - 429 when the user's bucket is empty (optional per route)
//! 6. **handler** - the business handler
//!
//! Stages are keyed by [`Stage`], so the order does not depend on the order
//! they were registered in.

use crate::context::MiddlewareContext;
use crate::middleware::{BoxFuture, Middleware, Next};
use crate::types::{Request, Response};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

/// A shared middleware stage.
pub type BoxedMiddleware = Arc<dyn Middleware>;

/// Positions in the gateway chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum Stage {
    /// Method check.
    MethodGate = 1,
    /// Per-IP rate limit.
    IpRateLimit = 2,
    /// Credential verification.
    Auth = 3,
    /// Request-context construction.
    ContextEnrich = 4,
    /// Per-user rate limit.
    PrincipalRateLimit = 5,
    /// Business handler.
    Handler = 6,
}

impl Stage {
    /// All stages in execution order.
    #[must_use]
    pub const fn all() -> [Stage; 6] {
        [
            Self::MethodGate,
            Self::IpRateLimit,
            Self::Auth,
            Self::ContextEnrich,
            Self::PrincipalRateLimit,
            Self::Handler,
        ]
    }

    /// Stage name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::MethodGate => "method-gate",
            Self::IpRateLimit => "ip-rate-limit",
            Self::Auth => "auth",
            Self::ContextEnrich => "context-enrich",
            Self::PrincipalRateLimit => "principal-rate-limit",
            Self::Handler => "handler",
        }
    }

    /// Whether a route may omit this stage.
    #[must_use]
    pub const fn is_optional(self) -> bool {
        matches!(self, Self::Auth | Self::PrincipalRateLimit)
    }
}

/// Invalid pipeline wiring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PipelineError {
    /// A mandatory stage was not registered.
    #[error("pipeline is missing mandatory stage {}", .0.name())]
    MissingStage(Stage),
    /// The handler is supplied per request, not registered as a stage.
    #[error("the handler stage cannot be registered as middleware")]
    HandlerNotMiddleware,
    /// Per-user limiting needs an authenticated principal.
    #[error("principal-rate-limit requires the auth stage")]
    PrincipalLimitWithoutAuth,
}

/// An immutable chain of stages.
pub struct Pipeline {
    stages: BTreeMap<Stage, BoxedMiddleware>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("stages", &self.stage_names())
            .finish()
    }
}

impl Pipeline {
    /// Creates a builder.
    #[must_use]
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::new()
    }

    /// Runs `request` through every stage, then `handler`.
    pub async fn process<H>(&self, ctx: &mut MiddlewareContext, request: Request, handler: H) -> Response
    where
        H: FnOnce(&mut MiddlewareContext, Request) -> BoxFuture<'static, Response> + Send + 'static,
    {
        let next = self.build_chain(handler);
        next.run(ctx, request).await
    }

    fn build_chain<'a, H>(&'a self, handler: H) -> Next<'a>
    where
        H: FnOnce(&mut MiddlewareContext, Request) -> BoxFuture<'static, Response> + Send + 'a,
    {
        let mut next = Next::handler(handler);
        for middleware in self.stages.values().rev() {
            next = Next::new(middleware.as_ref(), next);
        }
        next
    }

    /// Returns whether `stage` is present.
    #[must_use]
    pub fn has_stage(&self, stage: Stage) -> bool {
        stage == Stage::Handler || self.stages.contains_key(&stage)
    }

    /// Names of the registered stages in execution order, ending with `handler`.
    #[must_use]
    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages
            .keys()
            .map(|stage| stage.name())
            .chain(std::iter::once(Stage::Handler.name()))
            .collect()
    }
}

/// Builder for [`Pipeline`].
#[derive(Default)]
pub struct PipelineBuilder {
    stages: BTreeMap<Stage, BoxedMiddleware>,
    misplaced_handler: bool,
}

impl PipelineBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `middleware` at `stage`, replacing any previous one.
    #[must_use]
    pub fn stage<M: Middleware>(self, stage: Stage, middleware: M) -> Self {
        self.shared_stage(stage, Arc::new(middleware))
    }

    /// Registers an already shared middleware at `stage`.
    #[must_use]
    pub fn shared_stage(mut self, stage: Stage, middleware: BoxedMiddleware) -> Self {
        if stage == Stage::Handler {
            self.misplaced_handler = true;
        } else {
            self.stages.insert(stage, middleware);
        }
        self
    }

    /// Validates the wiring and builds the pipeline.
    pub fn build(self) -> Result<Pipeline, PipelineError> {
        if self.misplaced_handler {
            return Err(PipelineError::HandlerNotMiddleware);
        }
        if let Some(missing) = Stage::all()
            .into_iter()
            .filter(|stage| *stage != Stage::Handler && !stage.is_optional())
            .find(|stage| !self.stages.contains_key(stage))
        {
            return Err(PipelineError::MissingStage(missing));
        }
        if self.stages.contains_key(&Stage::PrincipalRateLimit)
            && !self.stages.contains_key(&Stage::Auth)
        {
            return Err(PipelineError::PrincipalLimitWithoutAuth);
        }
        Ok(Pipeline {
            stages: self.stages,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ResponseExt;
    use bytes::Bytes;
    use http::StatusCode;
    use http_body_util::Full;
    use std::sync::Mutex;

    struct Recorder {
        name: &'static str,
        log: Arc<Mutex<Vec<&'static str>>>,
    }

    impl Middleware for Recorder {
        fn name(&self) -> &'static str {
            self.name
        }

        fn process<'a>(
            &'a self,
            ctx: &'a mut MiddlewareContext,
            request: Request,
            next: Next<'a>,
        ) -> BoxFuture<'a, Response> {
            Box::pin(async move {
                self.log.lock().unwrap().push(self.name);
                next.run(ctx, request).await
            })
        }
    }

    fn recorder(name: &'static str, log: &Arc<Mutex<Vec<&'static str>>>) -> Recorder {
        Recorder {
            name,
            log: Arc::clone(log),
        }
    }

    #[test]
    fn stage_order_is_fixed() {
        let names: Vec<_> = Stage::all().iter().map(|s| s.name()).collect();
        assert_eq!(
            names,
            [
                "method-gate",
                "ip-rate-limit",
                "auth",
                "context-enrich",
                "principal-rate-limit",
                "handler"
            ]
        );
        assert!(Stage::Auth.is_optional());
        assert!(!Stage::IpRateLimit.is_optional());
    }

    #[tokio::test]
    async fn registration_order_does_not_matter() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let pipeline = Pipeline::builder()
            .stage(Stage::PrincipalRateLimit, recorder("principal", &log))
            .stage(Stage::ContextEnrich, recorder("enrich", &log))
            .stage(Stage::Auth, recorder("auth", &log))
            .stage(Stage::IpRateLimit, recorder("ip", &log))
            .stage(Stage::MethodGate, recorder("method", &log))
            .build()
            .unwrap();

        let request = http::Request::builder()
            .uri("/")
            .body(Full::new(Bytes::new()))
            .unwrap();
        let mut ctx = MiddlewareContext::new("127.0.0.1");
        let handler_log = Arc::clone(&log);
        let response = pipeline
            .process(&mut ctx, request, move |_ctx, _req| {
                handler_log.lock().unwrap().push("handler");
                Box::pin(async { Response::json(StatusCode::OK, &serde_json::json!({})) })
            })
            .await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            *log.lock().unwrap(),
            ["method", "ip", "auth", "enrich", "principal", "handler"]
        );
        assert_eq!(pipeline.stage_names().len(), 6);
    }

    #[test]
    fn mandatory_stages_are_enforced() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let err = Pipeline::builder()
            .stage(Stage::MethodGate, recorder("method", &log))
            .stage(Stage::ContextEnrich, recorder("enrich", &log))
            .build()
            .unwrap_err();
        assert_eq!(err, PipelineError::MissingStage(Stage::IpRateLimit));
    }

    #[test]
    fn principal_limit_needs_auth() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let err = Pipeline::builder()
            .stage(Stage::MethodGate, recorder("method", &log))
            .stage(Stage::IpRateLimit, recorder("ip", &log))
            .stage(Stage::ContextEnrich, recorder("enrich", &log))
            .stage(Stage::PrincipalRateLimit, recorder("principal", &log))
            .build()
            .unwrap_err();
        assert_eq!(err, PipelineError::PrincipalLimitWithoutAuth);
    }

    #[test]
    fn handler_cannot_be_middleware() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let err = Pipeline::builder()
            .stage(Stage::Handler, recorder("handler", &log))
            .build()
            .unwrap_err();
        assert_eq!(err, PipelineError::HandlerNotMiddleware);
    }
}
