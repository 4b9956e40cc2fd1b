//! Method gate.

use crate::context::MiddlewareContext;
use crate::middleware::{BoxFuture, Middleware, Next};
use crate::types::{Request, Response, ResponseExt};
use http::header::{HeaderValue, ALLOW};
use http::{Method, StatusCode};

/// Rejects requests whose method the route does not accept.
#[derive(Debug, Clone)]
pub struct MethodGate {
    allowed: Vec<Method>,
    allow_header: Option<HeaderValue>,
}

impl MethodGate {
    /// Creates a gate accepting `allowed`.
    #[must_use]
    pub fn new(allowed: impl IntoIterator<Item = Method>) -> Self {
        let allowed: Vec<Method> = allowed.into_iter().collect();
        let joined = allowed
            .iter()
            .map(Method::as_str)
            .collect::<Vec<_>>()
            .join(", ");
        Self {
            allow_header: HeaderValue::from_str(&joined).ok(),
            allowed,
        }
    }

    /// Returns the accepted methods.
    #[must_use]
    pub fn allowed(&self) -> &[Method] {
        &self.allowed
    }

    fn reject(&self) -> Response {
        let mut response = Response::json(
            StatusCode::METHOD_NOT_ALLOWED,
            &serde_json::json!({ "error": "method not allowed" }),
        );
        if let Some(allow) = &self.allow_header {
            response.headers_mut().insert(ALLOW, allow.clone());
        }
        response
    }
}

impl Middleware for MethodGate {
    fn name(&self) -> &'static str {
        "method-gate"
    }

    fn process<'a>(
        &'a self,
        ctx: &'a mut MiddlewareContext,
        request: Request,
        next: Next<'a>,
    ) -> BoxFuture<'a, Response> {
        Box::pin(async move {
            if self.allowed.contains(request.method()) {
                next.run(ctx, request).await
            } else {
                tracing::debug!(method = %request.method(), "method not allowed");
                self.reject()
            }
        })
    }
}
