//! Context enrichment stage.

use crate::context::MiddlewareContext;
use crate::middleware::{BoxFuture, Middleware, Next};
use crate::types::{Request, Response};
use agora_core::{RequestContext, TraceId};
use http::header::{HeaderName, HeaderValue};
use std::time::Duration;
use tracing::Instrument;

/// Freezes the chain's state into a [`RequestContext`] and opens the request span.
///
/// The trace ID is taken from the configured header when present and well
/// formed, otherwise minted. Both IDs are echoed on the response.
#[derive(Debug, Clone)]
pub struct ContextEnrichStage {
    trace_header: HeaderName,
    request_header: HeaderName,
    timeout: Option<Duration>,
}

impl ContextEnrichStage {
    /// Creates the stage.
    #[must_use]
    pub const fn new(trace_header: HeaderName, request_header: HeaderName, timeout: Option<Duration>) -> Self {
        Self {
            trace_header,
            request_header,
            timeout,
        }
    }

    fn build_context(&self, ctx: &MiddlewareContext, request: &Request) -> RequestContext {
        let trace_id = request
            .headers()
            .get(&self.trace_header)
            .and_then(|value| value.to_str().ok())
            .and_then(TraceId::parse)
            .unwrap_or_else(TraceId::generate);

        let builder = RequestContext::builder()
            .trace_id(trace_id)
            .request_id(ctx.request_id())
            .client_ip(ctx.client_ip())
            .caller(ctx.caller())
            .started_at(ctx.started_at());
        match self.timeout {
            Some(timeout) => builder.timeout(timeout).build(),
            None => builder.build(),
        }
    }
}

impl Middleware for ContextEnrichStage {
    fn name(&self) -> &'static str {
        "context-enrich"
    }

    fn process<'a>(
        &'a self,
        ctx: &'a mut MiddlewareContext,
        request: Request,
        next: Next<'a>,
    ) -> BoxFuture<'a, Response> {
        Box::pin(async move {
            let context = self.build_context(ctx, &request);
            let span = tracing::info_span!(
                "request",
                trace_id = %context.trace_id(),
                request_id = %context.request_id(),
                user_id = context.caller().user_id(),
            );
            let trace = HeaderValue::from_str(context.trace_id().as_str()).ok();
            let request_id = HeaderValue::from_str(&context.request_id().to_string()).ok();
            ctx.set_request_context(context);

            let mut response = next.run(ctx, request).instrument(span).await;
            let headers = response.headers_mut();
            if let Some(trace) = trace {
                headers.insert(self.trace_header.clone(), trace);
            }
            if let Some(request_id) = request_id {
                headers.insert(self.request_header.clone(), request_id);
            }
            response
        })
    }
}
