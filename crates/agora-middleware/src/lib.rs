//! # Agora Middleware
//!
//! The gateway's admission chain.
//!
//! - [`limiter`] - token-bucket rate limiting keyed by client IP or user
//! - [`claims`] - HS256 JWT signing and verification
//! - [`Pipeline`] / [`Stage`] - the fixed-order stage chain
//! - [`stages`] - method gate, rate limit, auth, and context enrichment stages
//! - [`GatewayStack`] / [`RouteSpec`] / [`RouteHandler`] - route assembly
//!
//! ## Order
//!
//! ```text
//! method-gate -> ip-rate-limit -> auth -> context-enrich -> principal-rate-limit -> handler
//! ```
//!
//! A request with a disallowed method gets 405 whatever else is wrong with it;
//! a request without a credential gets 401 before its user's bucket is touched.

#![doc(html_root_url = "https://docs.rs/agora-middleware/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod claims;
pub mod context;
pub mod limiter;
pub mod middleware;
pub mod pipeline;
pub mod route;
pub mod stages;
pub mod types;

pub use claims::{extract_credential, AuthFailure, CredentialError, TokenVerifier};
pub use context::MiddlewareContext;
pub use limiter::{
    BucketSpec, Decision, InMemoryRateLimiter, LimitScope, LimiterError, RateLimitKey, RateLimiter,
};
pub use middleware::{BoxFuture, Middleware, Next};
pub use pipeline::{Pipeline, PipelineBuilder, PipelineError, Stage};
pub use route::{client_ip, handler, GatewaySettings, GatewayStack, HandlerFn, RouteHandler, RouteSpec};
pub use stages::FailMode;
pub use types::{retry_after_secs, Request, Response, ResponseExt, MAX_RETRY_AFTER_SECS};
