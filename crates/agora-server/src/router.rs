//! Path routing.
//!
//! Routes match on the exact path; the method check belongs to each route's
//! pipeline so that a known path with the wrong method answers 405, not 404.
//! `/health`, `/ready` and `/metrics` are answered before any route and
//! bypass the gateway stages.

use crate::health::{HealthCheck, ReadinessCheck};
use agora_core::AgoraError;
use agora_middleware::{Request, Response, ResponseExt, RouteHandler};
use bytes::Bytes;
use http::header::{HeaderValue, CONTENT_TYPE};
use http::Method;
use http_body_util::Full;
use std::collections::HashMap;
use std::net::IpAddr;

/// Path of the liveness probe.
pub const HEALTH_PATH: &str = "/health";
/// Path of the readiness probe.
pub const READY_PATH: &str = "/ready";
/// Path of the Prometheus scrape endpoint.
pub const METRICS_PATH: &str = "/metrics";

/// Maps request paths to route handlers.
#[derive(Debug)]
pub struct Router {
    routes: HashMap<String, RouteHandler>,
    health: HealthCheck,
    readiness: ReadinessCheck,
}

impl Router {
    /// Creates a router with only the probes.
    #[must_use]
    pub fn new(health: HealthCheck, readiness: ReadinessCheck) -> Self {
        Self {
            routes: HashMap::new(),
            health,
            readiness,
        }
    }

    /// Registers a route under its pattern, replacing any previous one.
    pub fn add(&mut self, route: RouteHandler) {
        let path = normalize(route.pattern()).to_string();
        if self.routes.insert(path.clone(), route).is_some() {
            tracing::warn!(path = %path, "route registered twice, keeping the latest");
        }
    }

    /// Registers several routes.
    #[must_use]
    pub fn with_routes(mut self, routes: impl IntoIterator<Item = RouteHandler>) -> Self {
        for route in routes {
            self.add(route);
        }
        self
    }

    /// Returns the route for `path`, if any.
    #[must_use]
    pub fn route(&self, path: &str) -> Option<&RouteHandler> {
        self.routes.get(normalize(path))
    }

    /// Registered paths, sorted.
    #[must_use]
    pub fn paths(&self) -> Vec<&str> {
        let mut paths: Vec<&str> = self.routes.keys().map(String::as_str).collect();
        paths.sort_unstable();
        paths
    }

    /// Returns the readiness probe.
    #[must_use]
    pub const fn readiness(&self) -> &ReadinessCheck {
        &self.readiness
    }

    /// Serves one request.
    pub async fn dispatch(&self, request: Request, peer: Option<IpAddr>) -> Response {
        let path = normalize(request.uri().path());
        if *request.method() == Method::GET {
            match path {
                HEALTH_PATH => return self.health.response(),
                READY_PATH => return self.readiness.response(),
                METRICS_PATH => return metrics_response(),
                _ => {}
            }
        }
        match self.routes.get(path) {
            Some(route) => route.call(request, peer).await,
            None => {
                tracing::debug!(method = %request.method(), path, "no route");
                Response::from_error(&AgoraError::not_found("not found"))
            }
        }
    }
}

fn metrics_response() -> Response {
    let Some(text) = agora_telemetry::render_metrics() else {
        return Response::from_error(&AgoraError::not_found("metrics disabled"));
    };
    let mut response = http::Response::new(Full::new(Bytes::from(text)));
    response.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; version=0.0.4"),
    );
    response
}

/// Drops a trailing slash, except on the root.
fn normalize(path: &str) -> &str {
    if path.len() > 1 {
        path.strip_suffix('/').unwrap_or(path)
    } else {
        path
    }
}
