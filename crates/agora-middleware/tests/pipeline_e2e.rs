//! End-to-end tests of assembled routes.
//!
//! Each test builds a [`GatewayStack`] over an in-memory limiter and drives
//! requests through a [`RouteHandler`] exactly as the server does.

use agora_core::{AgoraError, Clock, ManualClock};
use agora_middleware::{
    handler, BucketSpec, GatewaySettings, GatewayStack, InMemoryRateLimiter, PipelineError,
    Request, Response, ResponseExt, RouteHandler, RouteSpec, TokenVerifier,
};
use bytes::Bytes;
use chrono::{Duration, Utc};
use http::{Method, StatusCode};
use http_body_util::{BodyExt, Full};
use std::net::IpAddr;
use std::sync::Arc;

const SECRET: &[u8] = b"pipeline-e2e-secret-0123456789";

fn stack() -> (GatewayStack, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let verifier = TokenVerifier::new(SECRET, std::time::Duration::ZERO).unwrap();
    let stack = GatewayStack::new(
        Arc::new(InMemoryRateLimiter::new()),
        verifier,
        clock.clone(),
        GatewaySettings::default(),
    );
    (stack, clock)
}

/// The `/post/read` route: auth required, IP {20, 5/s}, principal {40, 20/s}.
fn read_route(stack: &GatewayStack) -> RouteHandler {
    let route = RouteSpec::new(
        "/post/read",
        handler(|ctx, _req| async move {
            let user = ctx.require_principal()?.user_id();
            Ok::<_, AgoraError>(Response::json(
                StatusCode::OK,
                &serde_json::json!({ "viewer": user }),
            ))
        }),
    )
    .methods([Method::GET])
    .require_auth()
    .ip_limit(BucketSpec::new(20, 5.0))
    .principal_limit(BucketSpec::new(40, 20.0));
    stack.build(route).unwrap()
}

fn request(method: Method, token: Option<&str>) -> Request {
    let mut builder = http::Request::builder().method(method).uri("/post/read?id=42");
    if let Some(token) = token {
        builder = builder.header("cookie", format!("jwt={token}"));
    }
    builder.body(Full::new(Bytes::new())).unwrap()
}

fn ip(addr: &str) -> Option<IpAddr> {
    Some(addr.parse().unwrap())
}

async fn body_json(response: Response) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test(start_paused = true)]
async fn anonymous_burst_gets_401_until_ip_bucket_empties() {
    let (stack, _) = stack();
    let read = read_route(&stack);

    for i in 0..20 {
        let response = read.call(request(Method::GET, None), ip("203.0.113.1")).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "request {i}");
    }
    let response = read.call(request(Method::GET, None), ip("203.0.113.1")).await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(response.headers().contains_key("retry-after"));

    let other = read.call(request(Method::GET, None), ip("203.0.113.2")).await;
    assert_eq!(other.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test(start_paused = true)]
async fn bad_method_is_405_regardless_of_other_failures() {
    let (stack, _) = stack();
    let read = read_route(&stack);
    for _ in 0..25 {
        read.call(request(Method::GET, None), ip("198.51.100.9")).await;
    }

    let response = read.call(request(Method::DELETE, None), ip("198.51.100.9")).await;
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(response.headers().get("allow").unwrap(), "GET");
}

#[tokio::test(start_paused = true)]
async fn missing_credential_is_401_even_when_principal_limit_would_deny() {
    let (stack, clock) = stack();
    let read = read_route(&stack);
    let token = stack.verifier().sign(7, clock.now(), Duration::hours(1)).unwrap();

    let mut admitted = 0;
    for n in 0..41 {
        let response = read
            .call(request(Method::GET, Some(&token)), ip(&format!("10.0.{}.{}", n / 200, n % 200)))
            .await;
        if response.status() == StatusCode::OK {
            admitted += 1;
        } else {
            assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        }
    }
    assert_eq!(admitted, 40);

    let response = read.call(request(Method::GET, None), ip("10.9.9.9")).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn authenticated_request_reaches_handler_with_principal() {
    let (stack, clock) = stack();
    let read = read_route(&stack);
    let token = stack.verifier().sign(11, clock.now(), Duration::hours(1)).unwrap();

    let mut request = request(Method::GET, Some(&token));
    request
        .headers_mut()
        .insert("x-trace-id", "trace-from-edge".parse().unwrap());
    let response = read.call(request, ip("192.0.2.1")).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers().get("x-trace-id").unwrap(), "trace-from-edge");
    assert!(response.headers().contains_key("x-request-id"));
    assert_eq!(body_json(response).await["viewer"], 11);
}

#[tokio::test]
async fn rejections_still_carry_request_id() {
    let (stack, _) = stack();
    let read = read_route(&stack);
    let response = read.call(request(Method::GET, None), ip("192.0.2.1")).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(response.headers().contains_key("x-request-id"));
    assert_eq!(body_json(response).await["error"], "unauthorized");
}

#[tokio::test]
async fn expired_credential_is_401() {
    let (stack, clock) = stack();
    let read = read_route(&stack);
    let token = stack.verifier().sign(11, clock.now(), Duration::minutes(1)).unwrap();
    clock.advance(Duration::minutes(2));
    let response = read.call(request(Method::GET, Some(&token)), ip("192.0.2.1")).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn handler_errors_use_the_error_body() {
    let (stack, _) = stack();
    let missing = stack
        .build(RouteSpec::new(
            "/post/missing",
            handler(|_ctx, _req| async { Err::<Response, _>(AgoraError::not_found("post not found")) }),
        ))
        .unwrap();
    let response = missing.call(request(Method::GET, None), ip("192.0.2.1")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await["error"], "post not found");
}

#[tokio::test]
async fn public_route_runs_without_auth_stages() {
    let (stack, _) = stack();
    let open = stack
        .build(RouteSpec::new(
            "/open",
            handler(|ctx, _req| async move {
                assert!(ctx.caller().is_anonymous());
                Ok::<_, AgoraError>(Response::json(StatusCode::OK, &serde_json::json!({})))
            }),
        ))
        .unwrap();
    assert_eq!(
        open.stage_names(),
        ["method-gate", "ip-rate-limit", "context-enrich", "handler"]
    );
    let response = open.call(request(Method::GET, None), ip("192.0.2.1")).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[test]
fn principal_limit_without_auth_is_rejected_at_build() {
    let (stack, _) = stack();
    let err = stack
        .build(
            RouteSpec::new(
                "/bad",
                handler(|_ctx, _req| async { Err::<Response, _>(AgoraError::internal("unreachable")) }),
            )
            .principal_limit(BucketSpec::new(1, 1.0)),
        )
        .unwrap_err();
    assert_eq!(err, PipelineError::PrincipalLimitWithoutAuth);
}
