//! End-to-end tests through the assembled gateway router.

use agora_config::{AgoraConfig, BucketConfig};
use agora_core::{SystemClock, UserId};
use agora_server::{Gateway, Ports};
use agora_store::{AudienceTag, NewPost};
use agora_test::{FakeMedia, FakeSocialGraph, FakeUserDirectory, TestClient, TestRequest};
use chrono::{Duration, Utc};
use http::StatusCode;
use serde_json::json;
use std::sync::Arc;

const ANN: UserId = 1;
const BOB: UserId = 2;

async fn gateway_with(config: &AgoraConfig, graph: FakeSocialGraph) -> Gateway {
    let ports = Ports::new(
        Arc::new(graph),
        Arc::new(FakeUserDirectory::new().with_user(ANN, "ann").with_user(BOB, "bob")),
        Arc::new(FakeMedia::new()),
    );
    Gateway::new(config, ports, Arc::new(SystemClock)).await.unwrap()
}

async fn gateway() -> Gateway {
    gateway_with(&AgoraConfig::development(), FakeSocialGraph::new()).await
}

fn client(gateway: &Gateway) -> TestClient {
    let router = gateway.router();
    TestClient::new(move |req, peer| {
        let router = Arc::clone(&router);
        async move { router.dispatch(req, peer).await }
    })
}

fn token(gateway: &Gateway, user: UserId) -> String {
    gateway.verifier().sign(user, Utc::now(), Duration::hours(1)).unwrap()
}

async fn create_post(client: &TestClient, token: &str, body: serde_json::Value) -> i64 {
    let response = client
        .send(TestRequest::post("/post/create").bearer_token(token).json(&body))
        .await
        .unwrap();
    response.assert_status(StatusCode::CREATED);
    response.json_value().unwrap()["id"].as_i64().unwrap()
}

#[tokio::test]
async fn business_routes_require_a_credential() {
    let gateway = gateway().await;
    let response = client(&gateway)
        .send(TestRequest::get("/notifications"))
        .await
        .unwrap();
    response.assert_status(StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn wrong_method_is_rejected_before_auth() {
    let gateway = gateway().await;
    let response = client(&gateway)
        .send(TestRequest::get("/post/create"))
        .await
        .unwrap();
    response.assert_status(StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(response.header_str("allow"), Some("POST"));
}

#[tokio::test]
async fn created_post_reads_back_hydrated() {
    let gateway = gateway().await;
    let client = client(&gateway);
    let ann = token(&gateway, ANN);
    let id = create_post(&client, &ann, json!({ "body": "hello agora" })).await;

    let response = client
        .send(TestRequest::get(format!("/post/read?id={id}")).cookie("jwt", &ann))
        .await
        .unwrap();
    response.assert_status(StatusCode::OK);
    let post = response.json_value().unwrap();
    assert_eq!(post["body"], "hello agora");
    assert_eq!(post["audience"], "public");
    assert_eq!(post["creator"]["username"], "ann");
}

#[tokio::test]
async fn followers_post_is_hidden_from_strangers() {
    let gateway = gateway().await;
    let client = client(&gateway);
    let ann = token(&gateway, ANN);
    let id = create_post(&client, &ann, json!({ "body": "friends only", "audience": "followers" })).await;

    let response = client
        .send(TestRequest::get(format!("/post/read?id={id}")).bearer_token(token(&gateway, BOB)))
        .await
        .unwrap();
    response.assert_status(StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn followers_post_is_visible_to_followers() {
    let gateway = gateway_with(
        &AgoraConfig::development(),
        FakeSocialGraph::new().with_follow(BOB, ANN),
    )
    .await;
    let client = client(&gateway);
    let id = create_post(
        &client,
        &token(&gateway, ANN),
        json!({ "body": "friends only", "audience": "followers" }),
    )
    .await;

    client
        .send(TestRequest::get(format!("/post/read?id={id}")).bearer_token(token(&gateway, BOB)))
        .await
        .unwrap()
        .assert_status(StatusCode::OK);
}

#[tokio::test]
async fn percent_encoded_id_reads_the_post() {
    let gateway = gateway().await;
    let client = client(&gateway);
    let ann = token(&gateway, ANN);
    gateway
        .state()
        .db
        .run_tx(|tx| {
            Box::pin(async move {
                tx.insert_post(NewPost {
                    id: Some(42),
                    creator_id: ANN,
                    group_id: 0,
                    audience: AudienceTag::Public,
                    body: "forty-two".into(),
                    image_id: None,
                    created_at: Utc::now(),
                })
                .await
            })
        })
        .await
        .unwrap();

    let response = client
        .send(TestRequest::get("/post/read?id=%34%32").bearer_token(&ann))
        .await
        .unwrap();
    response.assert_status(StatusCode::OK);
    let post = response.json_value().unwrap();
    assert_eq!(post["id"], 42);
    assert_eq!(post["body"], "forty-two");
}

#[tokio::test]
async fn out_of_range_limit_is_bad_request() {
    let gateway = gateway().await;
    let client = client(&gateway);
    let ann = token(&gateway, ANN);
    for uri in ["/notifications?limit=0", "/notifications?limit=101", "/notifications?limit=1000000"] {
        client
            .send(TestRequest::get(uri).bearer_token(&ann))
            .await
            .unwrap()
            .assert_status(StatusCode::BAD_REQUEST);
    }
    client
        .send(TestRequest::get("/notifications?limit=100").bearer_token(&ann))
        .await
        .unwrap()
        .assert_status(StatusCode::OK);
}

#[tokio::test]
async fn repeated_audience_ids_are_bad_request() {
    let gateway = gateway().await;
    let response = client(&gateway)
        .send(
            TestRequest::post("/post/create")
                .bearer_token(token(&gateway, ANN))
                .json(&json!({ "body": "just us", "audience": "selected", "audience_ids": [2, 2] })),
        )
        .await
        .unwrap();
    response.assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn missing_post_is_not_found() {
    let gateway = gateway().await;
    client(&gateway)
        .send(TestRequest::get("/post/read?id=404").bearer_token(token(&gateway, ANN)))
        .await
        .unwrap()
        .assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn invalid_post_body_is_bad_request() {
    let gateway = gateway().await;
    client(&gateway)
        .send(
            TestRequest::post("/post/create")
                .bearer_token(token(&gateway, ANN))
                .json(&json!({ "body": "  ", "audience": "public" })),
        )
        .await
        .unwrap()
        .assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn like_reaches_the_owner_inbox() {
    let gateway = gateway().await;
    let client = client(&gateway);
    let ann = token(&gateway, ANN);
    let bob = token(&gateway, BOB);
    let id = create_post(&client, &ann, json!({ "body": "like me" })).await;

    let response = client
        .send(TestRequest::post("/post/react").bearer_token(&bob).json(&json!({ "post_id": id })))
        .await
        .unwrap();
    response.assert_status(StatusCode::OK);
    let reacted = response.json_value().unwrap();
    assert_eq!(reacted["liked"], true);
    assert_eq!(reacted["reactions"], 1);

    assert_eq!(
        gateway.state().db.connection().await.unwrap().event_backlog().await.unwrap(),
        1
    );
    let report = gateway.consumer().run_once().await.unwrap();
    assert_eq!(report.handled, 1);
    assert_eq!(gateway.consumer().backlog(), 0);

    let response = client
        .send(TestRequest::get("/notifications").bearer_token(&ann))
        .await
        .unwrap();
    response.assert_status(StatusCode::OK);
    let page = response.json_value().unwrap();
    let notifications = page["notifications"].as_array().unwrap();
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0]["kind"], "post_liked");
    assert_eq!(notifications[0]["seen"], false);
    assert_eq!(notifications[0]["actor"]["username"], "bob");

    let nid = notifications[0]["id"].as_i64().unwrap();
    let response = client
        .send(TestRequest::post("/notifications/seen").bearer_token(&ann).json(&json!({ "ids": [nid] })))
        .await
        .unwrap();
    response.assert_status(StatusCode::OK);
    assert_eq!(response.json_value().unwrap()["updated"], 1);

    let page = client
        .send(TestRequest::get("/notifications").bearer_token(&ann))
        .await
        .unwrap()
        .json_value()
        .unwrap();
    assert_eq!(page["notifications"][0]["seen"], true);
}

#[tokio::test]
async fn unlike_publishes_nothing() {
    let gateway = gateway().await;
    let client = client(&gateway);
    let bob = token(&gateway, BOB);
    let id = create_post(&client, &token(&gateway, ANN), json!({ "body": "toggle" })).await;

    for expected in [true, false] {
        let response = client
            .send(TestRequest::post("/post/react").bearer_token(&bob).json(&json!({ "post_id": id })))
            .await
            .unwrap();
        assert_eq!(response.json_value().unwrap()["liked"], expected);
    }

    let report = gateway.consumer().run_once().await.unwrap();
    assert_eq!(report.polled, 1);
}

#[tokio::test]
async fn empty_seen_list_is_bad_request() {
    let gateway = gateway().await;
    client(&gateway)
        .send(
            TestRequest::post("/notifications/seen")
                .bearer_token(token(&gateway, ANN))
                .json(&json!({ "ids": [] })),
        )
        .await
        .unwrap()
        .assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn probes_answer_without_credentials() {
    let gateway = gateway().await;
    let client = client(&gateway);

    let health = client.send(TestRequest::get("/health")).await.unwrap();
    health.assert_status(StatusCode::OK);
    assert_eq!(health.json_value().unwrap()["service"], "agora-gateway");

    let ready = client.send(TestRequest::get("/ready")).await.unwrap();
    ready.assert_status(StatusCode::OK);
    assert_eq!(ready.json_value().unwrap()["checks"]["event_backlog"], true);

    client
        .send(TestRequest::get("/nowhere"))
        .await
        .unwrap()
        .assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn drained_ip_bucket_is_throttled() {
    let mut config = AgoraConfig::development();
    config.rate_limit.ip_default = BucketConfig {
        capacity: 2,
        refill_per_second: 0.01,
    };
    let gateway = gateway_with(&config, FakeSocialGraph::new()).await;
    let client = client(&gateway);
    let ann = token(&gateway, ANN);

    for _ in 0..2 {
        client
            .send(TestRequest::get("/notifications").bearer_token(&ann).peer([10, 0, 0, 7]))
            .await
            .unwrap()
            .assert_status(StatusCode::OK);
    }
    let throttled = client
        .send(TestRequest::get("/notifications").bearer_token(&ann).peer([10, 0, 0, 7]))
        .await
        .unwrap();
    throttled.assert_status(StatusCode::TOO_MANY_REQUESTS);
    assert!(throttled.header_str("retry-after").is_some());

    client
        .send(TestRequest::get("/notifications").bearer_token(&ann).peer([10, 0, 0, 8]))
        .await
        .unwrap()
        .assert_status(StatusCode::OK);
}

#[tokio::test]
async fn invalid_config_is_rejected() {
    let mut config = AgoraConfig::development();
    config.auth.secret = "short".to_string();
    let ports = Ports::new(
        Arc::new(FakeSocialGraph::new()),
        Arc::new(FakeUserDirectory::new()),
        Arc::new(FakeMedia::new()),
    );
    assert!(Gateway::new(&config, ports, Arc::new(SystemClock)).await.is_err());
}
