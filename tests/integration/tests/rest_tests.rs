//! REST rate limiting against a mock API
//!
//! Run with: cargo test -p integration-tests --test rest_tests

use std::time::{Duration, Instant};

use chat_rest::{RestError, RestRequest};
use integration_tests::{rest_client, MockResponse, MockRest};
use serde_json::json;

// ============================================================================
// Responses
// ============================================================================

#[tokio::test]
async fn test_success_and_auth_header() {
    let api = MockRest::start().await.unwrap();
    api.respond("/channels/1", MockResponse::ok(json!({ "id": "1", "type": 0 })));
    let rest = rest_client(&api.base_url()).unwrap();

    let channel: serde_json::Value = rest
        .request_json(RestRequest::get("/channels/1"))
        .await
        .unwrap();
    assert_eq!(channel["id"], "1");

    let requests = api.requests_to("/channels/1");
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].method, "GET");
    assert_eq!(requests[0].authorization.as_deref(), Some("Bot test-token"));
}

#[tokio::test]
async fn test_client_error_not_retried() {
    let api = MockRest::start().await.unwrap();
    api.respond(
        "/channels/1",
        MockResponse {
            status: 403,
            headers: Vec::new(),
            body: json!({ "code": 50013, "message": "Missing Permissions" }),
        },
    );
    let rest = rest_client(&api.base_url()).unwrap();

    let err = rest
        .request(RestRequest::get("/channels/1"))
        .await
        .unwrap_err();
    match err {
        RestError::Api { status, body } => {
            assert_eq!(status, 403);
            assert_eq!(body.code, 50013);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(api.requests_to("/channels/1").len(), 1);
}

// ============================================================================
// 429 handling
// ============================================================================

#[tokio::test]
async fn test_route_429_retried_after_retry_after() {
    let api = MockRest::start().await.unwrap();
    api.script(
        "/channels/1/messages",
        [
            MockResponse::rate_limited(0.5, false),
            MockResponse::ok(json!({ "id": "2" })),
        ],
    );
    let rest = rest_client(&api.base_url()).unwrap();

    let response = rest
        .request(RestRequest::post("/channels/1/messages").json(&json!({ "content": "hi" })).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status, 200);

    let requests = api.requests_to("/channels/1/messages");
    assert_eq!(requests.len(), 2);
    assert!(requests[1].at - requests[0].at >= Duration::from_millis(480));
    assert!(!rest.limiter().is_global_locked());
}

#[tokio::test]
async fn test_429_retries_exhausted() {
    let api = MockRest::start().await.unwrap();
    api.respond("/channels/1/messages", MockResponse::rate_limited(0.05, false));
    let rest = rest_client(&api.base_url()).unwrap();

    let err = rest
        .request(RestRequest::get("/channels/1/messages"))
        .await
        .unwrap_err();
    assert!(matches!(err, RestError::RateLimitExhausted { attempts: 6, .. }));
    // First attempt plus five retries
    assert_eq!(api.requests_to("/channels/1/messages").len(), 6);
}

#[tokio::test]
async fn test_global_429_holds_other_routes() {
    let api = MockRest::start().await.unwrap();
    api.script(
        "/channels/1/messages",
        [
            MockResponse::rate_limited(0.6, true),
            MockResponse::ok(json!({})),
        ],
    );
    let rest = rest_client(&api.base_url()).unwrap();

    let limited = {
        let rest = rest.clone();
        tokio::spawn(async move { rest.request(RestRequest::get("/channels/1/messages")).await })
    };

    // Let the first request hit the global limit
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(rest.limiter().is_global_locked());

    let started = Instant::now();
    rest.request(RestRequest::get("/guilds/2")).await.unwrap();
    assert!(started.elapsed() >= Duration::from_millis(300));

    limited.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_route_429_does_not_delay_other_buckets() {
    let api = MockRest::start().await.unwrap();
    api.script(
        "/channels/1/messages",
        [
            MockResponse::rate_limited(0.8, false),
            MockResponse::ok(json!({})),
        ],
    );
    let rest = rest_client(&api.base_url()).unwrap();

    let limited = {
        let rest = rest.clone();
        tokio::spawn(async move { rest.request(RestRequest::get("/channels/1/messages")).await })
    };
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(!rest.limiter().is_global_locked());

    let started = Instant::now();
    rest.request(RestRequest::get("/channels/2/messages")).await.unwrap();
    rest.request(RestRequest::get("/guilds/2")).await.unwrap();
    assert!(started.elapsed() < Duration::from_millis(400));
    assert!(!limited.is_finished());

    limited.await.unwrap().unwrap();
    let requests = api.requests_to("/channels/1/messages");
    assert_eq!(requests.len(), 2);
    assert!(requests[1].at - requests[0].at >= Duration::from_millis(780));
}

#[tokio::test]
async fn test_interactions_exempt_from_global_lock() {
    let api = MockRest::start().await.unwrap();
    api.script(
        "/channels/1/messages",
        [
            MockResponse::rate_limited(1.0, true),
            MockResponse::ok(json!({})),
        ],
    );
    let rest = rest_client(&api.base_url()).unwrap();

    let limited = {
        let rest = rest.clone();
        tokio::spawn(async move { rest.request(RestRequest::get("/channels/1/messages")).await })
    };
    tokio::time::sleep(Duration::from_millis(150)).await;

    let started = Instant::now();
    rest.request(
        RestRequest::post("/interactions/123/tok/callback")
            .json(&json!({ "type": 4 }))
            .unwrap(),
    )
    .await
    .unwrap();
    assert!(started.elapsed() < Duration::from_millis(500));

    limited.await.unwrap().unwrap();
}

// ============================================================================
// Buckets
// ============================================================================

#[tokio::test]
async fn test_exhausted_bucket_waits_for_reset() {
    let api = MockRest::start().await.unwrap();
    api.respond(
        "/channels/1/messages",
        MockResponse::ok(json!({})).bucket("abc", 1, 0, 0.5),
    );
    let rest = rest_client(&api.base_url()).unwrap();

    for _ in 0..3 {
        rest.request(RestRequest::get("/channels/1/messages"))
            .await
            .unwrap();
    }

    let requests = api.requests_to("/channels/1/messages");
    assert_eq!(requests.len(), 3);
    assert!(requests[1].at - requests[0].at >= Duration::from_millis(450));
    assert!(requests[2].at - requests[1].at >= Duration::from_millis(450));
}

#[tokio::test]
async fn test_bucket_hash_migration() {
    let api = MockRest::start().await.unwrap();
    api.script(
        "/channels/1",
        [
            MockResponse::ok(json!({})).bucket("hash-a", 5, 4, 1.0),
            MockResponse::ok(json!({})).bucket("hash-b", 5, 4, 1.0),
        ],
    );
    let rest = rest_client(&api.base_url()).unwrap();
    let key = RestRequest::get("/channels/1").bucket_key();

    rest.request(RestRequest::get("/channels/1")).await.unwrap();
    assert_eq!(rest.limiter().hash_for(&key).as_deref(), Some("hash-a"));

    rest.request(RestRequest::get("/channels/1")).await.unwrap();
    assert_eq!(rest.limiter().hash_for(&key).as_deref(), Some("hash-b"));
    assert_eq!(rest.limiter().bucket_snapshot(&key).hash.as_deref(), Some("hash-b"));
}

#[tokio::test]
async fn test_same_route_requests_keep_order() {
    let api = MockRest::start().await.unwrap();
    api.script(
        "/channels/1/messages",
        [
            MockResponse::rate_limited(0.3, false),
            MockResponse::ok(json!({ "n": 1 })),
            MockResponse::ok(json!({ "n": 2 })),
        ],
    );
    let rest = rest_client(&api.base_url()).unwrap();

    let first = {
        let rest = rest.clone();
        tokio::spawn(async move {
            rest.request_json::<serde_json::Value>(RestRequest::get("/channels/1/messages"))
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    let second = rest
        .request_json::<serde_json::Value>(RestRequest::get("/channels/1/messages"))
        .await
        .unwrap();

    // The retried first request is answered before the second is sent
    assert_eq!(first.await.unwrap().unwrap()["n"], 1);
    assert_eq!(second["n"], 2);
}

// ============================================================================
// Upstream failures
// ============================================================================

#[tokio::test]
async fn test_502_retried_once() {
    let api = MockRest::start().await.unwrap();
    api.script(
        "/gateway/bot",
        [
            MockResponse::status(502),
            MockResponse::ok(integration_tests::gateway_bot_body("wss://gateway.test", 1, 1000, 1)),
        ],
    );
    let rest = rest_client(&api.base_url()).unwrap();

    let info = rest.get_gateway_bot().await.unwrap();
    assert_eq!(info.url, "wss://gateway.test");
    assert_eq!(info.session_start_limit.max_concurrency, 1);

    let requests = api.requests_to("/gateway/bot");
    assert_eq!(requests.len(), 2);
    assert!(requests[1].at - requests[0].at >= Duration::from_millis(40));
}

#[tokio::test]
async fn test_persistent_503_fails_after_one_retry() {
    let api = MockRest::start().await.unwrap();
    api.respond("/channels/1", MockResponse::status(503));
    let rest = rest_client(&api.base_url()).unwrap();

    let err = rest
        .request(RestRequest::get("/channels/1"))
        .await
        .unwrap_err();
    assert!(matches!(err, RestError::Upstream { status: 503, attempts: 2 }));
    assert!(err.is_retryable());
    assert_eq!(api.requests_to("/channels/1").len(), 2);
}

#[tokio::test]
async fn test_gateway_lookup_is_unauthenticated() {
    let api = MockRest::start().await.unwrap();
    api.respond("/gateway", MockResponse::ok(json!({ "url": "wss://gateway.test" })));
    let rest = rest_client(&api.base_url()).unwrap();

    let info = rest.get_gateway().await.unwrap();
    assert_eq!(info.url, "wss://gateway.test");
    assert_eq!(api.requests_to("/gateway")[0].authorization, None);
}
