//! HTTP API tests against the in-memory store.
//!
//! Conversation 2 holds messages 1..=500; conversation 9223372036854775800
//! holds a single message. Conversation 4, in a separate store, holds
//! messages 0..500 so the lowest id is a stored row.

mod common;

use axum::Router;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode, header};
use common::{TestAllocator, message, unused_addr};
use http_body_util::BodyExt;
use missive_core::types::ConnectionState;
use missive_server::api::{self, AppState};
use missive_server::connection::{ConnectionSupervisor, IdAllocationClient, SupervisorConfig};
use missive_server::pagination::PaginationEngine;
use missive_server::store::{InMemoryMessageStore, MessageStore};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

const BIG_CONVERSATION: u64 = 9_223_372_036_854_775_800;

async fn seeded_store() -> Arc<InMemoryMessageStore> {
    let store = InMemoryMessageStore::new();
    let batch: Vec<_> = (1..=500).map(|id| message(id, 2)).collect();
    store.insert_messages(&batch).await.unwrap();
    store
        .insert_message(&message(1_000, BIG_CONVERSATION))
        .await
        .unwrap();
    Arc::new(store)
}

async fn app() -> Router {
    let engine = PaginationEngine::new(seeded_store().await);
    api::router(AppState::new(engine))
}

const ZERO_BASED: u64 = 4;

async fn zero_based_app() -> Router {
    let store = InMemoryMessageStore::new();
    let batch: Vec<_> = (0..500).map(|id| message(id, ZERO_BASED)).collect();
    store.insert_messages(&batch).await.unwrap();
    api::router(AppState::new(PaginationEngine::new(Arc::new(store))))
}

async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

async fn get(app: Router, uri: &str) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(Method::GET)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    send(app, request).await
}

async fn post(app: Router, uri: &str, body: Value) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    send(app, request).await
}

fn ids(body: &Value) -> Vec<u64> {
    body["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["id"].as_str().unwrap().parse().unwrap())
        .collect()
}

#[tokio::test]
async fn lists_whole_conversation_by_default() {
    let (status, body) = get(app().await, "/api/v1/conversations/2/messages").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ids(&body), (1..=500).collect::<Vec<_>>());
    assert_eq!(body["hasMore"], false);
}

#[tokio::test]
async fn first_page_with_limit() {
    let (status, body) = get(app().await, "/api/v1/conversations/2/messages?limit=200").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ids(&body), (1..=200).collect::<Vec<_>>());
    assert_eq!(body["hasMore"], true);
}

#[tokio::test]
async fn next_page_after_cursor() {
    let (status, body) = get(
        app().await,
        "/api/v1/conversations/2/messages?after=199&limit=100",
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ids(&body), (200..=299).collect::<Vec<_>>());
    assert_eq!(body["hasMore"], true);
}

#[tokio::test]
async fn last_page_has_no_more() {
    let (status, body) = get(
        app().await,
        "/api/v1/conversations/2/messages?after=400&limit=100",
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ids(&body), (401..=500).collect::<Vec<_>>());
    assert_eq!(body["hasMore"], false);
}

#[tokio::test]
async fn descending_pages() {
    let (status, body) = get(
        app().await,
        "/api/v1/conversations/2/messages?after=201&limit=100&orderBy=id:desc",
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ids(&body), (101..=200).rev().collect::<Vec<_>>());
    assert_eq!(body["hasMore"], true);

    let (status, body) = get(
        app().await,
        "/api/v1/conversations/2/messages?after=201&limit=300&orderBy=id%3Adesc",
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ids(&body), (1..=200).rev().collect::<Vec<_>>());
    assert_eq!(body["hasMore"], false);
}

#[tokio::test]
async fn descending_is_ascending_reversed() {
    let (_, asc) = get(app().await, "/api/v1/conversations/2/messages?after=250").await;
    let (_, desc) = get(
        app().await,
        "/api/v1/conversations/2/messages?orderBy=id:desc",
    )
    .await;

    let mut reversed = ids(&desc);
    reversed.reverse();
    assert_eq!(ids(&asc), (251..=500).collect::<Vec<_>>());
    assert_eq!(reversed, (1..=500).collect::<Vec<_>>());
}

#[tokio::test]
async fn zero_based_conversation_pages() {
    let (status, body) = get(zero_based_app().await, "/api/v1/conversations/4/messages").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ids(&body), (0..500).collect::<Vec<_>>());
    assert_eq!(body["hasMore"], false);

    let (_, body) = get(
        zero_based_app().await,
        "/api/v1/conversations/4/messages?limit=200",
    )
    .await;
    assert_eq!(ids(&body), (0..200).collect::<Vec<_>>());
    assert_eq!(body["hasMore"], true);

    let (_, body) = get(
        zero_based_app().await,
        "/api/v1/conversations/4/messages?after=199",
    )
    .await;
    assert_eq!(ids(&body), (200..500).collect::<Vec<_>>());
    assert_eq!(body["hasMore"], false);
}

#[tokio::test]
async fn cursor_zero_excludes_message_zero() {
    let (_, body) = get(
        zero_based_app().await,
        "/api/v1/conversations/4/messages?after=0&limit=2",
    )
    .await;
    assert_eq!(ids(&body), [1, 2]);
    assert_eq!(body["hasMore"], true);

    let (_, body) = get(
        zero_based_app().await,
        "/api/v1/conversations/4/messages?after=1&orderBy=id:desc",
    )
    .await;
    assert_eq!(ids(&body), [0]);
    assert_eq!(body["hasMore"], false);
}

#[tokio::test]
async fn big_conversation_id_keeps_precision() {
    let uri = format!("/api/v1/conversations/{BIG_CONVERSATION}/messages");
    let (status, body) = get(app().await, &uri).await;
    assert_eq!(status, StatusCode::OK);
    let data = body["data"].as_array().unwrap();
    assert_eq!(data.len(), 1);
    assert_eq!(data[0]["receiverId"], "9223372036854775800");
    assert_eq!(data[0]["id"], "1000");
    assert_eq!(data[0]["type"], "TEXT");
}

#[tokio::test]
async fn empty_conversation_is_an_empty_page() {
    let (status, body) = get(app().await, "/api/v1/conversations/77/messages?limit=10").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "data": [], "hasMore": false }));
}

#[tokio::test]
async fn malformed_input_is_rejected() {
    let cases = [
        ("/api/v1/conversations/nonnumber/messages", "conversationId"),
        ("/api/v1/conversations/-1/messages", "conversationId"),
        (
            "/api/v1/conversations/9223372036854775808/messages",
            "conversationId",
        ),
        ("/api/v1/conversations/2/messages?after=abc", "after"),
        ("/api/v1/conversations/2/messages?after=-5", "after"),
        ("/api/v1/conversations/2/messages?limit=1.5", "limit"),
        ("/api/v1/conversations/2/messages?limit=-1", "limit"),
        ("/api/v1/conversations/2/messages?limit=Infinity", "limit"),
        ("/api/v1/conversations/2/messages?orderBy=id:sideways", "orderBy"),
    ];

    for (uri, field) in cases {
        let (status, body) = get(app().await, uri).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{uri}");
        let error = body["error"].as_str().unwrap();
        assert!(error.starts_with(field), "{uri}: {error}");
    }
}

#[tokio::test]
async fn undecodable_query_string_is_a_json_error() {
    for uri in [
        "/api/v1/conversations/2/messages?limit=1&limit=2",
        "/api/v1/conversations/2/messages?after=1&after=2",
    ] {
        let response = app()
            .await
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{uri}");
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "application/json",
            "{uri}"
        );

        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        let error = body["error"].as_str().unwrap();
        assert!(error.starts_with("invalid query string"), "{uri}: {error}");
    }
}

#[tokio::test]
async fn healthcheck_is_up_without_allocators() {
    let (status, body) = get(app().await, "/healthcheck").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "status": "UP" }));
}

#[tokio::test]
async fn healthcheck_reports_allocator_state() {
    let config = SupervisorConfig::new("allocator", unused_addr().await)
        .with_deadline(Duration::from_millis(500))
        .with_max_retries(0);
    let supervisor = ConnectionSupervisor::connect(config).unwrap();
    assert_eq!(
        supervisor.wait_settled().await,
        ConnectionState::InitializeFailed
    );

    let engine = PaginationEngine::new(seeded_store().await);
    let state = AppState::new(engine).with_allocator(IdAllocationClient::new(supervisor));
    let (status, body) = get(api::router(state), "/healthcheck").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "status": "DOWN" }));
}

#[tokio::test]
async fn post_is_not_routed_without_allocator() {
    let (status, _) = post(
        app().await,
        "/api/v1/conversations/2/messages",
        json!({ "senderId": "1", "content": "hi", "type": "TEXT" }),
    )
    .await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn post_creates_message_with_allocated_id() {
    let allocator = TestAllocator::snowflake(11).await;
    let config = SupervisorConfig::new("allocator", allocator.endpoint());
    let supervisor = ConnectionSupervisor::connect(config).unwrap();
    assert_eq!(supervisor.wait_settled().await, ConnectionState::Initialized);

    let store = seeded_store().await;
    let engine = PaginationEngine::new(store.clone());
    let state = AppState::new(engine).with_allocator(IdAllocationClient::new(supervisor));
    let app = api::router(state);

    let (status, created) = post(
        app.clone(),
        "/api/v1/conversations/77/messages",
        json!({ "senderId": 5, "content": "hello", "type": "STICKER" }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["receiverId"], "77");
    assert_eq!(created["senderId"], "5");
    assert_eq!(created["type"], "STICKER");

    let (_, page) = get(app.clone(), "/api/v1/conversations/77/messages").await;
    assert_eq!(page["data"][0]["id"], created["id"]);

    let (status, health) = get(app, "/healthcheck").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(health, json!({ "status": "UP" }));
}

#[tokio::test]
async fn post_rejects_bad_body() {
    let allocator = TestAllocator::snowflake(12).await;
    let supervisor =
        ConnectionSupervisor::connect(SupervisorConfig::new("allocator", allocator.endpoint()))
            .unwrap();
    supervisor.wait_settled().await;

    let engine = PaginationEngine::new(seeded_store().await);
    let app = api::router(AppState::new(engine).with_allocator(IdAllocationClient::new(supervisor)));

    let (status, body) = post(
        app,
        "/api/v1/conversations/2/messages",
        json!({ "senderId": "1", "content": "hi", "type": "SMS" }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn post_while_allocator_down_is_unavailable() {
    let config = SupervisorConfig::new("allocator", unused_addr().await)
        .with_deadline(Duration::from_millis(500))
        .with_max_retries(0);
    let supervisor = ConnectionSupervisor::connect(config).unwrap();
    supervisor.wait_settled().await;

    let store = seeded_store().await;
    let before = store.len();
    let engine = PaginationEngine::new(store.clone());
    let app = api::router(AppState::new(engine).with_allocator(IdAllocationClient::new(supervisor)));

    let (status, body) = post(
        app,
        "/api/v1/conversations/2/messages",
        json!({ "senderId": "1", "content": "hi", "type": "TEXT" }),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body, json!({ "error": "id allocator unavailable" }));
    assert_eq!(store.len(), before);
}
