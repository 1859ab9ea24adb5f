// tests/api_http.rs
//
// HTTP-level tests for the control Router without opening sockets.
// We exercise the router directly via tower::ServiceExt::oneshot.
//
// Covered:
// - GET /health
// - GET /status
// - POST /kick, /alarm/on, /alarm/off (202, 503 once the worker is gone)
// - GET /metrics

use axum::{
    body::{self, Body},
    Router,
};
use http::{Request, StatusCode};
use chrono::Utc;
use serde_json::Value as Json;
use tokio::sync::{mpsc, watch};
use tower::ServiceExt as _; // for `oneshot`

use geohash_alarm::api::{self, ApiState};
use geohash_alarm::metrics::Metrics;
use geohash_alarm::state::CoordinatorSnapshot;
use geohash_alarm::{CycleState, Event, StartCause, Trigger};

const BODY_LIMIT: usize = 1024 * 1024;

fn snapshot(state: CycleState) -> CoordinatorSnapshot {
    let mut s = CoordinatorSnapshot::idle(Utc::now());
    s.state = state;
    s.next_request_id = 3;
    s
}

async fn body_string(resp: axum::response::Response) -> String {
    let bytes = body::to_bytes(resp.into_body(), BODY_LIMIT)
        .await
        .expect("read body")
        .to_vec();
    String::from_utf8(bytes).expect("utf8")
}

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .expect("build GET")
}

fn post(uri: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .body(Body::empty())
        .expect("build POST")
}

#[tokio::test]
async fn health_returns_ok() {
    let (_status_tx, status_rx) = watch::channel(snapshot(CycleState::Idle));
    let (tx, _rx) = mpsc::unbounded_channel();
    let app: Router = api::router(ApiState::new(status_rx, tx));

    let resp = app.oneshot(get("/health")).await.expect("oneshot /health");
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_string(resp).await, "ok");
}

#[tokio::test]
async fn status_reflects_latest_snapshot() {
    let (status_tx, status_rx) = watch::channel(snapshot(CycleState::Idle));
    let (tx, _rx) = mpsc::unbounded_channel();
    let app = api::router(ApiState::new(status_rx, tx));

    status_tx.send_replace(snapshot(CycleState::Snoozed));
    let resp = app.oneshot(get("/status")).await.expect("oneshot /status");
    assert_eq!(resp.status(), StatusCode::OK);

    let v: Json = serde_json::from_str(&body_string(resp).await).expect("json body");
    assert_eq!(v["state"], "snoozed");
    assert_eq!(v["next_request_id"], 3);
    assert!(v["outstanding"].is_null());
    assert_eq!(v["connectivity_wait"], false);
}

#[tokio::test]
async fn commands_are_queued_for_the_worker() {
    let (_status_tx, status_rx) = watch::channel(snapshot(CycleState::Idle));
    let (tx, mut rx) = mpsc::unbounded_channel();
    let app = api::router(ApiState::new(status_rx, tx));

    for uri in ["/kick", "/alarm/on", "/alarm/off"] {
        let resp = app.clone().oneshot(post(uri)).await.expect("oneshot");
        assert_eq!(resp.status(), StatusCode::ACCEPTED, "{uri}");
    }

    assert_eq!(
        rx.recv().await,
        Some(Event::Trigger(Trigger::Start(StartCause::Manual)))
    );
    assert_eq!(rx.recv().await, Some(Event::AlarmOn));
    assert_eq!(rx.recv().await, Some(Event::AlarmOff));
}

#[tokio::test]
async fn kick_is_unavailable_once_the_worker_is_gone() {
    let (_status_tx, status_rx) = watch::channel(snapshot(CycleState::Idle));
    let (tx, rx) = mpsc::unbounded_channel::<Event>();
    drop(rx);
    let app = api::router(ApiState::new(status_rx, tx));

    let resp = app.oneshot(post("/kick")).await.expect("oneshot /kick");
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn kick_rejects_get() {
    let (_status_tx, status_rx) = watch::channel(snapshot(CycleState::Idle));
    let (tx, _rx) = mpsc::unbounded_channel();
    let app = api::router(ApiState::new(status_rx, tx));

    let resp = app.oneshot(get("/kick")).await.expect("oneshot GET /kick");
    assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn metrics_endpoint_serves_text() {
    let metrics = Metrics::detached();
    let resp = metrics
        .router()
        .oneshot(get("/metrics"))
        .await
        .expect("oneshot /metrics");
    assert_eq!(resp.status(), StatusCode::OK);
    // a detached recorder has recorded nothing
    assert!(body_string(resp).await.trim().is_empty());
}
