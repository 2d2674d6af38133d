//! Integration tests for the HTTP and `WebSocket` endpoints.
//!
//! REST tests drive the Axum `Router` directly via `tower::ServiceExt`
//! without starting a TCP server. The viewer-channel tests bind an
//! ephemeral port and connect with `tokio-tungstenite`.

#![allow(clippy::unwrap_used, clippy::indexing_slicing, clippy::panic)]

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use futures::StreamExt;
use garden_core::{
    spawn_persistence, GardenRecord, GardenRepository, GardenStateStore, MemoryRepository,
    RetryPolicy, StorageError, StoreWrite, SyncHub,
};
use garden_observer::router::build_router;
use garden_types::{ColorReading, GardenId};
use garden_observer::state::AppState;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tower::ServiceExt;

const SQUARE: [(f64, f64); 4] = [
    (14.4755, 100.1180),
    (14.4755, 100.1190),
    (14.4765, 100.1190),
    (14.4765, 100.1180),
];

fn make_test_state() -> Arc<AppState> {
    let (handle, _worker) = spawn_persistence(MemoryRepository::new(), RetryPolicy::default());
    let store = GardenStateStore::new(handle);
    Arc::new(AppState::from_parts(store, Arc::new(SyncHub::new(64))))
}

/// A backend whose database is unreachable.
struct DownRepository;

impl GardenRepository for DownRepository {
    async fn load_gardens(&self) -> Result<Vec<GardenRecord>, StorageError> {
        Err(StorageError::new("connection refused"))
    }

    async fn apply(&self, _write: &StoreWrite) -> Result<(), StorageError> {
        Err(StorageError::new("connection refused"))
    }

    async fn readings(&self, _garden_id: &GardenId) -> Result<Vec<ColorReading>, StorageError> {
        Err(StorageError::new("connection refused"))
    }
}

fn make_outage_state() -> Arc<AppState> {
    let policy = RetryPolicy {
        max_attempts: 0,
        initial_backoff: Duration::from_millis(10),
        max_backoff: Duration::from_millis(50),
    };
    let (handle, _worker) = spawn_persistence(DownRepository, policy);
    let store = GardenStateStore::new(handle.with_query_timeout(Duration::from_millis(200)));
    Arc::new(AppState::from_parts(store, Arc::new(SyncHub::new(64))))
}

async fn body_to_json(body: Body) -> Value {
    let bytes = axum::body::to_bytes(body, usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn send(state: &Arc<AppState>, request: Request<Body>) -> (StatusCode, Value) {
    let response = build_router(Arc::clone(state))
        .oneshot(request)
        .await
        .unwrap();
    let status = response.status();
    (status, body_to_json(response.into_body()).await)
}

async fn post(state: &Arc<AppState>, path: &str, body: &Value) -> (StatusCode, Value) {
    let request = Request::post(path)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    send(state, request).await
}

async fn get(state: &Arc<AppState>, path: &str) -> (StatusCode, Value) {
    send(state, Request::get(path).body(Body::empty()).unwrap()).await
}

async fn delete(state: &Arc<AppState>, path: &str) -> (StatusCode, Value) {
    send(state, Request::delete(path).body(Body::empty()).unwrap()).await
}

async fn complete_boundary(state: &Arc<AppState>, garden_id: &Value) {
    for (n, (lat, lng)) in (1..=4).zip(SQUARE) {
        let (status, _) = post(
            state,
            "/boundary-points",
            &json!({"garden_id": garden_id, "point_no": n, "latitude": lat, "longitude": lng}),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }
}

// =========================================================================
// REST
// =========================================================================

#[tokio::test]
async fn test_boundary_point_creates_garden() {
    let state = make_test_state();
    let (status, json) = post(
        &state,
        "/boundary-points",
        &json!({"garden_id": "g1", "point_no": 1, "latitude": 14.4755, "longitude": 100.1180}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["message"], "Point received");

    let (status, gardens) = get(&state, "/gardens").await;
    assert_eq!(status, StatusCode::OK);
    let gardens = gardens.as_array().unwrap();
    assert_eq!(gardens.len(), 1);
    assert_eq!(gardens[0]["garden_id"], "g1");
    assert_eq!(gardens[0]["boundary"][0]["lat"], 14.4755);
    assert!(gardens[0]["boundary"][1].is_null());
    assert_eq!(gardens[0]["grid"].as_array().unwrap().len(), 100);
}

#[tokio::test]
async fn test_invalid_point_no_is_bad_request() {
    let state = make_test_state();
    let (status, json) = post(
        &state,
        "/boundary-points",
        &json!({"garden_id": "g1", "point_no": 5, "latitude": 14.0, "longitude": 100.0}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["status"], 400);
    assert!(json["error"].as_str().unwrap().contains("point_no"));

    let (_, gardens) = get(&state, "/gardens").await;
    assert!(gardens.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_malformed_body_is_bad_request() {
    let state = make_test_state();
    let request = Request::post("/color-readings")
        .body(Body::from("{not json"))
        .unwrap();
    let (status, json) = send(&state, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json["error"].as_str().unwrap().starts_with("invalid input"));
}

#[tokio::test]
async fn test_color_before_boundary_is_not_ready() {
    let state = make_test_state();
    let (status, json) = post(
        &state,
        "/color-readings",
        &json!({"garden_id": "g1", "latitude": 14.476, "longitude": 100.1185, "r": 1, "g": 2, "b": 3}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json["error"].as_str().unwrap().starts_with("BoundaryNotReady"));
}

#[tokio::test]
async fn test_color_reading_updates_grid_and_log() {
    let state = make_test_state();
    complete_boundary(&state, &json!(42)).await;

    let (status, json) = post(
        &state,
        "/color-readings",
        &json!({"garden_id": 42, "latitude": 14.476_45, "longitude": 100.118_05, "r": 255, "g": 0, "b": 0, "device_id": "esp32-1"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["message"], "Color received");

    let (status, garden) = get(&state, "/gardens/42").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(garden["grid"][0]["r"], 255);
    assert_eq!(garden["grid"][1]["r"], 0);
    assert!(garden["grid"][1]["measured_at"].is_null());

    let (status, readings) = get(&state, "/gardens/42/readings").await;
    assert_eq!(status, StatusCode::OK);
    let readings = readings.as_array().unwrap();
    assert_eq!(readings.len(), 1);
    assert_eq!(readings[0]["cell_index"], 0);
    assert_eq!(readings[0]["garden_id"], "42");
}

#[tokio::test]
async fn test_storage_outage_keeps_ingestion_up_and_fails_readings() {
    let state = make_outage_state();
    complete_boundary(&state, &json!(9)).await;

    let (status, json) = post(
        &state,
        "/color-readings",
        &json!({"garden_id": 9, "latitude": 14.476_45, "longitude": 100.118_05, "r": 1, "g": 2, "b": 3}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["message"], "Color received");

    let (status, garden) = get(&state, "/gardens/9").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(garden["grid"][0]["b"], 3);

    let (status, json) = tokio::time::timeout(
        Duration::from_secs(5),
        get(&state, "/gardens/9/readings"),
    )
    .await
    .unwrap();
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(json["status"], 503);
}

#[tokio::test]
async fn test_out_of_range_color_is_bad_request() {
    let state = make_test_state();
    complete_boundary(&state, &json!("g")).await;
    let (status, _) = post(
        &state,
        "/color-readings",
        &json!({"garden_id": "g", "latitude": 14.476, "longitude": 100.1185, "r": 300, "g": 0, "b": 0}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, readings) = get(&state, "/gardens/g/readings").await;
    assert!(readings.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_delete_garden() {
    let state = make_test_state();
    complete_boundary(&state, &json!("g")).await;

    let (status, json) = delete(&state, "/gardens/g").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["message"], "Garden deleted");

    let (status, json) = delete(&state, "/gardens/g").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["status"], 404);

    let (status, _) = get(&state, "/gardens/g").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = get(&state, "/gardens/g/readings").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_legacy_device_routes() {
    let state = make_test_state();
    for (n, (lat, lng)) in (1..=4).zip(SQUARE) {
        let (status, _) = post(
            &state,
            "/api/upload_point",
            &json!({"garden_id": 7, "point_no": n, "latitude": lat, "longitude": lng, "ts": 1}),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }
    let (status, _) = post(
        &state,
        "/api/upload_color",
        &json!({"garden_id": 7, "latitude": 14.476, "longitude": 100.1185, "r": 9, "g": 9, "b": 9}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (_, gardens) = get(&state, "/api/get_all_gardens").await;
    assert_eq!(gardens.as_array().unwrap().len(), 1);
    let (_, colors) = get(&state, "/api/get_garden_colors/7").await;
    assert_eq!(colors.as_array().unwrap().len(), 1);

    let (status, _) = delete(&state, "/api/delete_garden/7").await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = delete(&state, "/api/delete_garden/7").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_health() {
    let state = make_test_state();
    complete_boundary(&state, &json!("g")).await;
    let (status, json) = get(&state, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
    assert_eq!(json["gardens"], 1);
    assert_eq!(json["viewers"], 0);
}

#[tokio::test]
async fn test_overlong_path_id_is_bad_request() {
    let state = make_test_state();
    let path = format!("/gardens/{}", "x".repeat(200));
    let (status, _) = get(&state, &path).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_nonexistent_route_returns_404() {
    let state = make_test_state();
    let response = build_router(state)
        .oneshot(Request::get("/nope").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

// =========================================================================
// Viewer channel
// =========================================================================

async fn spawn_server(state: &Arc<AppState>) -> std::net::SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let state = Arc::clone(state);
    tokio::spawn(async move {
        garden_observer::serve(listener, state, std::future::pending())
            .await
            .unwrap();
    });
    addr
}

async fn next_json<S>(stream: &mut S) -> Value
where
    S: futures::Stream<Item = Result<tokio_tungstenite::tungstenite::Message, tokio_tungstenite::tungstenite::Error>>
        + Unpin,
{
    let message = tokio::time::timeout(Duration::from_secs(5), stream.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    serde_json::from_str(message.to_text().unwrap()).unwrap()
}

async fn wait_for_viewers(state: &Arc<AppState>, expected: usize) {
    for _ in 0..100 {
        if state.viewer_count() == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("expected {expected} viewers, have {}", state.viewer_count());
}

#[tokio::test]
async fn test_viewer_receives_snapshot_then_live_events() {
    let state = make_test_state();
    complete_boundary(&state, &json!("early")).await;
    post(
        &state,
        "/color-readings",
        &json!({"garden_id": "early", "latitude": 14.476_03, "longitude": 100.118_47, "r": 5, "g": 6, "b": 7}),
    )
    .await;

    let addr = spawn_server(&state).await;
    let (mut socket, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws"))
        .await
        .unwrap();

    let snapshot = next_json(&mut socket).await;
    assert_eq!(snapshot["type"], "boundary_completed");
    assert_eq!(snapshot["data"]["garden_id"], "early");
    assert_eq!(snapshot["data"]["grid"][44]["b"], 7);

    wait_for_viewers(&state, 1).await;

    complete_boundary(&state, &json!("late")).await;
    let completed = next_json(&mut socket).await;
    assert_eq!(completed["type"], "boundary_completed");
    assert_eq!(completed["data"]["garden_id"], "late");
    assert!(completed["data"].get("grid").is_none());

    post(
        &state,
        "/color-readings",
        &json!({"garden_id": "late", "latitude": 14.475_55, "longitude": 100.118_95, "r": 1, "g": 2, "b": 3}),
    )
    .await;
    let update = next_json(&mut socket).await;
    assert_eq!(update["type"], "cell_updated");
    assert_eq!(update["data"]["cell_index"], 99);
    assert_eq!(update["data"]["cell"]["g"], 2);

    delete(&state, "/gardens/early").await;
    let deleted = next_json(&mut socket).await;
    assert_eq!(deleted["type"], "garden_deleted");
    assert_eq!(deleted["data"]["garden_id"], "early");
}

#[tokio::test]
async fn test_viewer_disconnect_leaves_hub() {
    let state = make_test_state();
    let addr = spawn_server(&state).await;

    let (socket, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws"))
        .await
        .unwrap();
    wait_for_viewers(&state, 1).await;

    drop(socket);
    wait_for_viewers(&state, 0).await;
}
