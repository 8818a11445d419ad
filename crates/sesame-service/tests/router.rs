//! End-to-end tests of the service router against a mock cloud.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use http_body_util::BodyExt;
use tower::ServiceExt;

use sesame_core::mock::{MockLockApi, MockOutcome};
use sesame_core::{LockApi, RetryConfig};
use sesame_service::{AppState, Config, app, platform};
use sesame_store::Store;

async fn discovered(api: Arc<MockLockApi>) -> Arc<AppState> {
    let mut config = Config::default();
    config.reconcile.cooldown_ms = 0;
    let dyn_api: Arc<dyn LockApi> = api;
    let state = AppState::new(Store::open_in_memory().unwrap(), config, dyn_api);
    platform::discover_with(&state, &RetryConfig::none()).await;
    state
}

fn front_door() -> Arc<MockLockApi> {
    Arc::new(MockLockApi::new().with_lock("dev-1", "Front Door", "SN-0001"))
}

async fn send(state: &Arc<AppState>, request: Request<Body>) -> (StatusCode, String) {
    let response = app(Arc::clone(state)).oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, String::from_utf8(bytes.to_vec()).unwrap())
}

async fn get(state: &Arc<AppState>, uri: &str) -> (StatusCode, serde_json::Value) {
    let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
    let (status, body) = send(state, request).await;
    (status, serde_json::from_str(&body).unwrap())
}

fn json_request(method: &str, uri: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
}

#[tokio::test]
async fn test_discovered_lock_is_listed() {
    let state = discovered(front_door()).await;

    let (status, json) = get(&state, "/api/locks").await;
    assert_eq!(status, StatusCode::OK);
    let locks = json.as_array().unwrap();
    assert_eq!(locks.len(), 1);
    assert_eq!(locks[0]["device_id"], "dev-1");
    assert_eq!(locks[0]["info"]["name"], "Front Door");
    assert_eq!(locks[0]["info"]["manufacturer"], "CANDY HOUSE");
    assert_eq!(locks[0]["phase"], "locked");
    assert_eq!(locks[0]["state"]["current_locked"], true);

    let (_, health) = get(&state, "/api/health").await;
    assert_eq!(health["locks"], 1);
}

#[tokio::test]
async fn test_read_characteristics() {
    let state = discovered(front_door()).await;

    let (status, json) = get(
        &state,
        "/api/locks/dev-1/characteristics/lock-current-state",
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["characteristic"], "LockCurrentState");
    assert_eq!(json["value"], 1);

    let (status, json) = get(&state, "/api/locks/dev-1/characteristics").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["LockTargetState"], 1);
    assert_eq!(json["ContactSensorState"], 0);
    assert_eq!(json["TimesOpened"], 0);
    assert!(json.get("MotionDetected").is_none());
}

#[tokio::test]
async fn test_unlock_through_characteristic_write() {
    let api = front_door();
    let state = discovered(Arc::clone(&api)).await;

    let request = json_request(
        "PUT",
        "/api/locks/dev-1/characteristics/LockTargetState",
        r#"{"value": 0}"#,
    );
    let (status, body) = send(&state, request).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert!(body.is_empty());

    let entry = state.lock("dev-1").await.unwrap();
    eventually(|| {
        let controller = Arc::clone(&entry.controller);
        async move { controller.snapshot().await.current_locked == Some(false) }
    })
    .await;

    assert_eq!(api.control_requests(), vec![("dev-1".to_string(), false)]);
    let (_, json) = get(&state, "/api/locks/dev-1").await;
    assert_eq!(json["phase"], "unlocked");
    assert_eq!(json["state"]["times_opened"], 1);
}

#[tokio::test]
async fn test_characteristic_errors() {
    let api = front_door();
    let state = discovered(Arc::clone(&api)).await;

    let request = json_request(
        "PUT",
        "/api/locks/dev-1/characteristics/BatteryLevel",
        r#"{"value": 10}"#,
    );
    let (status, _) = send(&state, request).await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);

    let request = json_request(
        "PUT",
        "/api/locks/dev-1/characteristics/LockTargetState",
        r#"{"value": 2}"#,
    );
    let (status, _) = send(&state, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let request = json_request(
        "PUT",
        "/api/locks/dev-1/characteristics/LockTargetState",
        r#"{"value": 7}"#,
    );
    let (status, body) = send(&state, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body.contains("Invalid value 7"));
    assert_eq!(api.control_calls(), 0);

    let (status, json) = get(&state, "/api/locks/dev-1/characteristics/Brightness").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(json["error"].as_str().unwrap().contains("Unknown characteristic"));

    let (status, _) = get(&state, "/api/locks/dev-1/characteristics/Duration").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_failed_command_surfaces_as_state() {
    let api = front_door();
    api.set_control_outcome(MockOutcome::Unsuccessful("DEVICE_OFFLINE".to_string()));
    let state = discovered(Arc::clone(&api)).await;

    let request = json_request(
        "PUT",
        "/api/locks/dev-1/characteristics/LockTargetState",
        r#"{"value": 0}"#,
    );
    let (status, _) = send(&state, request).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    eventually(|| {
        let api = Arc::clone(&api);
        async move { api.sync_calls() > 0 }
    })
    .await;
    let entry = state.lock("dev-1").await.unwrap();
    eventually(|| {
        let controller = Arc::clone(&entry.controller);
        async move { controller.snapshot().await.target_locked == Some(true) }
    })
    .await;
}

#[tokio::test]
async fn test_webhook_applies_out_of_band_change() {
    let api = front_door();
    let state = discovered(Arc::clone(&api)).await;

    let request = json_request("POST", "/", r#"{"device_id": "dev-1", "locked": false}"#);
    let (status, body) = send(&state, request).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.is_empty());

    let entry = state.lock("dev-1").await.unwrap();
    eventually(|| {
        let controller = Arc::clone(&entry.controller);
        async move { controller.snapshot().await.current_locked == Some(false) }
    })
    .await;

    let snapshot = entry.controller.snapshot().await;
    assert_eq!(snapshot.target_locked, Some(false));
    assert_eq!(snapshot.times_opened, 1);
    assert_eq!(api.sync_calls(), 1);
    assert_eq!(api.control_calls(), 0);
}

#[tokio::test]
async fn test_webhook_always_answers_success() {
    let state = discovered(front_door()).await;

    for body in [
        "not json",
        r#"{"locked": true}"#,
        r#"{"device_id": "unknown", "locked": true}"#,
    ] {
        let (status, response) = send(&state, json_request("POST", "/", body)).await;
        assert_eq!(status, StatusCode::OK);
        assert!(response.is_empty());
    }

    let entry = state.lock("dev-1").await.unwrap();
    assert_eq!(entry.controller.snapshot().await.current_locked, Some(true));
}

#[tokio::test]
async fn test_history_endpoint() {
    let state = discovered(front_door()).await;

    let (status, json) = get(&state, "/api/locks/dev-1/history").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["count"], 1);
    assert_eq!(json["limit"], 100);
    assert_eq!(json["has_more"], false);
    assert_eq!(json["data"][0]["device_id"], "dev-1");
    assert_eq!(json["data"][0]["status"], 0);

    let (status, _) = get(&state, "/api/locks/dev-1/history?since=20&until=10").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_discovery_failure_leaves_api_up() {
    let api = front_door();
    api.fail_listing(1);
    let state = discovered(api).await;

    let (status, json) = get(&state, "/api/locks").await;
    assert_eq!(status, StatusCode::OK);
    assert!(json.as_array().unwrap().is_empty());

    let (status, _) = get(&state, "/api/locks/dev-1").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
