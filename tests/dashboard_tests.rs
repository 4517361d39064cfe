
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

use jitstreamer_runner::dashboard::{router, DashboardState};
use jitstreamer_runner::queue::{JobQueue, Launch, Mount};
use test_harness::temp_queue;

/// Helper to create test state over a fresh database
fn create_test_state() -> (TempDir, DashboardState) {
    let (dir, path, launch) = temp_queue::<Launch>();
    let mount: JobQueue<Mount> = JobQueue::open(&path).unwrap();
    (dir, DashboardState { launch, mount })
}

async fn get_json(app: Router, uri: &str) -> (StatusCode, Value) {
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    (status, serde_json::from_slice(&body).unwrap())
}

#[tokio::test]
async fn test_health_reports_counts() {
    let (_dir, state) = create_test_state();
    let bundle = "com.example.app".to_string();
    state.launch.enqueue("AAA", "10.0.0.5", &bundle).unwrap();
    state.launch.enqueue("BBB", "10.0.0.6", &bundle).unwrap();
    state.launch.claim_next().unwrap();
    state.mount.enqueue("AAA", "10.0.0.5", &()).unwrap();

    let (status, json) = get_json(router(state), "/api/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
    assert_eq!(json["launch"]["pending"], 1);
    assert_eq!(json["launch"]["claimed"], 1);
    assert_eq!(json["launch"]["failed"], 0);
    assert_eq!(json["mount"]["pending"], 1);
}

#[tokio::test]
async fn test_queues_empty() {
    let (_dir, state) = create_test_state();

    let (status, json) = get_json(router(state), "/api/queues").await;

    assert_eq!(status, StatusCode::OK);
    assert!(json["launch"].as_array().unwrap().is_empty());
    assert!(json["mount"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_queues_show_job_details() {
    let (_dir, state) = create_test_state();
    let ordinal = state
        .launch
        .enqueue("AAA", "10.0.0.5", &"com.example.app".to_string())
        .unwrap();
    state.launch.claim_next().unwrap();
    state.launch.fail(ordinal, "Device AAA not found").unwrap();
    state.mount.enqueue("BBB", "10.0.0.6", &()).unwrap();

    let (status, json) = get_json(router(state), "/api/queues").await;

    assert_eq!(status, StatusCode::OK);
    let launch = &json["launch"][0];
    assert_eq!(launch["ordinal"], ordinal);
    assert_eq!(launch["udid"], "AAA");
    assert_eq!(launch["bundle_id"], "com.example.app");
    assert_eq!(launch["status"], "failed");
    assert_eq!(launch["error"], "Device AAA not found");

    let mount = &json["mount"][0];
    assert_eq!(mount["udid"], "BBB");
    assert_eq!(mount["status"], "pending");
    assert!(mount.get("bundle_id").is_none());
}

#[tokio::test]
async fn test_status_for_device() {
    let (_dir, state) = create_test_state();
    let bundle = "com.example.app".to_string();
    state.launch.enqueue("AAA", "10.0.0.5", &bundle).unwrap();
    state.launch.enqueue("BBB", "10.0.0.6", &bundle).unwrap();

    let (status, json) = get_json(router(state), "/api/status/BBB").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["udid"], "BBB");
    assert_eq!(json["launch"]["state"], "position");
    assert_eq!(json["launch"]["detail"], 1);
    assert_eq!(json["mount"]["state"], "not_queued");
}

#[tokio::test]
async fn test_status_does_not_consume_failures() {
    let (_dir, state) = create_test_state();
    let ordinal = state
        .launch
        .enqueue("AAA", "10.0.0.5", &"com.example.app".to_string())
        .unwrap();
    state.launch.claim_next().unwrap();
    state.launch.fail(ordinal, "Timeout").unwrap();
    let launch = state.launch.clone();

    for _ in 0..2 {
        let (_, json) = get_json(router(state.clone()), "/api/status/AAA").await;
        assert_eq!(json["launch"]["state"], "failed");
        assert_eq!(json["launch"]["detail"], "Timeout");
    }
    assert!(launch.get(ordinal).unwrap().is_some());
}

#[tokio::test]
async fn test_unknown_route() {
    let (_dir, state) = create_test_state();
    let response = router(state)
        .oneshot(Request::builder().uri("/api/jobs").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
