//! API regression tests.
//!
//! Drives the full router in-process: registers fleets, creates and runs
//! deployments, pushes alarms, and checks status codes and envelopes.

use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use cutover_api::build_router;
use cutover_core::config::HealthSettings;
use cutover_rollout::CutoverController;
use cutover_state::StateStore;

fn test_controller() -> CutoverController {
    CutoverController::builder(StateStore::open_in_memory().unwrap())
        .health_settings(HealthSettings {
            min_signals: 0,
            ..HealthSettings::default()
        })
        .build()
        .unwrap()
}

async fn send(router: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let req = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(&body).unwrap()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let resp = router.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

async fn register_pair(router: &Router) {
    for id in ["blue", "green"] {
        let (status, _) = send(
            router,
            "POST",
            "/api/v1/fleets",
            Some(json!({"id": id, "service": "api", "image_tag": format!("{id}:sha-1")})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
    }
}

#[tokio::test]
async fn api_list_endpoints_empty() {
    let router = build_router(test_controller());

    for uri in ["/api/v1/fleets", "/api/v1/deployments", "/api/v1/events"] {
        let (status, body) = send(&router, "GET", uri, None).await;
        assert_eq!(status, StatusCode::OK, "{uri}");
        assert_eq!(body["success"], true);
        assert_eq!(body["data"], json!([]));
    }
}

#[tokio::test]
async fn api_register_assigns_roles() {
    let router = build_router(test_controller());
    register_pair(&router).await;

    let (status, body) = send(&router, "GET", "/api/v1/fleets/blue", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["role"], "blue");
    assert_eq!(body["data"]["weight"], 100);

    let (_, body) = send(&router, "GET", "/api/v1/fleets/green", None).await;
    assert_eq!(body["data"]["role"], "green");
    assert_eq!(body["data"]["weight"], 0);

    let (status, body) = send(
        &router,
        "POST",
        "/api/v1/fleets",
        Some(json!({"id": "third", "service": "api"})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["success"], false);
    assert!(body["error"].as_str().unwrap().contains("green"));
}

#[tokio::test]
async fn api_create_rejects_invalid_strategy() {
    let router = build_router(test_controller());
    register_pair(&router).await;

    let (status, body) = send(
        &router,
        "POST",
        "/api/v1/deployments",
        Some(json!({
            "blue_fleet": "blue",
            "green_fleet": "green",
            "strategy": {"type": "canary", "percentage": 0, "bake_minutes": 5}
        })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("percentage"));

    let (_, body) = send(&router, "GET", "/api/v1/deployments", None).await;
    assert_eq!(body["data"], json!([]));
}

#[tokio::test(start_paused = true)]
async fn api_all_at_once_cutover_succeeds() {
    tokio::time::advance(Duration::from_secs(7200)).await;
    let controller = test_controller();
    let router = build_router(controller.clone());
    register_pair(&router).await;

    let (status, body) = send(
        &router,
        "POST",
        "/api/v1/deployments",
        Some(json!({
            "id": "release-1",
            "blue_fleet": "blue",
            "green_fleet": "green",
            "strategy": {"type": "all_at_once"}
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["status"], "pending");
    assert_eq!(body["data"]["steps"].as_array().unwrap().len(), 1);

    let (status, _) = send(&router, "POST", "/api/v1/deployments/release-1/start", None).await;
    assert_eq!(status, StatusCode::ACCEPTED);

    controller.join("release-1").await.unwrap();

    let (_, body) = send(&router, "GET", "/api/v1/deployments/release-1", None).await;
    assert_eq!(body["data"]["status"], "succeeded");

    let (_, body) = send(&router, "GET", "/api/v1/fleets/green", None).await;
    assert_eq!(body["data"]["role"], "blue");
    assert_eq!(body["data"]["weight"], 100);

    let (_, body) = send(&router, "GET", "/api/v1/deployments/release-1/events", None).await;
    let kinds: Vec<&str> = body["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["kind"].as_str().unwrap())
        .collect();
    assert_eq!(
        kinds,
        vec![
            "deployment_created",
            "deployment_started",
            "step_applied",
            "health_evaluated",
            "succeeded"
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn api_alarm_rolls_back_canary() {
    tokio::time::advance(Duration::from_secs(7200)).await;
    let controller = test_controller();
    let router = build_router(controller.clone());
    register_pair(&router).await;

    send(
        &router,
        "POST",
        "/api/v1/deployments",
        Some(json!({
            "id": "release-2",
            "blue_fleet": "blue",
            "green_fleet": "green",
            "strategy": {"type": "canary", "percentage": 10, "bake_minutes": 5}
        })),
    )
    .await;
    send(&router, "POST", "/api/v1/deployments/release-2/start", None).await;

    tokio::time::sleep(Duration::from_secs(30)).await;
    let (_, body) = send(&router, "GET", "/api/v1/fleets/green", None).await;
    assert_eq!(body["data"]["weight"], 10);

    let (status, _) = send(
        &router,
        "POST",
        "/api/v1/signals",
        Some(json!({"source": "alarm-5xx", "fleet_id": "green", "triggered": true})),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);

    controller.join("release-2").await.unwrap();

    let (_, body) = send(&router, "GET", "/api/v1/deployments/release-2", None).await;
    assert_eq!(body["data"]["status"], "rolled_back");

    let (_, body) = send(&router, "GET", "/api/v1/fleets/green", None).await;
    assert_eq!(body["data"]["weight"], 0);
    assert_eq!(body["data"]["health"], "unhealthy");
    let (_, body) = send(&router, "GET", "/api/v1/fleets/blue", None).await;
    assert_eq!(body["data"]["weight"], 100);

    let (status, _) = send(&router, "POST", "/api/v1/deployments/release-2/abort", None).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test(start_paused = true)]
async fn api_abort_with_reason() {
    tokio::time::advance(Duration::from_secs(7200)).await;
    let controller = test_controller();
    let router = build_router(controller.clone());
    register_pair(&router).await;

    send(
        &router,
        "POST",
        "/api/v1/deployments",
        Some(json!({
            "id": "release-3",
            "blue_fleet": "blue",
            "green_fleet": "green",
            "strategy": {"type": "linear", "step_percentage": 20, "interval_minutes": 2}
        })),
    )
    .await;
    send(&router, "POST", "/api/v1/deployments/release-3/start", None).await;

    let (status, _) = send(&router, "POST", "/api/v1/deployments/release-3/start", None).await;
    assert_eq!(status, StatusCode::CONFLICT);

    tokio::time::sleep(Duration::from_secs(150)).await;
    let (status, body) = send(
        &router,
        "POST",
        "/api/v1/deployments/release-3/abort",
        Some(json!({"reason": "bad metrics"})),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["data"]["status"], "in_progress");

    let done = controller.join("release-3").await.unwrap();
    assert_eq!(done.reason.as_deref(), Some("aborted: bad metrics"));

    let (_, body) = send(&router, "GET", "/api/v1/fleets/green", None).await;
    assert_eq!(body["data"]["weight"], 0);
}

#[tokio::test]
async fn api_unknown_ids() {
    let router = build_router(test_controller());

    let (status, _) = send(&router, "GET", "/api/v1/deployments/nope", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = send(&router, "POST", "/api/v1/deployments/nope/abort", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = send(&router, "DELETE", "/api/v1/fleets/nope", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = send(
        &router,
        "POST",
        "/api/v1/signals",
        Some(json!({"source": "alarm-5xx", "fleet_id": "nope", "triggered": true})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
