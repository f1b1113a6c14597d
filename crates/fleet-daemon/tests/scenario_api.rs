//! End-to-end scenarios driven straight through the Axum router via
//! `tower::ServiceExt::oneshot`, with no listener bound — the same
//! in-process router composition `build_router` uses in production, just
//! without the background workers `build_app` would also spawn.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use fleet_config::CoreConfig;
use fleet_daemon::state::AppState;
use fleet_store::Store;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

async fn test_state() -> (tempfile::TempDir, AppState) {
    let dir = tempfile::tempdir().unwrap();
    let config = CoreConfig::with_overrides(
        dir.path().to_path_buf(),
        Duration::from_millis(50),
        Duration::from_secs(5),
    );
    let store = Arc::new(Store::bootstrap(&config.state_db_path(), config.case_policy).await.unwrap());
    (dir, AppState::new(config, store))
}

async fn call(state: &AppState, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let router = fleet_daemon::build_router(state.clone());
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(match body {
            Some(v) => Body::from(serde_json::to_vec(&v).unwrap()),
            None => Body::empty(),
        })
        .unwrap();
    let response = router.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value: Value = if bytes.is_empty() { json!({}) } else { serde_json::from_slice(&bytes).unwrap() };
    (status, value)
}

#[tokio::test]
async fn mission_and_sortie_lifecycle_round_trips_through_http() {
    let (_dir, state) = test_state().await;

    let (status, mission) = call(
        &state,
        "POST",
        "/api/v1/missions",
        Some(json!({"title": "Ship v2", "priority": "high"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let mission_id = mission["id"].as_str().unwrap().to_string();

    let (status, _) = call(&state, "POST", &format!("/api/v1/missions/{mission_id}/start"), None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, sortie) = call(
        &state,
        "POST",
        "/api/v1/sorties",
        Some(json!({"mission_id": mission_id, "title": "Write parser", "priority": "medium", "files": ["src/parser.rs"]})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let sortie_id = sortie["id"].as_str().unwrap().to_string();

    let (status, specialist) = call(
        &state,
        "POST",
        "/api/v1/specialists",
        Some(json!({"name": "drone-7", "capabilities": ["rust"]})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let specialist_id = specialist["id"].as_str().unwrap().to_string();

    let (status, _) = call(
        &state,
        "POST",
        &format!("/api/v1/sorties/{sortie_id}/assign"),
        Some(json!({"specialist_id": specialist_id})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, sortie) = call(
        &state,
        "POST",
        &format!("/api/v1/sorties/{sortie_id}/start"),
        Some(json!({"specialist_id": specialist_id})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(sortie["status"], "in_progress");

    // out-of-order completion is rejected: the mission still has an open sortie.
    let (status, body) = call(&state, "POST", &format!("/api/v1/missions/{mission_id}/complete"), Some(json!({}))).await;
    assert_eq!(status, StatusCode::PRECONDITION_FAILED);
    assert_eq!(body["error"]["code"], "precondition_failed");

    let (status, sortie) = call(
        &state,
        "POST",
        &format!("/api/v1/sorties/{sortie_id}/complete"),
        Some(json!({"result": {"ok": true}})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(sortie["status"], "completed");

    let (status, mission) = call(&state, "POST", &format!("/api/v1/missions/{mission_id}/complete"), Some(json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(mission["status"], "completed");
}

#[tokio::test]
async fn lock_acquire_conflict_and_ownership_errors_surface_with_the_envelope() {
    let (_dir, state) = test_state().await;

    let (_, a) = call(&state, "POST", "/api/v1/specialists", Some(json!({"name": "a"}))).await;
    let a_id = a["id"].as_str().unwrap().to_string();
    let (_, b) = call(&state, "POST", "/api/v1/specialists", Some(json!({"name": "b"}))).await;
    let b_id = b["id"].as_str().unwrap().to_string();

    let (status, lock) = call(
        &state,
        "POST",
        "/api/v1/locks/acquire",
        Some(json!({"file": "src/lib.rs", "specialist_id": a_id, "timeout_ms": 60_000, "purpose": "edit"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let lock_id = lock["id"].as_str().unwrap().to_string();

    let (status, conflict) = call(
        &state,
        "POST",
        "/api/v1/locks/acquire",
        Some(json!({"file": "src/lib.rs", "specialist_id": b_id, "timeout_ms": 60_000, "purpose": "edit"})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(conflict["error"]["code"], "conflict");

    let (status, err) = call(
        &state,
        "POST",
        &format!("/api/v1/locks/{lock_id}/release"),
        Some(json!({"specialist_id": b_id})),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(err["error"]["code"], "ownership_error");

    let (status, released) = call(
        &state,
        "POST",
        &format!("/api/v1/locks/{lock_id}/release"),
        Some(json!({"specialist_id": a_id})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(released["status"], "released");
}

#[tokio::test]
async fn mailbox_messages_are_returned_in_send_order() {
    let (_dir, state) = test_state().await;
    let (_, owner) = call(&state, "POST", "/api/v1/specialists", Some(json!({"name": "owner"}))).await;
    let owner_id = owner["id"].as_str().unwrap().to_string();

    let mut mailbox_id = String::new();
    for i in 0..3 {
        let (status, message) = call(
            &state,
            "POST",
            "/api/v1/messages",
            Some(json!({"mailbox_owner_id": owner_id, "message_type": "note", "content": {"i": i}})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        mailbox_id = message["mailbox_id"].as_str().unwrap().to_string();
    }

    let (status, messages) = call(&state, "GET", &format!("/api/v1/mailboxes/{mailbox_id}/messages"), None).await;
    assert_eq!(status, StatusCode::OK);
    let messages = messages.as_array().unwrap();
    assert_eq!(messages.len(), 3);
    assert_eq!(messages[0]["content"]["i"], 0);
    assert_eq!(messages[2]["content"]["i"], 2);
}

#[tokio::test]
async fn checkpoint_dry_run_restore_reports_without_mutating() {
    let (_dir, state) = test_state().await;

    let (_, mission) = call(&state, "POST", "/api/v1/missions", Some(json!({"title": "Ship v2", "priority": "high"}))).await;
    let mission_id = mission["id"].as_str().unwrap().to_string();
    let (_, creator) = call(&state, "POST", "/api/v1/specialists", Some(json!({"name": "creator"}))).await;
    let creator_id = creator["id"].as_str().unwrap().to_string();

    let (status, checkpoint) = call(
        &state,
        "POST",
        &format!("/api/v1/missions/{mission_id}/checkpoints"),
        Some(json!({"trigger": "manual", "created_by": creator_id})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let checkpoint_id = checkpoint["id"].as_str().unwrap().to_string();

    let (status, report) = call(
        &state,
        "POST",
        &format!("/api/v1/checkpoints/{checkpoint_id}/restore?dry_run=true"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["dry_run"], true);
    assert_eq!(report["success"], true);
}
