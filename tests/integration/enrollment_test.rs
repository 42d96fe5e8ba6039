//! Enrollment round-trip: join → approve → one-shot key delivery.

use http::StatusCode;
use serde_json::json;

use backhub_entity::user::UserRole;

use crate::helpers::TestApp;

#[tokio::test]
async fn join_approve_retrieve_key_exactly_once() {
    let Some(app) = TestApp::new().await else {
        return;
    };

    // Node posts a join request with its console code.
    let join = app
        .request(
            "POST",
            "/api/nodes/join-request",
            Some(json!({"hostname": "api1", "address": "1.2.3.4:8790", "code": "XK7M2"})),
            None,
        )
        .await;
    assert_eq!(join.status, StatusCode::CREATED, "{:?}", join.body);
    let request_id = join.uuid("request_id");
    assert_eq!(join.body["code"], "XK7M2");

    // While pending, polling returns no key.
    let poll = app
        .request("GET", "/api/nodes/status/code/XK7M2", None, None)
        .await;
    assert_eq!(poll.status, StatusCode::OK);
    assert_eq!(poll.body["status"], "pending");
    assert!(poll.body["api_key"].is_null());

    // Super admin approves.
    let admin = app.login_as("root@test.com", UserRole::SuperAdmin).await;
    let approve = app
        .request(
            "POST",
            &format!("/api/nodes/approve/{request_id}"),
            None,
            Some(&admin),
        )
        .await;
    assert_eq!(approve.status, StatusCode::OK, "{:?}", approve.body);
    assert_eq!(approve.body["status"], "active");
    // Sensitive fields never serialize.
    assert!(approve.body.get("api_key_hash").is_none());

    // First poll after approval carries the key.
    let poll = app
        .request("GET", "/api/nodes/status/code/XK7M2", None, None)
        .await;
    assert_eq!(poll.body["status"], "active");
    let key = poll.body["api_key"].as_str().expect("key delivered once");
    assert!(key.len() >= 43, "256-bit key expected");

    // Second poll: status still answers, key slot is spent.
    let poll = app
        .request("GET", "/api/nodes/status/code/XK7M2", None, None)
        .await;
    assert_eq!(poll.body["status"], "active");
    assert!(poll.body["api_key"].is_null());

    // The delivered key authenticates the node.
    let beat = app
        .node_request(
            "POST",
            "/api/daemon/heartbeat",
            Some(json!({"active_jobs": 0, "temp_bytes": 0, "version": "test"})),
            key,
        )
        .await;
    assert_eq!(beat.status, StatusCode::OK, "{:?}", beat.body);

    // Registration code is cleared on the approved row.
    let code: Option<String> =
        sqlx::query_scalar("SELECT registration_code FROM nodes WHERE id = $1")
            .bind(request_id)
            .fetch_one(&app.db_pool)
            .await
            .unwrap();
    assert!(code.is_none());
}

#[tokio::test]
async fn approving_twice_conflicts() {
    let Some(app) = TestApp::new().await else {
        return;
    };

    let join = app
        .request(
            "POST",
            "/api/nodes/join-request",
            Some(json!({"hostname": "api2", "address": "1.2.3.5:8790", "code": "AB2CD"})),
            None,
        )
        .await;
    let request_id = join.uuid("request_id");

    let admin = app.login_as("root2@test.com", UserRole::SuperAdmin).await;
    let first = app
        .request(
            "POST",
            &format!("/api/nodes/approve/{request_id}"),
            None,
            Some(&admin),
        )
        .await;
    assert_eq!(first.status, StatusCode::OK);

    let second = app
        .request(
            "POST",
            &format!("/api/nodes/approve/{request_id}"),
            None,
            Some(&admin),
        )
        .await;
    assert_eq!(second.status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn approval_requires_super_admin() {
    let Some(app) = TestApp::new().await else {
        return;
    };

    let join = app
        .request(
            "POST",
            "/api/nodes/join-request",
            Some(json!({"hostname": "api3", "address": "1.2.3.6:8790", "code": "EF3GH"})),
            None,
        )
        .await;
    let request_id = join.uuid("request_id");

    let node_admin = app.login_as("na@test.com", UserRole::NodeAdmin).await;
    let refused = app
        .request(
            "POST",
            &format!("/api/nodes/approve/{request_id}"),
            None,
            Some(&node_admin),
        )
        .await;
    assert_eq!(refused.status, StatusCode::FORBIDDEN);

    let unauthenticated = app
        .request("POST", &format!("/api/nodes/approve/{request_id}"), None, None)
        .await;
    assert_eq!(unauthenticated.status, StatusCode::UNAUTHORIZED);
}
