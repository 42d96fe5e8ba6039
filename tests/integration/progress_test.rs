//! Progress row semantics through the API: epoch fencing, conflicts,
//! stop flags, and terminal stickiness.

use http::StatusCode;
use serde_json::json;

use backhub_entity::user::UserRole;

use crate::helpers::TestApp;

const GIB: i64 = 1024 * 1024 * 1024;

#[tokio::test]
async fn progress_lifecycle_with_epoch_fencing() {
    let Some(app) = TestApp::new().await else {
        return;
    };

    let (node_id, key) = app.create_active_node("p1", 100 * GIB).await;
    let site_id = app.create_site(node_id, "ps1", 20 * GIB).await;

    // The daemon claims an epoch.
    let begin = app
        .node_request(
            "POST",
            &format!("/api/daemon/progress/begin/{site_id}"),
            None,
            &key,
        )
        .await;
    assert_eq!(begin.status, StatusCode::OK, "{:?}", begin.body);
    let epoch = begin.body["epoch"].as_i64().unwrap();
    assert_eq!(epoch, 1);

    // Second begin while RUNNING conflicts.
    let conflict = app
        .node_request(
            "POST",
            &format!("/api/daemon/progress/begin/{site_id}"),
            None,
            &key,
        )
        .await;
    assert_eq!(conflict.status, StatusCode::CONFLICT);

    // The current writer lands its patch.
    let update = app
        .node_request(
            "POST",
            &format!("/api/daemon/progress/{site_id}"),
            Some(json!({
                "epoch": epoch,
                "progress_percent": 40,
                "stage": "backup_files",
                "message": "Files backed up",
            })),
            &key,
        )
        .await;
    assert_eq!(update.body["applied"], true, "{:?}", update.body);

    // A zombie with a stale epoch is dropped silently.
    let stale = app
        .node_request(
            "POST",
            &format!("/api/daemon/progress/{site_id}"),
            Some(json!({"epoch": epoch - 1, "progress_percent": 99})),
            &key,
        )
        .await;
    assert_eq!(stale.body["applied"], false);

    // Readers observe the consistent snapshot.
    let admin = app.login_as("p1@test.com", UserRole::SuperAdmin).await;
    let status = app
        .request(
            "GET",
            &format!("/api/sites/{site_id}/backup/status"),
            None,
            Some(&admin),
        )
        .await;
    assert_eq!(status.body["state"], "running");
    assert_eq!(status.body["progress_percent"], 40);
    assert_eq!(status.body["stage"], "backup_files");
    assert_eq!(status.body["epoch"], epoch);

    // Terminal transition; row becomes sticky.
    let finish = app
        .node_request(
            "POST",
            &format!("/api/daemon/progress/{site_id}/finish"),
            Some(json!({"epoch": epoch, "state": "completed", "message": "done", "error": null})),
            &key,
        )
        .await;
    assert_eq!(finish.body["applied"], true, "{:?}", finish.body);

    let late = app
        .node_request(
            "POST",
            &format!("/api/daemon/progress/{site_id}"),
            Some(json!({"epoch": epoch, "progress_percent": 10})),
            &key,
        )
        .await;
    assert_eq!(late.body["applied"], false, "terminal states are sticky");

    let status = app
        .request(
            "GET",
            &format!("/api/sites/{site_id}/backup/status"),
            None,
            Some(&admin),
        )
        .await;
    assert_eq!(status.body["state"], "completed");
    assert_eq!(status.body["progress_percent"], 100);

    // A fresh begin resets the row atomically under a higher epoch.
    let begin = app
        .node_request(
            "POST",
            &format!("/api/daemon/progress/begin/{site_id}"),
            None,
            &key,
        )
        .await;
    assert_eq!(begin.body["epoch"], 2);
    let status = app
        .request(
            "GET",
            &format!("/api/sites/{site_id}/backup/status"),
            None,
            Some(&admin),
        )
        .await;
    assert_eq!(status.body["progress_percent"], 0);
    assert!(status.body["error"].is_null());
}

#[tokio::test]
async fn stop_sets_flag_and_start_conflicts_while_running() {
    let Some(app) = TestApp::new().await else {
        return;
    };

    let (node_id, key) = app.create_active_node("p2", 100 * GIB).await;
    let site_id = app.create_site(node_id, "ps2", 20 * GIB).await;

    let begin = app
        .node_request(
            "POST",
            &format!("/api/daemon/progress/begin/{site_id}"),
            None,
            &key,
        )
        .await;
    let epoch = begin.body["epoch"].as_i64().unwrap();

    // Starting through the user endpoint while RUNNING is a 409 and
    // leaves the row untouched.
    let admin = app.login_as("p2@test.com", UserRole::SuperAdmin).await;
    let start = app
        .request(
            "POST",
            &format!("/api/sites/{site_id}/backup/start"),
            None,
            Some(&admin),
        )
        .await;
    assert_eq!(start.status, StatusCode::CONFLICT);

    // Stop raises the cooperative flag; the next progress ack carries it.
    let stop = app
        .request(
            "POST",
            &format!("/api/sites/{site_id}/backup/stop"),
            None,
            Some(&admin),
        )
        .await;
    assert_eq!(stop.status, StatusCode::OK);
    assert_eq!(stop.body["stop_requested"], true);

    let ack = app
        .node_request(
            "POST",
            &format!("/api/daemon/progress/{site_id}"),
            Some(json!({"epoch": epoch, "progress_percent": 72, "stage": "upload_remote"})),
            &key,
        )
        .await;
    assert_eq!(ack.body["stop_requested"], true);

    // Stop is idempotent.
    let stop = app
        .request(
            "POST",
            &format!("/api/sites/{site_id}/backup/stop"),
            None,
            Some(&admin),
        )
        .await;
    assert_eq!(stop.body["stop_requested"], true);

    // The daemon reports the stopped outcome; no backup row appears.
    app.node_request(
        "POST",
        &format!("/api/daemon/progress/{site_id}/finish"),
        Some(json!({"epoch": epoch, "state": "stopped", "message": "Backup stopped", "error": null})),
        &key,
    )
    .await;

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM backups WHERE site_id = $1")
        .bind(site_id)
        .fetch_one(&app.db_pool)
        .await
        .unwrap();
    assert_eq!(count, 0);
}

#[tokio::test]
async fn reset_requires_idle_engine_and_bumps_epoch() {
    let Some(app) = TestApp::new().await else {
        return;
    };

    let (node_id, key) = app.create_active_node("p3", 100 * GIB).await;
    let site_id = app.create_site(node_id, "ps3", 20 * GIB).await;

    let begin = app
        .node_request(
            "POST",
            &format!("/api/daemon/progress/begin/{site_id}"),
            None,
            &key,
        )
        .await;
    let stale_epoch = begin.body["epoch"].as_i64().unwrap();

    // Reset forces the stuck row back to IDLE (the node at the recorded
    // address is unreachable, which counts as holding no live job).
    let admin = app.login_as("p3@test.com", UserRole::SuperAdmin).await;
    let reset = app
        .request(
            "POST",
            &format!("/api/daemon/backup/reset/{site_id}"),
            None,
            Some(&admin),
        )
        .await;
    assert_eq!(reset.status, StatusCode::OK, "{:?}", reset.body);
    assert_eq!(reset.body["state"], "idle");

    // The fenced-out writer can no longer touch the row.
    let stale = app
        .node_request(
            "POST",
            &format!("/api/daemon/progress/{site_id}"),
            Some(json!({"epoch": stale_epoch, "progress_percent": 50})),
            &key,
        )
        .await;
    assert_eq!(stale.body["applied"], false);
}

#[tokio::test]
async fn stream_rejects_bad_tokens() {
    let Some(app) = TestApp::new().await else {
        return;
    };

    let (node_id, _) = app.create_active_node("p4", 100 * GIB).await;
    let site_id = app.create_site(node_id, "ps4", 20 * GIB).await;

    let refused = app
        .request(
            "GET",
            &format!("/api/daemon/backup/stream/{site_id}?interval=5&token=garbage"),
            None,
            None,
        )
        .await;
    assert_eq!(refused.status, StatusCode::UNAUTHORIZED);
}
