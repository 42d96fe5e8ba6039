//! Quota projections, boundaries, and accounting.

use http::StatusCode;
use serde_json::json;

use backhub_core::types::id::SiteId;
use backhub_entity::backup::BackupReport;
use backhub_entity::user::UserRole;

use crate::helpers::TestApp;

const GIB: i64 = 1024 * 1024 * 1024;

#[tokio::test]
async fn preflight_projects_both_bounds() {
    let Some(app) = TestApp::new().await else {
        return;
    };

    // Node 100 GiB (10 used), site 20 GiB (5 used), estimate 3 GiB.
    let (node_id, _) = app.create_active_node("n1", 100 * GIB).await;
    let site_id = app.create_site(node_id, "s1", 20 * GIB).await;
    app.set_site_usage(site_id, 5 * GIB).await;
    app.set_node_usage(node_id, 10 * GIB).await;

    let admin = app.login_as("q1@test.com", UserRole::SuperAdmin).await;
    let check = app
        .request(
            "GET",
            &format!("/api/sites/{site_id}/quota/check?estimated_bytes={}", 3 * GIB),
            None,
            Some(&admin),
        )
        .await;

    assert_eq!(check.status, StatusCode::OK, "{:?}", check.body);
    assert_eq!(check.body["can_proceed"], true);
    assert_eq!(check.body["projected_site_used"], json!(8 * GIB));
    assert_eq!(check.body["projected_node_used"], json!(13 * GIB));
    assert!(check.body["exceeded"].is_null());
}

#[tokio::test]
async fn preflight_boundary_is_exact() {
    let Some(app) = TestApp::new().await else {
        return;
    };

    let (node_id, _) = app.create_active_node("n2", 100 * GIB).await;
    let site_id = app.create_site(node_id, "s2", 20 * GIB).await;
    app.set_site_usage(site_id, 5 * GIB).await;
    app.set_node_usage(node_id, 5 * GIB).await;

    let admin = app.login_as("q2@test.com", UserRole::SuperAdmin).await;

    // Exactly filling the site quota passes.
    let remaining = 15 * GIB;
    let check = app
        .request(
            "GET",
            &format!("/api/sites/{site_id}/quota/check?estimated_bytes={remaining}"),
            None,
            Some(&admin),
        )
        .await;
    assert_eq!(check.body["can_proceed"], true, "{:?}", check.body);

    // One byte more fails and names the bound.
    let check = app
        .request(
            "GET",
            &format!(
                "/api/sites/{site_id}/quota/check?estimated_bytes={}",
                remaining + 1
            ),
            None,
            Some(&admin),
        )
        .await;
    assert_eq!(check.body["can_proceed"], false);
    assert_eq!(check.body["exceeded"], "site");
    assert_eq!(check.body["warning"], "would exceed site quota");
}

#[tokio::test]
async fn preflight_over_quota_site_is_denied() {
    let Some(app) = TestApp::new().await else {
        return;
    };

    // The documented denial case: 19 GiB used of 20, 3 GiB estimate.
    let (node_id, _) = app.create_active_node("n3", 100 * GIB).await;
    let site_id = app.create_site(node_id, "s3", 20 * GIB).await;
    app.set_site_usage(site_id, 19 * GIB).await;
    app.set_node_usage(node_id, 19 * GIB).await;

    let admin = app.login_as("q3@test.com", UserRole::SuperAdmin).await;
    let check = app
        .request(
            "GET",
            &format!("/api/sites/{site_id}/quota/check?estimated_bytes={}", 3 * GIB),
            None,
            Some(&admin),
        )
        .await;
    assert_eq!(check.body["can_proceed"], false);
    assert_eq!(check.body["projected_site_used"], json!(22 * GIB));
    assert_eq!(check.body["warning"], "would exceed site quota");
}

#[tokio::test]
async fn site_quota_update_rejects_above_node_remainder() {
    let Some(app) = TestApp::new().await else {
        return;
    };

    let (node_id, _) = app.create_active_node("n4", 50 * GIB).await;
    let site_a = app.create_site(node_id, "s4a", 30 * GIB).await;
    let site_b = app.create_site(node_id, "s4b", 10 * GIB).await;
    let _ = site_a;

    let admin = app.login_as("q4@test.com", UserRole::SuperAdmin).await;

    // 30 GiB already granted to the sibling leaves 20 for site_b.
    let refused = app
        .request(
            "PUT",
            &format!("/api/sites/{site_b}/quota"),
            Some(json!({"quota_bytes": 21 * GIB})),
            Some(&admin),
        )
        .await;
    assert_eq!(refused.status, StatusCode::BAD_REQUEST, "{:?}", refused.body);

    let accepted = app
        .request(
            "PUT",
            &format!("/api/sites/{site_b}/quota"),
            Some(json!({"quota_bytes": 20 * GIB})),
            Some(&admin),
        )
        .await;
    assert_eq!(accepted.status, StatusCode::OK, "{:?}", accepted.body);
}

#[tokio::test]
async fn post_flight_accounting_is_atomic_and_flags_quota() {
    let Some(app) = TestApp::new().await else {
        return;
    };

    let (node_id, _) = app.create_active_node("n5", 100 * GIB).await;
    let site_id = app.create_site(node_id, "s5", 10 * GIB).await;
    let provider_id = {
        let dir = tempfile::tempdir().unwrap();
        app.create_local_provider(dir.path().to_str().unwrap()).await
    };

    // A 12 GiB report breaches the 10 GiB site quota.
    let report = BackupReport {
        site_id,
        filename: "s5_20240601_030000.tar.zst".to_string(),
        size_bytes: 12 * GIB,
        object_path: format!("{node_id}/{site_id}/s5_20240601_030000.tar.zst"),
        provider_id,
    };
    let backup = app.state.quota.record_success(&report).await.unwrap();
    assert_eq!(backup.size_bytes, 12 * GIB);

    let (site_used, exceeded_at): (i64, Option<chrono::DateTime<chrono::Utc>>) =
        sqlx::query_as(
            "SELECT storage_used_bytes, quota_exceeded_at FROM sites WHERE id = $1",
        )
        .bind(site_id)
        .fetch_one(&app.db_pool)
        .await
        .unwrap();
    assert_eq!(site_used, 12 * GIB);
    assert!(exceeded_at.is_some(), "breach sets quota_exceeded_at");

    let node_used: i64 = sqlx::query_scalar("SELECT storage_used_bytes FROM nodes WHERE id = $1")
        .bind(node_id)
        .fetch_one(&app.db_pool)
        .await
        .unwrap();
    assert_eq!(node_used, 12 * GIB);
}

#[tokio::test]
async fn node_reports_are_rejected_for_foreign_sites() {
    let Some(app) = TestApp::new().await else {
        return;
    };

    let (_node_a, key_a) = app.create_active_node("n6a", 100 * GIB).await;
    let (node_b, _) = app.create_active_node("n6b", 100 * GIB).await;
    let foreign_site = app.create_site(node_b, "s6", 10 * GIB).await;

    let refused = app
        .node_request(
            "GET",
            &format!("/api/daemon/quota/check/{foreign_site}"),
            None,
            &key_a,
        )
        .await;
    assert_eq!(refused.status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn unknown_site_is_404() {
    let Some(app) = TestApp::new().await else {
        return;
    };
    let admin = app.login_as("q7@test.com", UserRole::SuperAdmin).await;
    let missing = SiteId::new();
    let check = app
        .request(
            "GET",
            &format!("/api/sites/{missing}/quota/check"),
            None,
            Some(&admin),
        )
        .await;
    assert_eq!(check.status, StatusCode::NOT_FOUND);
}
