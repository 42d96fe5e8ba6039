//! Retention marking, the deletion sweep, and reconciliation.

use chrono::{Duration, Utc};
use http::StatusCode;
use serde_json::json;

use backhub_core::types::id::{NodeId, ProviderId, SiteId};
use backhub_entity::backup::BackupReport;
use backhub_entity::user::UserRole;

use crate::helpers::TestApp;

const GIB: i64 = 1024 * 1024 * 1024;

/// Record a successful backup and drop a matching blob into the local
/// provider's tree.
async fn seed_backup(
    app: &TestApp,
    root: &std::path::Path,
    node_id: NodeId,
    site_id: SiteId,
    provider_id: ProviderId,
    filename: &str,
    size_bytes: i64,
) -> backhub_core::types::id::BackupId {
    let object_path = format!("{node_id}/{site_id}/{filename}");

    let blob = root.join("backups").join(&object_path);
    tokio::fs::create_dir_all(blob.parent().unwrap()).await.unwrap();
    tokio::fs::write(&blob, vec![0u8; 1024]).await.unwrap();

    let backup = app
        .state
        .quota
        .record_success(&BackupReport {
            site_id,
            filename: filename.to_string(),
            size_bytes,
            object_path,
            provider_id,
        })
        .await
        .unwrap();
    backup.id
}

#[tokio::test]
async fn fifth_backup_marks_two_oldest_for_deletion() {
    let Some(app) = TestApp::new().await else {
        return;
    };
    let dir = tempfile::tempdir().unwrap();

    let (node_id, _) = app.create_active_node("r1", 100 * GIB).await;
    let site_id = app.create_site(node_id, "rs1", 50 * GIB).await;
    let provider_id = app
        .create_local_provider(dir.path().to_str().unwrap())
        .await;

    // retention_copies defaults to 5; tighten to 2 for the scenario.
    sqlx::query("UPDATE sites SET retention_copies = 2 WHERE id = $1")
        .bind(site_id)
        .execute(&app.db_pool)
        .await
        .unwrap();

    for n in 1..=5 {
        seed_backup(
            &app,
            dir.path(),
            node_id,
            site_id,
            provider_id,
            &format!("rs1_2024060{n}_030000.tar.zst"),
            GIB,
        )
        .await;
    }

    // The three oldest are now marked (5 kept - 2 retained = 3 excess).
    let marked: Vec<(String, Option<chrono::DateTime<Utc>>)> = sqlx::query_as(
        "SELECT filename, scheduled_deletion FROM backups \
         WHERE site_id = $1 ORDER BY created_at ASC",
    )
    .bind(site_id)
    .fetch_all(&app.db_pool)
    .await
    .unwrap();

    assert_eq!(marked.len(), 5);
    assert!(marked[0].1.is_some());
    assert!(marked[1].1.is_some());
    assert!(marked[2].1.is_some());
    assert!(marked[3].1.is_none());
    assert!(marked[4].1.is_none());

    // Grace defaults to 7 days.
    let deadline = marked[0].1.unwrap();
    let days = (deadline - Utc::now()).num_days();
    assert!((6..=7).contains(&days), "grace was {days} days");
}

#[tokio::test]
async fn cancelling_scheduled_deletion_restores_the_backup() {
    let Some(app) = TestApp::new().await else {
        return;
    };
    let dir = tempfile::tempdir().unwrap();

    let (node_id, _) = app.create_active_node("r2", 100 * GIB).await;
    let site_id = app.create_site(node_id, "rs2", 50 * GIB).await;
    let provider_id = app
        .create_local_provider(dir.path().to_str().unwrap())
        .await;

    let backup_id = seed_backup(
        &app,
        dir.path(),
        node_id,
        site_id,
        provider_id,
        "rs2_20240601_030000.tar.zst",
        GIB,
    )
    .await;

    sqlx::query("UPDATE backups SET scheduled_deletion = NOW() + INTERVAL '7 days' WHERE id = $1")
        .bind(backup_id)
        .execute(&app.db_pool)
        .await
        .unwrap();

    let admin = app.login_as("r2@test.com", UserRole::SuperAdmin).await;
    let cancel = app
        .request(
            "DELETE",
            &format!("/api/backups/{backup_id}/cancel-deletion"),
            None,
            Some(&admin),
        )
        .await;
    assert_eq!(cancel.status, StatusCode::OK, "{:?}", cancel.body);

    let scheduled: Option<chrono::DateTime<Utc>> =
        sqlx::query_scalar("SELECT scheduled_deletion FROM backups WHERE id = $1")
            .bind(backup_id)
            .fetch_one(&app.db_pool)
            .await
            .unwrap();
    assert!(scheduled.is_none());

    // Cancelling again is a no-op, not an error.
    let again = app
        .request(
            "DELETE",
            &format!("/api/backups/{backup_id}/cancel-deletion"),
            None,
            Some(&admin),
        )
        .await;
    assert_eq!(again.status, StatusCode::OK);
}

#[tokio::test]
async fn deletion_sweep_removes_blob_row_and_accounting() {
    let Some(app) = TestApp::new().await else {
        return;
    };
    let dir = tempfile::tempdir().unwrap();

    let (node_id, _) = app.create_active_node("r3", 100 * GIB).await;
    let site_id = app.create_site(node_id, "rs3", 50 * GIB).await;
    let provider_id = app
        .create_local_provider(dir.path().to_str().unwrap())
        .await;

    let backup_id = seed_backup(
        &app,
        dir.path(),
        node_id,
        site_id,
        provider_id,
        "rs3_20240601_030000.tar.zst",
        2 * GIB,
    )
    .await;

    // Deadline already passed.
    sqlx::query("UPDATE backups SET scheduled_deletion = $2 WHERE id = $1")
        .bind(backup_id)
        .bind(Utc::now() - Duration::days(1))
        .execute(&app.db_pool)
        .await
        .unwrap();

    let report = app.state.retention.run_sweep().await.unwrap();
    assert_eq!(report.deleted.len(), 1);
    assert_eq!(report.freed_bytes, 2 * GIB);

    // Blob is gone.
    let blob = dir
        .path()
        .join("backups")
        .join(format!("{node_id}/{site_id}/rs3_20240601_030000.tar.zst"));
    assert!(!blob.exists());

    // Row is excluded from accounting and listings.
    let (status, object_path): (String, Option<String>) =
        sqlx::query_as("SELECT status::text, object_path FROM backups WHERE id = $1")
            .bind(backup_id)
            .fetch_one(&app.db_pool)
            .await
            .unwrap();
    assert_eq!(status, "deleted");
    assert!(object_path.is_none());

    let site_used: i64 = sqlx::query_scalar("SELECT storage_used_bytes FROM sites WHERE id = $1")
        .bind(site_id)
        .fetch_one(&app.db_pool)
        .await
        .unwrap();
    assert_eq!(site_used, 0);
}

#[tokio::test]
async fn reconcile_dry_run_reports_without_mutation() {
    let Some(app) = TestApp::new().await else {
        return;
    };
    let dir = tempfile::tempdir().unwrap();

    let (node_id, _) = app.create_active_node("r4", 100 * GIB).await;
    let site_id = app.create_site(node_id, "rs4", 50 * GIB).await;
    let provider_id = app
        .create_local_provider(dir.path().to_str().unwrap())
        .await;

    // One healthy backup, one whose blob vanished out of band.
    seed_backup(
        &app,
        dir.path(),
        node_id,
        site_id,
        provider_id,
        "rs4_20240601_030000.tar.zst",
        GIB,
    )
    .await;
    let lost_id = seed_backup(
        &app,
        dir.path(),
        node_id,
        site_id,
        provider_id,
        "rs4_20240602_030000.tar.zst",
        GIB,
    )
    .await;
    let lost_blob = dir
        .path()
        .join("backups")
        .join(format!("{node_id}/{site_id}/rs4_20240602_030000.tar.zst"));
    tokio::fs::remove_file(&lost_blob).await.unwrap();

    let admin = app.login_as("r4@test.com", UserRole::SuperAdmin).await;
    let dry = app
        .request(
            "POST",
            "/api/storage/reconcile?dry_run=true",
            Some(json!({})),
            Some(&admin),
        )
        .await;
    assert_eq!(dry.status, StatusCode::OK, "{:?}", dry.body);
    assert_eq!(dry.body["dry_run"], true);
    assert_eq!(dry.body["sites_with_drift"], 1);

    // Nothing moved: the lost row still reads success, usage unchanged.
    let status: String = sqlx::query_scalar("SELECT status::text FROM backups WHERE id = $1")
        .bind(lost_id)
        .fetch_one(&app.db_pool)
        .await
        .unwrap();
    assert_eq!(status, "success");

    let site_used: i64 = sqlx::query_scalar("SELECT storage_used_bytes FROM sites WHERE id = $1")
        .bind(site_id)
        .fetch_one(&app.db_pool)
        .await
        .unwrap();
    assert_eq!(site_used, 2 * GIB);
}

#[tokio::test]
async fn reconcile_repairs_lost_rows_and_usage() {
    let Some(app) = TestApp::new().await else {
        return;
    };
    let dir = tempfile::tempdir().unwrap();

    let (node_id, _) = app.create_active_node("r5", 100 * GIB).await;
    let site_id = app.create_site(node_id, "rs5", 50 * GIB).await;
    let provider_id = app
        .create_local_provider(dir.path().to_str().unwrap())
        .await;

    // Three backups summing 9 GiB in the database; one blob deleted out
    // of band. The local blobs are 1 KiB each, so usage is recomputed
    // from the store afterwards.
    for n in 1..=3 {
        seed_backup(
            &app,
            dir.path(),
            node_id,
            site_id,
            provider_id,
            &format!("rs5_2024060{n}_030000.tar.zst"),
            3 * GIB,
        )
        .await;
    }
    let lost_blob = dir
        .path()
        .join("backups")
        .join(format!("{node_id}/{site_id}/rs5_20240602_030000.tar.zst"));
    tokio::fs::remove_file(&lost_blob).await.unwrap();

    let report = app.state.reconcile.run(false).await.unwrap();
    assert_eq!(report.sites_checked, 1);
    assert_eq!(report.sites[0].lost_backups.len(), 1);

    // The lost row is failed and excluded from accounting.
    let failed: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM backups WHERE site_id = $1 AND status = 'failed'",
    )
    .bind(site_id)
    .fetch_one(&app.db_pool)
    .await
    .unwrap();
    assert_eq!(failed, 1);

    // Usage now reflects the store (two 1 KiB blobs).
    let site_used: i64 = sqlx::query_scalar("SELECT storage_used_bytes FROM sites WHERE id = $1")
        .bind(site_id)
        .fetch_one(&app.db_pool)
        .await
        .unwrap();
    assert_eq!(site_used, 2048);

    let node_used: i64 = sqlx::query_scalar("SELECT storage_used_bytes FROM nodes WHERE id = $1")
        .bind(node_id)
        .fetch_one(&app.db_pool)
        .await
        .unwrap();
    assert_eq!(node_used, 2048);
}
