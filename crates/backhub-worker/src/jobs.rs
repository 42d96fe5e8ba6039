//! Periodic job bodies.

use std::sync::Arc;

use tracing::{error, info};

use backhub_database::repositories::progress::ProgressRepository;
use backhub_progress::ProgressStore;
use backhub_service::reconcile::ReconciliationService;
use backhub_service::retention::RetentionService;

/// Delete every backup whose scheduled deletion has come due.
pub async fn run_deletion_sweep(retention: Arc<RetentionService>) {
    match retention.run_sweep().await {
        Ok(report) if !report.deleted.is_empty() || !report.retried.is_empty() => {
            info!(
                deleted = report.deleted.len(),
                retried = report.retried.len(),
                freed_bytes = report.freed_bytes,
                "Scheduled-deletion sweep finished"
            );
        }
        Ok(_) => {}
        Err(e) => error!(error = %e, "Scheduled-deletion sweep failed"),
    }
}

/// Nightly drift reconciliation against the object store.
pub async fn run_reconciliation(reconcile: Arc<ReconciliationService>) {
    match reconcile.run(false).await {
        Ok(report) => {
            if report.sites_with_drift > 0 {
                info!(
                    sites = report.sites_checked,
                    drifted = report.sites_with_drift,
                    drift_bytes = report.total_drift_bytes,
                    "Reconciliation repaired drift"
                );
            }
        }
        Err(e) => error!(error = %e, "Reconciliation failed"),
    }
}

/// Fail RUNNING progress rows whose pipeline stopped reporting.
pub async fn run_stale_sweep(
    progress_repo: Arc<ProgressRepository>,
    store: Arc<ProgressStore>,
    grace_minutes: i64,
) {
    let stale = match progress_repo.find_stale_running(grace_minutes).await {
        Ok(rows) => rows,
        Err(e) => {
            error!(error = %e, "Stale-progress query failed");
            return;
        }
    };

    for row in stale {
        match store.force_fail(row.site_id, "abandoned").await {
            Ok(true) => info!(site_id = %row.site_id, "Abandoned RUNNING row failed"),
            Ok(false) => {}
            Err(e) => error!(site_id = %row.site_id, error = %e, "Failed to fail stale row"),
        }
    }
}
