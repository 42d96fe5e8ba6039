//! Drift reconciliation between the database and the object store.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use backhub_core::error::AppError;
use backhub_core::result::AppResult;
use backhub_core::types::id::{BackupId, NodeId, SiteId};
use backhub_database::repositories::accounting::AccountingRepository;
use backhub_database::repositories::backup::BackupRepository;
use backhub_database::repositories::node::NodeRepository;
use backhub_database::repositories::site::SiteRepository;
use backhub_database::repositories::storage::StorageProviderRepository;
use backhub_storage::ObjectStore;

use crate::settings::SettingsService;
use crate::storage_access::StorageAccess;

/// Drift report for one site.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteDrift {
    /// The site.
    pub site_id: SiteId,
    /// Site name at reconciliation time.
    pub site_name: String,
    /// Prefix that was listed.
    pub prefix: String,
    /// Usage the database believed before reconciliation.
    pub db_bytes: i64,
    /// Bytes actually present under the prefix.
    pub actual_bytes: i64,
    /// actual - db.
    pub drift_bytes: i64,
    /// Whether counters were rewritten.
    pub corrected: bool,
    /// Success rows whose object is gone, marked FAILED.
    pub lost_backups: Vec<BackupId>,
    /// Objects with no matching row. Reported, never auto-deleted.
    pub orphan_objects: Vec<String>,
}

/// Full reconciliation report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileReport {
    /// Whether this run mutated anything.
    pub dry_run: bool,
    /// When the run finished.
    pub finished_at: chrono::DateTime<chrono::Utc>,
    /// Sites examined.
    pub sites_checked: usize,
    /// Sites with non-zero drift.
    pub sites_with_drift: usize,
    /// Sum of absolute drift across sites.
    pub total_drift_bytes: i64,
    /// Per-site details.
    pub sites: Vec<SiteDrift>,
    /// Sites that could not be checked.
    pub errors: Vec<String>,
}

/// Compares recorded usage against the object store and repairs drift.
#[derive(Debug, Clone)]
pub struct ReconciliationService {
    node_repo: Arc<NodeRepository>,
    site_repo: Arc<SiteRepository>,
    backup_repo: Arc<BackupRepository>,
    provider_repo: Arc<StorageProviderRepository>,
    accounting: Arc<AccountingRepository>,
    settings: Arc<SettingsService>,
    storage: Arc<StorageAccess>,
}

impl ReconciliationService {
    /// Create the reconciliation service.
    pub fn new(
        node_repo: Arc<NodeRepository>,
        site_repo: Arc<SiteRepository>,
        backup_repo: Arc<BackupRepository>,
        provider_repo: Arc<StorageProviderRepository>,
        accounting: Arc<AccountingRepository>,
        settings: Arc<SettingsService>,
        storage: Arc<StorageAccess>,
    ) -> Self {
        Self {
            node_repo,
            site_repo,
            backup_repo,
            provider_repo,
            accounting,
            settings,
            storage,
        }
    }

    /// Reconcile every site against the default provider.
    ///
    /// With `dry_run` the report is produced and nothing is mutated.
    pub async fn run(&self, dry_run: bool) -> AppResult<ReconcileReport> {
        let provider = self
            .provider_repo
            .find_default()
            .await?
            .ok_or_else(|| AppError::not_found("No active default storage provider"))?;
        let store = self.storage.open(&provider).await?;
        let threshold = self.settings.reconcile_drift_threshold().await;

        let mut report = ReconcileReport {
            dry_run,
            finished_at: Utc::now(),
            sites_checked: 0,
            sites_with_drift: 0,
            total_drift_bytes: 0,
            sites: Vec::new(),
            errors: Vec::new(),
        };

        let mut node_totals: HashMap<NodeId, i64> = HashMap::new();
        let mut provider_total: i64 = 0;

        for site in self.site_repo.find_all().await? {
            match self
                .reconcile_site(&*store, site.id, site.node_id, &site.name, threshold, dry_run)
                .await
            {
                Ok(drift) => {
                    report.sites_checked += 1;
                    if drift.drift_bytes != 0 {
                        report.sites_with_drift += 1;
                        report.total_drift_bytes += drift.drift_bytes.abs();
                    }
                    // Node and provider counters roll up the per-site
                    // values accounting finally settled on, so the
                    // node = Σ sites invariant holds even for sites
                    // whose drift stayed under the threshold.
                    let settled = self
                        .site_repo
                        .find_by_id(site.id)
                        .await?
                        .map(|s| s.storage_used_bytes)
                        .unwrap_or(drift.actual_bytes);
                    *node_totals.entry(site.node_id).or_default() += settled;
                    provider_total += settled;
                    report.sites.push(drift);
                }
                Err(e) => {
                    warn!(site_id = %site.id, error = %e, "Site reconciliation failed");
                    report.errors.push(format!("site {}: {e}", site.id));
                }
            }
        }

        // Node counters are recomputed from the per-site store totals,
        // provider counters from the grand total.
        if !dry_run {
            for (node_id, total) in &node_totals {
                self.node_repo.set_used_bytes(*node_id, *total).await?;
            }
            self.provider_repo
                .set_used_bytes(provider.id, provider_total)
                .await?;
        }

        report.finished_at = Utc::now();
        info!(
            dry_run,
            sites = report.sites_checked,
            drifted = report.sites_with_drift,
            drift_bytes = report.total_drift_bytes,
            "Reconciliation finished"
        );
        Ok(report)
    }

    /// Reconcile one site prefix.
    async fn reconcile_site(
        &self,
        store: &dyn ObjectStore,
        site_id: SiteId,
        node_id: NodeId,
        site_name: &str,
        threshold: f64,
        dry_run: bool,
    ) -> AppResult<SiteDrift> {
        let prefix = format!("{}/{}/", node_id, site_id);

        // Usage as recorded before any repair; drift is reported against
        // this value.
        let db_bytes = self
            .site_repo
            .find_by_id(site_id)
            .await?
            .ok_or_else(|| AppError::not_found("Site vanished during reconciliation"))?
            .storage_used_bytes;

        let objects = store.list_prefix(&prefix).await?;
        let object_sizes: HashMap<&str, i64> = objects
            .iter()
            .map(|o| (o.key.as_str(), o.size_bytes))
            .collect();
        let actual_bytes: i64 = objects.iter().map(|o| o.size_bytes).sum();

        let rows = self.backup_repo.find_success_oldest_first(site_id).await?;
        let mut known_paths: Vec<&str> = Vec::with_capacity(rows.len());
        let mut lost = Vec::new();

        // Rows with no object: integrity violation, excluded from
        // accounting unless this is a dry run.
        for row in &rows {
            match row.object_path.as_deref() {
                Some(path) if object_sizes.contains_key(path) => known_paths.push(path),
                Some(path) => {
                    lost.push(row.id);
                    if !dry_run {
                        self.accounting
                            .exclude_lost(row, "Object missing from store")
                            .await?;
                    }
                    warn!(backup_id = %row.id, path, "Backup object missing from store");
                }
                None => {
                    lost.push(row.id);
                    if !dry_run {
                        self.accounting
                            .exclude_lost(row, "Success record has no object path")
                            .await?;
                    }
                }
            }
        }

        // Objects with no row: recorded, never auto-deleted.
        let orphans: Vec<String> = objects
            .iter()
            .filter(|o| !known_paths.contains(&o.key.as_str()))
            .map(|o| o.key.clone())
            .collect();
        if !orphans.is_empty() {
            warn!(site_id = %site_id, count = orphans.len(), "Orphan objects under site prefix");
        }

        let drift = actual_bytes - db_bytes;

        // Usage after lost-row exclusion; the rewrite decision compares
        // the store against what accounting now believes.
        let remaining_bytes = self
            .site_repo
            .find_by_id(site_id)
            .await?
            .map(|s| s.storage_used_bytes)
            .unwrap_or(db_bytes);
        let residual = actual_bytes - remaining_bytes;

        // Rewrite counters only when drift exceeds the threshold share of
        // recorded usage (any drift counts when nothing is recorded).
        let relative = if remaining_bytes > 0 {
            residual.unsigned_abs() as f64 / remaining_bytes as f64
        } else if residual != 0 {
            1.0
        } else {
            0.0
        };
        let corrected = !dry_run && relative > threshold;
        if corrected {
            self.site_repo.set_used_bytes(site_id, actual_bytes).await?;
            info!(
                site_id = %site_id,
                db_bytes,
                actual_bytes,
                "Corrected site usage from store"
            );
        }

        Ok(SiteDrift {
            site_id,
            site_name: site_name.to_string(),
            prefix,
            db_bytes,
            actual_bytes,
            drift_bytes: drift,
            corrected,
            lost_backups: lost,
            orphan_objects: orphans,
        })
    }
}
