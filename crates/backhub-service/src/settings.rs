//! Tiered settings resolution.

use std::sync::Arc;

use backhub_core::config::QuotaConfig;
use backhub_core::types::id::{NodeId, SiteId};
use backhub_database::repositories::setting::SettingRepository;
use backhub_entity::setting::keys;

/// Resolves configurable values through the scope chain
/// site > node > global, falling back to the static configuration when a
/// key is unset at every level.
#[derive(Debug, Clone)]
pub struct SettingsService {
    repo: Arc<SettingRepository>,
    defaults: QuotaConfig,
}

impl SettingsService {
    /// Create the settings service.
    pub fn new(repo: Arc<SettingRepository>, defaults: QuotaConfig) -> Self {
        Self { repo, defaults }
    }

    /// Days between a retention mark and actual deletion.
    pub async fn retention_grace_days(
        &self,
        node_id: Option<NodeId>,
        site_id: Option<SiteId>,
    ) -> i64 {
        match self
            .repo
            .resolve(keys::RETENTION_GRACE_DAYS, node_id, site_id)
            .await
        {
            Ok(Some(value)) => value.as_i64().unwrap_or(self.defaults.retention_grace_days),
            _ => self.defaults.retention_grace_days,
        }
    }

    /// Relative drift above which reconciliation rewrites usage counters.
    pub async fn reconcile_drift_threshold(&self) -> f64 {
        match self
            .repo
            .resolve(keys::RECONCILE_DRIFT_THRESHOLD, None, None)
            .await
        {
            Ok(Some(value)) => value
                .as_f64()
                .unwrap_or(self.defaults.reconcile_drift_threshold),
            _ => self.defaults.reconcile_drift_threshold,
        }
    }
}
