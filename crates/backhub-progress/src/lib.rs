//! Per-site live backup progress with epoch fencing and fan-out.
//!
//! One [`ProgressRow`] per site, held in a `watch` channel: readers always
//! observe a complete snapshot, subscribers wake on every change, and the
//! producer writes once regardless of subscriber count.
//!
//! Every job start increments the site's epoch; writers carry the epoch
//! they were issued and the store drops anything older, so a zombie job
//! that outlived a reset can never clobber the row of a fresh one.
//!
//! Mutations are written through to the `backup_status` table so terminal
//! states survive master restarts.

use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::watch;
use tracing::{debug, warn};

use backhub_core::error::AppError;
use backhub_core::result::AppResult;
use backhub_core::types::id::SiteId;
use backhub_database::repositories::progress::ProgressRepository;
use backhub_entity::progress::{BackupState, ProgressOutcome, ProgressPatch, ProgressRow};

/// Bounds for the SSE publish interval, seconds.
pub const MIN_STREAM_INTERVAL_SECS: u64 = 1;
/// Upper bound for the SSE publish interval, seconds.
pub const MAX_STREAM_INTERVAL_SECS: u64 = 60;

/// Clamp a caller-provided stream interval into the supported range.
pub fn clamp_stream_interval(requested: u64) -> u64 {
    requested.clamp(MIN_STREAM_INTERVAL_SECS, MAX_STREAM_INTERVAL_SECS)
}

struct SiteEntry {
    tx: watch::Sender<ProgressRow>,
}

/// The progress store: one live row per site.
pub struct ProgressStore {
    sites: DashMap<SiteId, SiteEntry>,
    repo: Option<Arc<ProgressRepository>>,
}

impl std::fmt::Debug for ProgressStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressStore")
            .field("sites", &self.sites.len())
            .finish()
    }
}

impl ProgressStore {
    /// Create a store with database write-through.
    pub fn new(repo: Arc<ProgressRepository>) -> Self {
        Self {
            sites: DashMap::new(),
            repo: Some(repo),
        }
    }

    /// Create a memory-only store (tests, embedded pipelines).
    pub fn in_memory() -> Self {
        Self {
            sites: DashMap::new(),
            repo: None,
        }
    }

    /// Load persisted rows on boot.
    pub fn hydrate(&self, rows: Vec<ProgressRow>) {
        for row in rows {
            let site_id = row.site_id;
            self.sites.insert(
                site_id,
                SiteEntry {
                    tx: watch::channel(row).0,
                },
            );
        }
        debug!(sites = self.sites.len(), "Progress store hydrated");
    }

    fn entry(&self, site_id: SiteId) -> dashmap::mapref::one::Ref<'_, SiteId, SiteEntry> {
        self.sites
            .entry(site_id)
            .or_insert_with(|| SiteEntry {
                tx: watch::channel(ProgressRow::idle(site_id)).0,
            })
            .downgrade()
    }

    async fn persist(&self, site_id: SiteId) {
        if let Some(repo) = &self.repo {
            let row = self.snapshot(site_id);
            if let Err(e) = repo.upsert(&row).await {
                warn!(site_id = %site_id, error = %e, "Failed to persist progress row");
            }
        }
    }

    /// Read the current row as one consistent snapshot.
    pub fn snapshot(&self, site_id: SiteId) -> ProgressRow {
        self.entry(site_id).tx.borrow().clone()
    }

    /// Subscribe to row changes. The receiver holds the current snapshot
    /// immediately; fan-out is O(subscribers) per write.
    pub fn subscribe(&self, site_id: SiteId) -> watch::Receiver<ProgressRow> {
        self.entry(site_id).tx.subscribe()
    }

    /// Start a new job: reject while RUNNING, otherwise reset the row
    /// atomically under an incremented epoch and return that epoch.
    pub async fn begin(&self, site_id: SiteId) -> AppResult<i64> {
        let mut new_epoch = 0;
        let mut conflict = false;

        self.entry(site_id).tx.send_if_modified(|row| {
            if row.state == BackupState::Running {
                conflict = true;
                return false;
            }
            new_epoch = row.epoch + 1;
            *row = ProgressRow {
                site_id,
                epoch: new_epoch,
                state: BackupState::Running,
                progress_percent: 0,
                stage: None,
                message: Some("Backup starting".to_string()),
                bytes_processed: 0,
                bytes_total: 0,
                error: None,
                stop_requested: false,
                started_at: Some(Utc::now()),
                updated_at: Utc::now(),
            };
            true
        });

        if conflict {
            return Err(AppError::conflict("A backup is already running for this site"));
        }

        self.persist(site_id).await;
        Ok(new_epoch)
    }

    /// Apply a progress patch. Writes from a stale epoch are dropped and
    /// reported as `Ok(false)`.
    pub async fn update(
        &self,
        site_id: SiteId,
        epoch: i64,
        patch: ProgressPatch,
    ) -> AppResult<bool> {
        let mut applied = false;

        self.entry(site_id).tx.send_if_modified(|row| {
            if row.epoch != epoch || row.state != BackupState::Running {
                return false;
            }
            if let Some(p) = patch.progress_percent {
                row.progress_percent = p.clamp(0, 100);
            }
            if let Some(stage) = &patch.stage {
                row.stage = Some(stage.clone());
            }
            if let Some(message) = &patch.message {
                row.message = Some(message.clone());
            }
            if let Some(bytes) = patch.bytes_processed {
                row.bytes_processed = bytes;
            }
            if let Some(total) = patch.bytes_total {
                row.bytes_total = total;
            }
            row.updated_at = Utc::now();
            applied = true;
            true
        });

        if applied {
            self.persist(site_id).await;
        } else {
            debug!(site_id = %site_id, epoch, "Dropped stale progress write");
        }
        Ok(applied)
    }

    /// Drive the row to a terminal state. Stale epochs are dropped.
    pub async fn finish(
        &self,
        site_id: SiteId,
        epoch: i64,
        outcome: ProgressOutcome,
    ) -> AppResult<bool> {
        if !outcome.state.is_terminal() {
            return Err(AppError::validation("finish requires a terminal state"));
        }

        let mut applied = false;
        self.entry(site_id).tx.send_if_modified(|row| {
            if row.epoch != epoch || row.state != BackupState::Running {
                return false;
            }
            row.state = outcome.state;
            if outcome.state == BackupState::Completed {
                row.progress_percent = 100;
            }
            row.message = outcome.message.clone().or_else(|| row.message.take());
            row.error = outcome.error.clone();
            row.updated_at = Utc::now();
            applied = true;
            true
        });

        if applied {
            self.persist(site_id).await;
        }
        Ok(applied)
    }

    /// Raise the cooperative cancellation flag. Idempotent; returns the
    /// row so callers can see whether anything was running.
    pub async fn request_stop(&self, site_id: SiteId) -> AppResult<ProgressRow> {
        let mut changed = false;
        self.entry(site_id).tx.send_if_modified(|row| {
            if row.state == BackupState::Running && !row.stop_requested {
                row.stop_requested = true;
                row.updated_at = Utc::now();
                changed = true;
                true
            } else {
                false
            }
        });

        if changed {
            self.persist(site_id).await;
        }
        Ok(self.snapshot(site_id))
    }

    /// Force a stuck RUNNING row back to IDLE, bumping the epoch so any
    /// writer that still holds the old epoch is fenced out.
    ///
    /// Refused while the row is healthy-running unless `force` is set;
    /// the reset endpoint passes `force` only after confirming the engine
    /// holds no live job for the site.
    pub async fn reset(&self, site_id: SiteId, force: bool) -> AppResult<ProgressRow> {
        let mut refused = false;
        self.entry(site_id).tx.send_if_modified(|row| {
            if row.state == BackupState::Running && !force {
                refused = true;
                return false;
            }
            let epoch = row.epoch + 1;
            *row = ProgressRow::idle(site_id);
            row.epoch = epoch;
            true
        });

        if refused {
            return Err(AppError::conflict(
                "A backup is running; reset requires force",
            ));
        }
        self.persist(site_id).await;
        Ok(self.snapshot(site_id))
    }

    /// Fail an abandoned RUNNING row regardless of writer epoch.
    pub async fn force_fail(&self, site_id: SiteId, error: &str) -> AppResult<bool> {
        let mut applied = false;
        self.entry(site_id).tx.send_if_modified(|row| {
            if row.state != BackupState::Running {
                return false;
            }
            row.state = BackupState::Failed;
            row.error = Some(error.to_string());
            row.message = Some("Backup abandoned".to_string());
            row.updated_at = Utc::now();
            applied = true;
            true
        });

        if applied {
            self.persist(site_id).await;
        }
        Ok(applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> ProgressStore {
        ProgressStore::in_memory()
    }

    #[tokio::test]
    async fn begin_rejects_while_running() {
        let store = store();
        let site = SiteId::new();
        let epoch = store.begin(site).await.unwrap();
        assert_eq!(epoch, 1);

        let err = store.begin(site).await.unwrap_err();
        assert_eq!(err.kind, backhub_core::error::ErrorKind::Conflict);
        // Row unchanged by the rejected start.
        assert_eq!(store.snapshot(site).epoch, 1);
    }

    #[tokio::test]
    async fn start_after_terminal_resets_atomically() {
        let store = store();
        let site = SiteId::new();
        let epoch = store.begin(site).await.unwrap();
        store
            .finish(
                site,
                epoch,
                ProgressOutcome {
                    state: BackupState::Failed,
                    message: None,
                    error: Some("boom".to_string()),
                },
            )
            .await
            .unwrap();

        let epoch2 = store.begin(site).await.unwrap();
        assert_eq!(epoch2, 2);
        let row = store.snapshot(site);
        assert_eq!(row.state, BackupState::Running);
        assert_eq!(row.progress_percent, 0);
        assert!(row.error.is_none());
        assert!(!row.stop_requested);
    }

    #[tokio::test]
    async fn stale_epoch_writes_are_dropped() {
        let store = store();
        let site = SiteId::new();
        let old_epoch = store.begin(site).await.unwrap();
        store.reset(site, true).await.unwrap();
        let new_epoch = store.begin(site).await.unwrap();
        assert!(new_epoch > old_epoch);

        // Zombie writer with the old epoch.
        let applied = store
            .update(
                site,
                old_epoch,
                ProgressPatch {
                    progress_percent: Some(99),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(!applied);
        assert_eq!(store.snapshot(site).progress_percent, 0);

        // Current writer still lands.
        let applied = store
            .update(
                site,
                new_epoch,
                ProgressPatch {
                    progress_percent: Some(40),
                    stage: Some("create_bundle".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(applied);
        let row = store.snapshot(site);
        assert_eq!(row.progress_percent, 40);
        assert_eq!(row.stage.as_deref(), Some("create_bundle"));
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let store = store();
        let site = SiteId::new();
        store.begin(site).await.unwrap();

        let row = store.request_stop(site).await.unwrap();
        assert!(row.stop_requested);
        let row = store.request_stop(site).await.unwrap();
        assert!(row.stop_requested);
    }

    #[tokio::test]
    async fn reset_refuses_running_without_force() {
        let store = store();
        let site = SiteId::new();
        store.begin(site).await.unwrap();

        assert!(store.reset(site, false).await.is_err());
        let row = store.reset(site, true).await.unwrap();
        assert_eq!(row.state, BackupState::Idle);
    }

    #[tokio::test]
    async fn subscribers_see_updates() {
        let store = store();
        let site = SiteId::new();
        let mut rx = store.subscribe(site);
        assert_eq!(rx.borrow().state, BackupState::Idle);

        let epoch = store.begin(site).await.unwrap();
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().state, BackupState::Running);

        store
            .update(
                site,
                epoch,
                ProgressPatch {
                    progress_percent: Some(20),
                    stage: Some("backup_db".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().progress_percent, 20);
    }

    #[tokio::test]
    async fn progress_clamps_to_percent_range() {
        let store = store();
        let site = SiteId::new();
        let epoch = store.begin(site).await.unwrap();
        store
            .update(
                site,
                epoch,
                ProgressPatch {
                    progress_percent: Some(127),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(store.snapshot(site).progress_percent, 100);
    }

    #[test]
    fn interval_clamping() {
        assert_eq!(clamp_stream_interval(0), 1);
        assert_eq!(clamp_stream_interval(5), 5);
        assert_eq!(clamp_stream_interval(600), 60);
    }
}
