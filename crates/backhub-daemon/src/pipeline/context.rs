//! Per-job context threaded through all stages.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio_util::sync::CancellationToken;

use backhub_core::types::id::{JobId, SiteId};
use backhub_entity::site::Site;

/// Byte counters a running stage feeds and the progress ticker drains.
///
/// The atomics are shared: the ticker task holds handles while the
/// stage loop owns the context.
#[derive(Debug, Default)]
pub struct LiveCounters {
    bytes_processed: Arc<AtomicU64>,
    bytes_total: Arc<AtomicU64>,
}

impl LiveCounters {
    /// Shared handle to the processed counter.
    pub fn bytes_processed_handle(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.bytes_processed)
    }

    /// Shared handle to the total counter.
    pub fn bytes_total_handle(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.bytes_total)
    }

    /// Reset both counters at a stage boundary.
    pub fn reset(&self, total: u64) {
        self.bytes_processed.store(0, Ordering::Relaxed);
        self.bytes_total.store(total, Ordering::Relaxed);
    }

    /// Record progress.
    pub fn set(&self, processed: u64) {
        self.bytes_processed.store(processed, Ordering::Relaxed);
    }

    /// Add to the processed counter.
    pub fn add(&self, bytes: u64) {
        self.bytes_processed.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Current (processed, total) pair.
    pub fn read(&self) -> (u64, u64) {
        (
            self.bytes_processed.load(Ordering::Relaxed),
            self.bytes_total.load(Ordering::Relaxed),
        )
    }

    /// Fraction of the stage done, in [0, 1].
    pub fn fraction(&self) -> f64 {
        let (processed, total) = self.read();
        if total == 0 {
            0.0
        } else {
            (processed as f64 / total as f64).min(1.0)
        }
    }
}

/// Shared state one backup job carries through its stages.
///
/// Stages write only inside the temp directory or the object store, and
/// hand values to later stages through the scratchpad.
#[derive(Debug)]
pub struct JobContext {
    /// Unique id of this run.
    pub job_id: JobId,
    /// Site id; appears in the object-store key.
    pub site_id: SiteId,
    /// The full site record at job start.
    pub site: Site,
    /// Epoch issued by the master's progress store.
    pub epoch: i64,
    /// Per-job temp directory under the daemon's work root.
    pub temp_dir: PathBuf,
    /// Bundle path once created.
    pub archive_path: Option<PathBuf>,
    /// Bundle file name once created.
    pub archive_name: Option<String>,
    /// Object-store key once uploaded.
    pub object_path: Option<String>,
    /// Key/value scratchpad for cross-stage values.
    pub scratch: HashMap<String, serde_json::Value>,
    /// Cooperative cancellation for this job.
    pub cancel: CancellationToken,
    /// Byte counters for the current stage.
    pub counters: LiveCounters,
}

impl JobContext {
    /// Build the context for a fresh job.
    pub fn new(site: Site, epoch: i64, work_root: &std::path::Path) -> Self {
        let job_id = JobId::new();
        let temp_dir = work_root.join(format!("backup_{}_{}", site.id, job_id));
        Self {
            job_id,
            site_id: site.id,
            site,
            epoch,
            temp_dir,
            archive_path: None,
            archive_name: None,
            object_path: None,
            scratch: HashMap::new(),
            cancel: CancellationToken::new(),
            counters: LiveCounters::default(),
        }
    }

    /// Error out early when cancellation has been requested.
    pub fn checkpoint(&self) -> backhub_core::result::AppResult<()> {
        if self.cancel.is_cancelled() {
            Err(backhub_core::error::AppError::cancelled(
                "Backup cancelled",
            ))
        } else {
            Ok(())
        }
    }
}
