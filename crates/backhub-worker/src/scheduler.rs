//! Cron scheduler for the master's periodic maintenance tasks.

use std::sync::Arc;

use tokio_cron_scheduler::{Job as CronJob, JobScheduler};
use tracing::info;

use backhub_core::config::WorkerConfig;
use backhub_core::error::AppError;
use backhub_database::repositories::progress::ProgressRepository;
use backhub_progress::ProgressStore;
use backhub_service::reconcile::ReconciliationService;
use backhub_service::retention::RetentionService;

use crate::jobs;

/// Cron-based scheduler for the deletion sweep, reconciliation, and the
/// stale-progress sweep.
pub struct MaintenanceScheduler {
    scheduler: JobScheduler,
    config: WorkerConfig,
    retention: Arc<RetentionService>,
    reconcile: Arc<ReconciliationService>,
    progress_repo: Arc<ProgressRepository>,
    progress_store: Arc<ProgressStore>,
}

impl std::fmt::Debug for MaintenanceScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MaintenanceScheduler").finish()
    }
}

impl MaintenanceScheduler {
    /// Create a new maintenance scheduler.
    pub async fn new(
        config: WorkerConfig,
        retention: Arc<RetentionService>,
        reconcile: Arc<ReconciliationService>,
        progress_repo: Arc<ProgressRepository>,
        progress_store: Arc<ProgressStore>,
    ) -> Result<Self, AppError> {
        let scheduler = JobScheduler::new()
            .await
            .map_err(|e| AppError::internal(format!("Failed to create scheduler: {e}")))?;

        Ok(Self {
            scheduler,
            config,
            retention,
            reconcile,
            progress_repo,
            progress_store,
        })
    }

    /// Register all periodic tasks.
    pub async fn register_default_tasks(&self) -> Result<(), AppError> {
        self.register_deletion_sweep().await?;
        self.register_reconciliation().await?;
        self.register_stale_sweep().await?;
        info!("All scheduled tasks registered");
        Ok(())
    }

    /// Start the scheduler.
    pub async fn start(&self) -> Result<(), AppError> {
        self.scheduler
            .start()
            .await
            .map_err(|e| AppError::internal(format!("Failed to start scheduler: {e}")))?;
        info!("Maintenance scheduler started");
        Ok(())
    }

    /// Shut the scheduler down.
    pub async fn shutdown(&mut self) -> Result<(), AppError> {
        self.scheduler
            .shutdown()
            .await
            .map_err(|e| AppError::internal(format!("Failed to shutdown scheduler: {e}")))?;
        info!("Maintenance scheduler shut down");
        Ok(())
    }

    async fn register_deletion_sweep(&self) -> Result<(), AppError> {
        let retention = Arc::clone(&self.retention);
        let job = CronJob::new_async(self.config.deletion_sweep_cron.as_str(), move |_uuid, _lock| {
            let retention = Arc::clone(&retention);
            Box::pin(async move {
                jobs::run_deletion_sweep(retention).await;
            })
        })
        .map_err(|e| AppError::internal(format!("Failed to create deletion sweep: {e}")))?;

        self.scheduler
            .add(job)
            .await
            .map_err(|e| AppError::internal(format!("Failed to add deletion sweep: {e}")))?;

        info!(cron = %self.config.deletion_sweep_cron, "Registered: deletion_sweep");
        Ok(())
    }

    async fn register_reconciliation(&self) -> Result<(), AppError> {
        let reconcile = Arc::clone(&self.reconcile);
        let job = CronJob::new_async(self.config.reconcile_cron.as_str(), move |_uuid, _lock| {
            let reconcile = Arc::clone(&reconcile);
            Box::pin(async move {
                jobs::run_reconciliation(reconcile).await;
            })
        })
        .map_err(|e| AppError::internal(format!("Failed to create reconciliation: {e}")))?;

        self.scheduler
            .add(job)
            .await
            .map_err(|e| AppError::internal(format!("Failed to add reconciliation: {e}")))?;

        info!(cron = %self.config.reconcile_cron, "Registered: reconciliation");
        Ok(())
    }

    async fn register_stale_sweep(&self) -> Result<(), AppError> {
        let repo = Arc::clone(&self.progress_repo);
        let store = Arc::clone(&self.progress_store);
        let grace = self.config.stale_running_minutes;
        let job = CronJob::new_async(self.config.stale_sweep_cron.as_str(), move |_uuid, _lock| {
            let repo = Arc::clone(&repo);
            let store = Arc::clone(&store);
            Box::pin(async move {
                jobs::run_stale_sweep(repo, store, grace).await;
            })
        })
        .map_err(|e| AppError::internal(format!("Failed to create stale sweep: {e}")))?;

        self.scheduler
            .add(job)
            .await
            .map_err(|e| AppError::internal(format!("Failed to add stale sweep: {e}")))?;

        info!(cron = %self.config.stale_sweep_cron, "Registered: stale_progress_sweep");
        Ok(())
    }
}
