//! The pipeline engine: a single-writer work queue and the stage loop.
//!
//! Request handlers and the schedule ticker only enqueue; one worker
//! task drains the queue and executes jobs, never more than one per
//! site. All terminal states are published to the master before the
//! engine leaves a job.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use backhub_core::error::{AppError, ErrorKind};
use backhub_core::result::AppResult;
use backhub_core::types::id::SiteId;
use backhub_entity::progress::{BackupState, ProgressOutcome, ProgressPatch};

use crate::client::MasterClient;
use crate::governor::Governor;

use super::context::JobContext;
use super::wordpress::WordPressModule;
use super::{ModuleKind, StageSpec, StageStatus};

/// Maximum queued jobs.
const QUEUE_DEPTH: usize = 64;
/// Attempts per stage for transient failures.
const MAX_STAGE_ATTEMPTS: u32 = 3;
/// Minimum gap between progress writes (4 Hz).
const PROGRESS_MIN_INTERVAL: Duration = Duration::from_millis(250);

/// A queued backup request.
#[derive(Debug)]
pub struct JobRequest {
    /// Site to back up.
    pub site_id: SiteId,
    /// Epoch already claimed by the master (manual starts); the engine
    /// claims one itself when absent (scheduled starts).
    pub epoch: Option<i64>,
}

/// The backup engine handle.
pub struct Engine {
    tx: mpsc::Sender<JobRequest>,
    live: Arc<DashMap<SiteId, CancellationToken>>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("live_jobs", &self.live.len())
            .finish()
    }
}

impl Engine {
    /// Start the engine worker. Returns the handle and the worker task.
    pub fn start(
        governor: Arc<Governor>,
        client: MasterClient,
        work_root: PathBuf,
        keep_on_failure: bool,
        mut shutdown: watch::Receiver<bool>,
    ) -> (Arc<Self>, tokio::task::JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<JobRequest>(QUEUE_DEPTH);
        let live: Arc<DashMap<SiteId, CancellationToken>> = Arc::new(DashMap::new());

        let engine = Arc::new(Self {
            tx,
            live: Arc::clone(&live),
        });

        let worker_live = Arc::clone(&live);
        let worker = tokio::spawn(async move {
            let module = WordPressModule::new(Arc::clone(&governor), client.clone());
            let runner = JobRunner {
                module,
                client,
                work_root,
                keep_on_failure,
            };

            loop {
                let request = tokio::select! {
                    request = rx.recv() => match request {
                        Some(request) => request,
                        None => break,
                    },
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            info!("Engine received shutdown signal");
                            break;
                        }
                        continue;
                    }
                };

                let site_id = request.site_id;
                let cancel = worker_live
                    .get(&site_id)
                    .map(|entry| entry.value().clone())
                    .unwrap_or_default();

                runner.process(request, cancel).await;
                worker_live.remove(&site_id);
            }

            info!("Engine worker stopped");
        });

        (engine, worker)
    }

    /// Enqueue a backup. Refuses a site that is already queued or
    /// running, and a full queue.
    pub fn enqueue(&self, request: JobRequest) -> AppResult<()> {
        let site_id = request.site_id;
        match self.live.entry(site_id) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                return Err(AppError::conflict(
                    "A backup is already queued for this site",
                ));
            }
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                vacant.insert(CancellationToken::new());
            }
        }

        if let Err(e) = self.tx.try_send(request) {
            self.live.remove(&site_id);
            return match e {
                mpsc::error::TrySendError::Full(_) => {
                    Err(AppError::transient("Backup queue is full"))
                }
                mpsc::error::TrySendError::Closed(_) => {
                    Err(AppError::internal("Backup engine is stopped"))
                }
            };
        }
        Ok(())
    }

    /// Request cancellation of a site's live job. Idempotent.
    pub fn cancel(&self, site_id: SiteId) -> bool {
        match self.live.get(&site_id) {
            Some(entry) => {
                entry.value().cancel();
                true
            }
            None => false,
        }
    }

    /// Whether the engine holds a queued or running job for the site.
    pub fn has_live_job(&self, site_id: SiteId) -> bool {
        self.live.contains_key(&site_id)
    }

    /// Number of queued or running jobs.
    pub fn active_count(&self) -> usize {
        self.live.len()
    }
}

/// Shared per-stage numbers the progress ticker reads.
#[derive(Debug, Default)]
struct StageWindow {
    base_percent: AtomicU64,
    weight: AtomicU64,
}

struct JobRunner {
    module: WordPressModule,
    client: MasterClient,
    work_root: PathBuf,
    keep_on_failure: bool,
}

impl JobRunner {
    /// Execute one job end to end.
    async fn process(&self, request: JobRequest, cancel: CancellationToken) {
        let site_id = request.site_id;

        let site = match self.client.get_site(site_id).await {
            Ok(site) => site,
            Err(e) => {
                error!(site_id = %site_id, error = %e, "Could not load site for backup");
                return;
            }
        };

        // Claim the epoch for scheduled jobs; manual starts arrive with
        // one already claimed by the master.
        let epoch = match request.epoch {
            Some(epoch) => epoch,
            None => match self.client.begin_progress(site_id).await {
                Ok(epoch) => epoch,
                Err(e) if e.kind == ErrorKind::Conflict => {
                    info!(site_id = %site_id, "Skipping scheduled backup; one is already running");
                    return;
                }
                Err(e) => {
                    error!(site_id = %site_id, error = %e, "Could not begin progress epoch");
                    return;
                }
            },
        };

        let mut ctx = JobContext::new(site, epoch, &self.work_root);
        // The queue token arms the context's cancellation.
        let queue_cancel = cancel.clone();
        let ctx_cancel = ctx.cancel.clone();
        let relay = tokio::spawn(async move {
            queue_cancel.cancelled().await;
            ctx_cancel.cancel();
        });

        info!(
            job_id = %ctx.job_id,
            site = %ctx.site.name,
            epoch,
            module = ModuleKind::WordPress.name(),
            "Backup job starting"
        );

        let outcome = self.run_stages(&mut ctx).await;

        match self
            .client
            .finish_progress(site_id, epoch, &outcome)
            .await
        {
            Ok(ack) if !ack.applied => {
                warn!(site_id = %site_id, epoch, "Terminal state dropped as stale")
            }
            Ok(_) => {}
            Err(e) => error!(site_id = %site_id, error = %e, "Could not publish terminal state"),
        }

        relay.abort();
        info!(
            job_id = %ctx.job_id,
            site = %ctx.site.name,
            state = %outcome.state,
            "Backup job finished"
        );
    }

    /// Run the stage graph and produce the terminal outcome.
    async fn run_stages(&self, ctx: &mut JobContext) -> ProgressOutcome {
        let stages = ModuleKind::WordPress.stages();
        let window = Arc::new(StageWindow::default());
        let reporter = ProgressReporter::new(self.client.clone(), ctx.site_id, ctx.epoch);

        // Background ticker: at most 4 Hz, translate the stage counters
        // into progress writes and watch for the stop flag.
        let ticker = self.spawn_ticker(ctx, Arc::clone(&window), reporter.clone());

        let mut failure: Option<AppError> = None;
        let mut base: u64 = 0;

        for stage in stages {
            let failed_already = failure.is_some();
            if failed_already && !stage.always_run {
                continue;
            }
            if failure.is_none() && ctx.cancel.is_cancelled() {
                failure = Some(AppError::cancelled("Backup cancelled"));
                if !stage.always_run {
                    continue;
                }
            }

            // keep-on-failure leaves the temp dir for the operator.
            if stage.name == "cleanup"
                && self.keep_on_failure
                && failure.as_ref().is_some_and(|e| e.kind != ErrorKind::Cancelled)
            {
                info!(dir = %ctx.temp_dir.display(), "Keeping temp dir of failed job");
                continue;
            }

            window.base_percent.store(base, Ordering::Relaxed);
            window.weight.store(stage.weight as u64, Ordering::Relaxed);
            ctx.counters.reset(0);

            reporter
                .send(
                    ProgressPatch {
                        progress_percent: Some(base as i16),
                        stage: Some(stage.name.to_string()),
                        message: Some(format!("Running {}", stage.name)),
                        ..Default::default()
                    },
                    true,
                )
                .await;

            match self.run_stage_with_retry(stage, ctx).await {
                Ok(output) => {
                    base += stage.weight as u64;
                    reporter
                        .send(
                            ProgressPatch {
                                progress_percent: Some(base as i16),
                                stage: Some(stage.name.to_string()),
                                message: Some(output.message.clone()),
                                ..Default::default()
                            },
                            true,
                        )
                        .await;
                    if output.status == StageStatus::Skipped {
                        info!(stage = stage.name, "Stage skipped: {}", output.message);
                    }
                }
                Err(e) => {
                    if stage.always_run {
                        // A cleanup failure never overrides the outcome.
                        warn!(stage = stage.name, error = %e, "Always-run stage failed");
                    } else {
                        warn!(stage = stage.name, error = %e, "Stage failed");
                        failure.get_or_insert(e);
                    }
                }
            }
        }

        ticker.abort();

        match failure {
            None => {
                // Report the archive for accounting before publishing
                // success; a lost report leaves an orphan object that
                // reconciliation surfaces.
                match self.module.completion_report(ctx) {
                    Ok(report) => {
                        if let Err(e) = self.client.report_backup(&report).await {
                            error!(error = %e, "Completion report failed");
                            return ProgressOutcome {
                                state: BackupState::Failed,
                                message: Some("Backup uploaded but could not be recorded".into()),
                                error: Some(e.message),
                            };
                        }
                    }
                    Err(e) => {
                        return ProgressOutcome {
                            state: BackupState::Failed,
                            message: None,
                            error: Some(e.message),
                        };
                    }
                }
                ProgressOutcome {
                    state: BackupState::Completed,
                    message: Some("Backup completed".to_string()),
                    error: None,
                }
            }
            Some(e) if e.kind == ErrorKind::Cancelled => ProgressOutcome {
                state: BackupState::Stopped,
                message: Some("Backup stopped".to_string()),
                error: None,
            },
            Some(e) => ProgressOutcome {
                state: BackupState::Failed,
                message: Some(format!("{}", e.kind)),
                error: Some(e.message),
            },
        }
    }

    /// Run one stage, retrying transient failures with exponential
    /// backoff. Every other error kind terminates immediately.
    async fn run_stage_with_retry(
        &self,
        stage: &StageSpec,
        ctx: &mut JobContext,
    ) -> AppResult<super::StageOutput> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let started = Instant::now();
            let result = self.module.execute_stage(stage.name, ctx).await;
            let duration = started.elapsed();

            match result {
                Ok(output) => {
                    info!(
                        stage = stage.name,
                        duration_ms = duration.as_millis() as u64,
                        "Stage finished: {}",
                        output.message
                    );
                    return Ok(output);
                }
                Err(e) if e.is_retryable() && attempt < MAX_STAGE_ATTEMPTS => {
                    let delay = Duration::from_secs(1 << attempt);
                    warn!(
                        stage = stage.name,
                        attempt,
                        delay_secs = delay.as_secs(),
                        error = %e,
                        "Transient stage failure; retrying"
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = ctx.cancel.cancelled() => {
                            return Err(AppError::cancelled("Backup cancelled"));
                        }
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Spawn the 4 Hz progress ticker for a job.
    fn spawn_ticker(
        &self,
        ctx: &JobContext,
        window: Arc<StageWindow>,
        reporter: ProgressReporter,
    ) -> tokio::task::JoinHandle<()> {
        let counters = CounterHandle {
            site_cancel: ctx.cancel.clone(),
            processed: ctx.counters.bytes_processed_handle(),
            total: ctx.counters.bytes_total_handle(),
        };

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(PROGRESS_MIN_INTERVAL);
            let mut last = (u64::MAX, u64::MAX);
            let mut idle_ticks = 0u32;
            loop {
                interval.tick().await;

                let processed = counters.processed.load(Ordering::Relaxed);
                let total = counters.total.load(Ordering::Relaxed);
                // Quiet stages (a running mysqldump moves no counters)
                // still need the stop flag polled every couple of
                // seconds.
                if (processed, total) == last && idle_ticks < 8 {
                    idle_ticks += 1;
                    continue;
                }
                idle_ticks = 0;
                last = (processed, total);

                let base = window.base_percent.load(Ordering::Relaxed);
                let weight = window.weight.load(Ordering::Relaxed);
                let fraction = if total == 0 {
                    0.0
                } else {
                    (processed as f64 / total as f64).min(1.0)
                };
                let percent = (base as f64 + weight as f64 * fraction) as i16;

                if let Some(ack) = reporter
                    .send_checked(ProgressPatch {
                        progress_percent: Some(percent),
                        bytes_processed: Some(processed as i64),
                        bytes_total: Some(total as i64),
                        ..Default::default()
                    })
                    .await
                {
                    // The stop endpoint flips this flag; relay it into
                    // the job's token.
                    if ack.stop_requested {
                        counters.site_cancel.cancel();
                    }
                }
            }
        })
    }
}

struct CounterHandle {
    site_cancel: CancellationToken,
    processed: Arc<AtomicU64>,
    total: Arc<AtomicU64>,
}

/// Serialized, rate-limited progress writer for one job.
#[derive(Clone)]
struct ProgressReporter {
    client: MasterClient,
    site_id: SiteId,
    epoch: i64,
    last_sent: Arc<tokio::sync::Mutex<Instant>>,
}

impl ProgressReporter {
    fn new(client: MasterClient, site_id: SiteId, epoch: i64) -> Self {
        Self {
            client,
            site_id,
            epoch,
            last_sent: Arc::new(tokio::sync::Mutex::new(
                Instant::now() - PROGRESS_MIN_INTERVAL,
            )),
        }
    }

    /// Send a patch; `force` bypasses the rate limit (stage boundaries,
    /// terminal transitions).
    async fn send(&self, patch: ProgressPatch, force: bool) {
        let mut last = self.last_sent.lock().await;
        if !force && last.elapsed() < PROGRESS_MIN_INTERVAL {
            return;
        }
        *last = Instant::now();
        drop(last);

        if let Err(e) = self
            .client
            .update_progress(self.site_id, self.epoch, &patch)
            .await
        {
            warn!(site_id = %self.site_id, error = %e, "Progress write failed");
        }
    }

    /// Rate-limited send returning the ack for stop-flag observation.
    async fn send_checked(&self, patch: ProgressPatch) -> Option<crate::client::ProgressAck> {
        let mut last = self.last_sent.lock().await;
        if last.elapsed() < PROGRESS_MIN_INTERVAL {
            return None;
        }
        *last = Instant::now();
        drop(last);

        match self
            .client
            .update_progress(self.site_id, self.epoch, &patch)
            .await
        {
            Ok(ack) => Some(ack),
            Err(e) => {
                warn!(site_id = %self.site_id, error = %e, "Progress write failed");
                None
            }
        }
    }
}
