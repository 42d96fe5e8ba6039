//! Daemon-facing endpoints and the live progress stream.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::Stream;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use backhub_core::error::AppError;
use backhub_core::types::id::SiteId;
use backhub_core::types::response::AckResponse;
use backhub_entity::backup::{Backup, BackupReport};
use backhub_entity::progress::{ProgressOutcome, ProgressPatch, ProgressRow};
use backhub_entity::site::DiscoveredSite;
use backhub_progress::clamp_stream_interval;
use backhub_service::activity::actions;
use backhub_service::quota::QuotaCheck;

use crate::extractors::{AuthNode, AuthUser};
use crate::metrics::Metrics;
use crate::state::AppState;

/// Default site quota handed to newly discovered sites: 10 GiB.
const DEFAULT_SITE_QUOTA_BYTES: i64 = 10 * 1024 * 1024 * 1024;

/// Ensure the presenting node owns the site.
async fn require_site_owner(state: &AppState, node: &AuthNode, site_id: SiteId) -> Result<(), AppError> {
    let site = state
        .site_repo
        .find_by_id(site_id)
        .await?
        .ok_or_else(|| AppError::not_found("Site not found"))?;
    if site.node_id != node.id {
        return Err(AppError::authorization("Site belongs to another node"));
    }
    Ok(())
}

/// POST /api/daemon/progress/begin/:site_id — node auth.
///
/// Claims a new epoch for a scheduler-originated job. 409 while RUNNING.
pub async fn progress_begin(
    State(state): State<AppState>,
    node: AuthNode,
    Path(site_id): Path<SiteId>,
) -> Result<Json<BeginResponse>, AppError> {
    require_site_owner(&state, &node, site_id).await?;
    let epoch = state.progress.begin(site_id).await?;
    state.metrics.backup_started();
    Ok(Json(BeginResponse { epoch }))
}

/// Epoch issued to a starting job.
#[derive(Debug, Serialize, Deserialize)]
pub struct BeginResponse {
    /// The claimed epoch; all progress writes must carry it.
    pub epoch: i64,
}

/// Progress write from a pipeline.
#[derive(Debug, Deserialize)]
pub struct ProgressWrite {
    /// Epoch the writer was issued at start.
    pub epoch: i64,
    /// Field updates.
    #[serde(flatten)]
    pub patch: ProgressPatch,
}

/// Whether the write landed and whether a stop was requested.
#[derive(Debug, Serialize, Deserialize)]
pub struct ProgressWriteAck {
    /// False when the write was dropped as stale.
    pub applied: bool,
    /// Cooperative cancellation flag for the writer to observe.
    pub stop_requested: bool,
}

/// POST /api/daemon/progress/:site_id — node auth.
pub async fn progress_update(
    State(state): State<AppState>,
    node: AuthNode,
    Path(site_id): Path<SiteId>,
    Json(body): Json<ProgressWrite>,
) -> Result<Json<ProgressWriteAck>, AppError> {
    require_site_owner(&state, &node, site_id).await?;
    let applied = state.progress.update(site_id, body.epoch, body.patch).await?;
    let row = state.progress.snapshot(site_id);
    Ok(Json(ProgressWriteAck {
        applied,
        stop_requested: row.stop_requested,
    }))
}

/// Terminal report from a pipeline.
#[derive(Debug, Deserialize)]
pub struct ProgressFinish {
    /// Epoch the writer was issued at start.
    pub epoch: i64,
    /// Terminal outcome.
    #[serde(flatten)]
    pub outcome: ProgressOutcome,
}

/// POST /api/daemon/progress/:site_id/finish — node auth.
pub async fn progress_finish(
    State(state): State<AppState>,
    node: AuthNode,
    Path(site_id): Path<SiteId>,
    Json(body): Json<ProgressFinish>,
) -> Result<Json<ProgressWriteAck>, AppError> {
    require_site_owner(&state, &node, site_id).await?;

    use backhub_entity::progress::BackupState;
    if matches!(body.outcome.state, BackupState::Failed | BackupState::Stopped) {
        state.metrics.backup_failed();
    }

    // Terminal failures are recorded for the notification pipeline; the
    // outbound email channel picks them off the activity log.
    if body.outcome.state == BackupState::Failed {
        tracing::error!(
            site_id = %site_id,
            error = body.outcome.error.as_deref().unwrap_or("unknown"),
            "Backup failed"
        );
        state
            .activity
            .log(
                &Default::default(),
                "backup.failed",
                "site",
                Some(site_id.into_uuid()),
                None,
                serde_json::json!({
                    "error": body.outcome.error.clone(),
                    "message": body.outcome.message.clone(),
                }),
            )
            .await;
    }

    let applied = state
        .progress
        .finish(site_id, body.epoch, body.outcome)
        .await?;
    Ok(Json(ProgressWriteAck {
        applied,
        stop_requested: false,
    }))
}

/// GET /api/daemon/quota/check/:site_id — node auth pre-flight.
#[derive(Debug, Deserialize)]
pub struct PreflightQuery {
    /// On-disk bundle size the node is about to upload.
    pub estimated_bytes: Option<i64>,
}

/// Pre-flight projection for the upload stage.
pub async fn quota_preflight(
    State(state): State<AppState>,
    node: AuthNode,
    Path(site_id): Path<SiteId>,
    Query(query): Query<PreflightQuery>,
) -> Result<Json<QuotaCheck>, AppError> {
    require_site_owner(&state, &node, site_id).await?;
    Ok(Json(
        state.quota.preflight(site_id, query.estimated_bytes).await?,
    ))
}

/// POST /api/daemon/backups/report — node auth post-flight.
pub async fn report_backup(
    State(state): State<AppState>,
    node: AuthNode,
    Json(report): Json<BackupReport>,
) -> Result<Json<Backup>, AppError> {
    require_site_owner(&state, &node, report.site_id).await?;

    let backup = state.quota.record_success(&report).await?;
    state.metrics.backup_succeeded(report.size_bytes.max(0) as u64);
    Ok(Json(backup))
}

/// Heartbeat body.
#[derive(Debug, Deserialize)]
pub struct Heartbeat {
    /// Jobs currently executing on the node.
    pub active_jobs: u32,
    /// Bytes held in the node's temp root.
    pub temp_bytes: u64,
    /// Daemon version string.
    pub version: String,
}

/// POST /api/daemon/heartbeat — node auth.
pub async fn heartbeat(
    State(state): State<AppState>,
    node: AuthNode,
    Json(beat): Json<Heartbeat>,
) -> Result<Json<AckResponse>, AppError> {
    tracing::debug!(
        node_id = %node.id,
        active_jobs = beat.active_jobs,
        temp_bytes = beat.temp_bytes,
        version = %beat.version,
        "Node heartbeat"
    );
    // last_seen_at is touched by the extractor.
    Ok(Json(AckResponse::ok("ok")))
}

/// GET /api/daemon/sites — node auth.
///
/// The daemon's view of its own sites, used by the schedule ticker.
pub async fn my_sites(
    State(state): State<AppState>,
    node: AuthNode,
) -> Result<Json<Vec<backhub_entity::site::Site>>, AppError> {
    Ok(Json(state.site_repo.find_by_node(node.id).await?))
}

/// GET /api/daemon/sites/:site_id — node auth.
pub async fn my_site(
    State(state): State<AppState>,
    node: AuthNode,
    Path(site_id): Path<SiteId>,
) -> Result<Json<backhub_entity::site::Site>, AppError> {
    require_site_owner(&state, &node, site_id).await?;
    let site = state
        .site_repo
        .find_by_id(site_id)
        .await?
        .ok_or_else(|| AppError::not_found("Site not found"))?;
    Ok(Json(site))
}

/// Next-run write from the schedule ticker.
#[derive(Debug, Deserialize)]
pub struct NextRunUpdate {
    /// Next occurrence, or null for manual schedules.
    pub next_run_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// POST /api/daemon/sites/:site_id/next-run — node auth.
pub async fn update_next_run(
    State(state): State<AppState>,
    node: AuthNode,
    Path(site_id): Path<SiteId>,
    Json(body): Json<NextRunUpdate>,
) -> Result<Json<AckResponse>, AppError> {
    require_site_owner(&state, &node, site_id).await?;
    state
        .site_repo
        .update_next_run(site_id, body.next_run_at)
        .await?;
    Ok(Json(AckResponse::ok("next run recorded")))
}

/// POST /api/daemon/sites/report — node auth scanner results.
pub async fn report_sites(
    State(state): State<AppState>,
    node: AuthNode,
    Json(discovered): Json<Vec<DiscoveredSite>>,
) -> Result<Json<Vec<backhub_entity::site::Site>>, AppError> {
    let mut sites = Vec::with_capacity(discovered.len());
    for site in &discovered {
        sites.push(
            state
                .site_repo
                .upsert_discovered(node.id, site, DEFAULT_SITE_QUOTA_BYTES)
                .await?,
        );
    }
    tracing::info!(node_id = %node.id, count = sites.len(), "Scanner reported sites");
    Ok(Json(sites))
}

/// POST /api/daemon/backup/reset/:site_id — user auth.
///
/// Forcibly returns a stale RUNNING row to IDLE and sweeps the site's
/// temp dirs. Refused while the node's engine still holds a live job.
pub async fn reset_backup(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(site_id): Path<SiteId>,
) -> Result<Json<ProgressRow>, AppError> {
    auth.require_site(&state, site_id).await?;
    let site = state
        .site_repo
        .find_by_id(site_id)
        .await?
        .ok_or_else(|| AppError::not_found("Site not found"))?;

    // The reset is only safe when the engine holds no live job; a node
    // that answers its sweep request has, by then, already refused or
    // finished the job. An unreachable node is treated as holding none.
    if let Ok(Some(node)) = state.node_repo.find_by_id(site.node_id).await {
        match state.node_client.sweep_site(&node, site_id.into_uuid()).await {
            Ok(_) => {}
            Err(e) if e.kind == backhub_core::error::ErrorKind::Conflict => {
                return Err(AppError::conflict(
                    "The node still holds a live job for this site",
                ));
            }
            Err(e) => {
                tracing::warn!(site_id = %site_id, error = %e, "Sweep forwarding failed");
            }
        }
    }

    let row = state.progress.reset(site_id, true).await?;

    state
        .activity
        .log(
            &auth.actor(),
            actions::BACKUP_RESET,
            "site",
            Some(site_id.into_uuid()),
            Some(site.name.clone()),
            serde_json::Value::Null,
        )
        .await;

    Ok(Json(row))
}

/// Query parameters for the SSE stream.
#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    /// Publish interval in seconds; clamped to [1, 60].
    pub interval: Option<u64>,
    /// Bearer token (EventSource cannot set headers).
    pub token: String,
}

/// Decrements the subscriber gauge when the stream is dropped.
struct SseGuard(Arc<Metrics>);

impl Drop for SseGuard {
    fn drop(&mut self) {
        self.0.sse_disconnected();
    }
}

/// GET /api/daemon/backup/stream/:site_id?interval=N&token=…
///
/// Emits the current row immediately, then on change or tick, whichever
/// comes first; one final event when the row turns terminal, then the
/// stream closes.
pub async fn stream_backup(
    State(state): State<AppState>,
    Path(site_id): Path<SiteId>,
    Query(query): Query<StreamQuery>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let claims = state.tokens.decode_full(&query.token)?;
    let auth = AuthUser {
        user_id: claims.user_id(),
        role: claims.role,
        ip_address: None,
        user_agent: None,
    };
    auth.require_site(&state, site_id).await?;

    let interval = Duration::from_secs(clamp_stream_interval(query.interval.unwrap_or(5)));
    let rx = state.progress.subscribe(site_id);
    state.metrics.sse_connected();
    let guard = SseGuard(Arc::clone(&state.metrics));

    struct StreamState {
        rx: watch::Receiver<ProgressRow>,
        interval: Duration,
        first: bool,
        done: bool,
        _guard: SseGuard,
    }

    let stream = futures::stream::unfold(
        StreamState {
            rx,
            interval,
            first: true,
            done: false,
            _guard: guard,
        },
        |mut s| async move {
            if s.done {
                return None;
            }

            if !s.first {
                tokio::select! {
                    changed = s.rx.changed() => {
                        if changed.is_err() {
                            s.done = true;
                        }
                    }
                    _ = tokio::time::sleep(s.interval) => {}
                }
            }
            s.first = false;

            let row = s.rx.borrow_and_update().clone();
            if row.state.is_terminal() {
                s.done = true;
            }

            let event = Event::default()
                .event("backup_status")
                .json_data(&row)
                .unwrap_or_else(|_| Event::default().data("{}"));
            Some((Ok(event), s))
        },
    );

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}
