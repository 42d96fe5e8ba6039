//! Control listener the master calls into.
//!
//! A small axum app bound to the configured control address. Every
//! request must present this node's own API key in `X-API-KEY`; the
//! master echoes the key material it was enrolled with, so only parties
//! holding the node's credential can drive the engine.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::watch;
use tracing::info;

use backhub_core::error::{AppError, ErrorKind};
use backhub_core::types::id::SiteId;

use crate::pipeline::engine::{Engine, JobRequest};
use crate::scanner;
use crate::sweep;

/// Shared state of the control listener.
#[derive(Clone)]
pub struct ControlState {
    /// The backup engine.
    pub engine: Arc<Engine>,
    /// This node's API key; inbound requests must present it.
    pub api_key: Arc<String>,
    /// The daemon's temp work root.
    pub work_root: Arc<std::path::PathBuf>,
    /// Web root for on-demand scans.
    pub web_root: Arc<String>,
}

/// Reject requests without the node's key.
async fn require_key(
    State(state): State<ControlState>,
    request: axum::extract::Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let presented = request
        .headers()
        .get("x-api-key")
        .and_then(|v| v.to_str().ok());
    if presented != Some(state.api_key.as_str()) {
        return Err(StatusCode::UNAUTHORIZED);
    }
    Ok(next.run(request).await)
}

/// Build the control router.
pub fn build_control_router(state: ControlState) -> Router {
    Router::new()
        .route("/control/backup/start", post(start_backup))
        .route("/control/backup/stop", post(stop_backup))
        .route("/control/backup/status", get(backup_status))
        .route("/control/sweep/{site_id}", post(sweep_site))
        .route("/control/scan", get(scan))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_key))
        .route("/control/health", get(health))
        .with_state(state)
}

/// Run the control listener until shutdown.
pub async fn run_control_server(
    bind: &str,
    state: ControlState,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), AppError> {
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .map_err(|e| AppError::internal(format!("Failed to bind control listener {bind}: {e}")))?;
    info!(address = %bind, "Control listener ready");

    axum::serve(listener, build_control_router(state))
        .with_graceful_shutdown(async move {
            let _ = shutdown.changed().await;
        })
        .await
        .map_err(|e| AppError::internal(format!("Control listener error: {e}")))
}

/// Start request body.
#[derive(Debug, Deserialize)]
struct StartBody {
    site_id: SiteId,
    /// Epoch claimed by the master for this job.
    epoch: i64,
}

/// POST /control/backup/start
async fn start_backup(
    State(state): State<ControlState>,
    Json(body): Json<StartBody>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    state.engine.enqueue(JobRequest {
        site_id: body.site_id,
        epoch: Some(body.epoch),
    })?;
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({"accepted": true, "site_id": body.site_id})),
    ))
}

/// Stop request body.
#[derive(Debug, Deserialize)]
struct StopBody {
    site_id: SiteId,
}

/// POST /control/backup/stop
async fn stop_backup(
    State(state): State<ControlState>,
    Json(body): Json<StopBody>,
) -> Json<Value> {
    let had_job = state.engine.cancel(body.site_id);
    Json(json!({"stopped": had_job}))
}

/// GET /control/backup/status
async fn backup_status(State(state): State<ControlState>) -> Json<Value> {
    Json(json!({"active_jobs": state.engine.active_count()}))
}

/// POST /control/sweep/{site_id}
///
/// Refused with 409 while the engine holds a live job for the site; the
/// master's reset endpoint relies on that answer.
async fn sweep_site(
    State(state): State<ControlState>,
    Path(site_id): Path<SiteId>,
) -> Result<Json<Value>, AppError> {
    if state.engine.has_live_job(site_id) {
        return Err(AppError::new(
            ErrorKind::Conflict,
            "A live job holds this site",
        ));
    }
    let removed = sweep::sweep_site_dirs(&state.work_root, site_id).await?;
    Ok(Json(json!({"swept": removed})))
}

/// GET /control/scan
async fn scan(State(state): State<ControlState>) -> Result<Json<Value>, AppError> {
    let sites = scanner::scan_web_root(&state.web_root).await?;
    Ok(Json(json!({"sites": sites, "total": sites.len()})))
}

/// GET /control/health — unauthenticated liveness probe.
async fn health() -> Json<Value> {
    Json(json!({"status": "ok"}))
}
