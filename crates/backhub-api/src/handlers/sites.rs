//! Site listing, quota, and backup-control handlers.

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use serde::Deserialize;

use backhub_core::error::AppError;
use backhub_core::types::id::SiteId;
use backhub_core::types::pagination::PageRequest;
use backhub_entity::progress::ProgressRow;
use backhub_entity::site::Site;
use backhub_service::activity::actions;
use backhub_service::quota::QuotaCheck;

use crate::extractors::AuthUser;
use crate::state::AppState;

/// GET /api/sites — RBAC filtered.
pub async fn list_sites(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<Vec<Site>>, AppError> {
    use backhub_entity::user::UserRole;
    let sites = match auth.role {
        UserRole::SuperAdmin => state.site_repo.find_all().await?,
        UserRole::NodeAdmin => state.site_repo.find_on_assigned_nodes(auth.user_id).await?,
        UserRole::SiteAdmin => state.site_repo.find_assigned(auth.user_id).await?,
    };
    Ok(Json(sites))
}

/// GET /api/sites/:id
pub async fn get_site(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(site_id): Path<SiteId>,
) -> Result<Json<Site>, AppError> {
    auth.require_site(&state, site_id).await?;
    let site = state
        .site_repo
        .find_by_id(site_id)
        .await?
        .ok_or_else(|| AppError::not_found("Site not found"))?;
    Ok(Json(site))
}

/// GET /api/sites/:id/backups
pub async fn list_site_backups(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(site_id): Path<SiteId>,
    Query(page): Query<PageRequest>,
) -> Result<Json<backhub_core::types::pagination::PageResponse<backhub_entity::backup::Backup>>, AppError>
{
    auth.require_site(&state, site_id).await?;
    Ok(Json(state.backup_repo.find_by_site(site_id, &page).await?))
}

/// POST /api/sites/:id/backup/start
///
/// Begins a new job: claims a fresh epoch (409 while RUNNING) and
/// forwards the start to the owning node's daemon.
pub async fn start_backup(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(site_id): Path<SiteId>,
) -> Result<(StatusCode, Json<ProgressRow>), AppError> {
    auth.require_site(&state, site_id).await?;
    let site = state
        .site_repo
        .find_by_id(site_id)
        .await?
        .ok_or_else(|| AppError::not_found("Site not found"))?;
    let node = state
        .node_repo
        .find_by_id(site.node_id)
        .await?
        .ok_or_else(|| AppError::integrity("Site references a missing node"))?;
    if !node.is_active() {
        return Err(AppError::config("The owning node is not active"));
    }

    // Epoch claim is the concurrency gate: a RUNNING row rejects here
    // with a conflict before anything reaches the node.
    let epoch = state.progress.begin(site_id).await?;

    if let Err(e) = state
        .node_client
        .start_backup(&node, site_id.into_uuid(), epoch)
        .await
    {
        // The node never accepted the job; release the row.
        state
            .progress
            .finish(
                site_id,
                epoch,
                backhub_entity::progress::ProgressOutcome {
                    state: backhub_entity::progress::BackupState::Failed,
                    message: Some("Node did not accept the job".to_string()),
                    error: Some(e.message.clone()),
                },
            )
            .await?;
        return Err(e);
    }

    state.metrics.backup_started();
    state
        .activity
        .log(
            &auth.actor(),
            actions::BACKUP_START,
            "site",
            Some(site_id.into_uuid()),
            Some(site.name.clone()),
            serde_json::json!({"epoch": epoch}),
        )
        .await;

    Ok((StatusCode::ACCEPTED, Json(state.progress.snapshot(site_id))))
}

/// GET /api/sites/:id/backup/status
pub async fn backup_status(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(site_id): Path<SiteId>,
) -> Result<Json<ProgressRow>, AppError> {
    auth.require_site(&state, site_id).await?;
    Ok(Json(state.progress.snapshot(site_id)))
}

/// POST /api/sites/:id/backup/stop
///
/// Raises the cooperative cancellation flag and forwards the stop to the
/// node. Idempotent.
pub async fn stop_backup(
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

    let row = state.progress.request_stop(site_id).await?;

    // Best effort: the daemon also polls the stop flag through its
    // progress writes, so an unreachable node still converges.
    if let Ok(Some(node)) = state.node_repo.find_by_id(site.node_id).await {
        if let Err(e) = state
            .node_client
            .stop_backup(&node, site_id.into_uuid())
            .await
        {
            tracing::warn!(site_id = %site_id, error = %e, "Stop forwarding failed");
        }
    }

    state
        .activity
        .log(
            &auth.actor(),
            actions::BACKUP_STOP,
            "site",
            Some(site_id.into_uuid()),
            Some(site.name.clone()),
            serde_json::Value::Null,
        )
        .await;

    Ok(Json(row))
}

/// Query for the pre-flight check.
#[derive(Debug, Deserialize)]
pub struct QuotaCheckQuery {
    /// Estimated backup size; defaults to the site's history.
    pub estimated_bytes: Option<i64>,
}

/// GET /api/sites/:id/quota/check
pub async fn quota_check(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(site_id): Path<SiteId>,
    Query(query): Query<QuotaCheckQuery>,
) -> Result<Json<QuotaCheck>, AppError> {
    auth.require_site(&state, site_id).await?;
    Ok(Json(
        state.quota.preflight(site_id, query.estimated_bytes).await?,
    ))
}

/// Site quota update body.
#[derive(Debug, Deserialize)]
pub struct SiteQuotaUpdate {
    /// New quota in bytes.
    pub quota_bytes: i64,
}

/// PUT /api/sites/:id/quota — super admin; rejects above node remainder.
pub async fn update_quota(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(site_id): Path<SiteId>,
    Json(body): Json<SiteQuotaUpdate>,
) -> Result<Json<Site>, AppError> {
    state.rbac.require_super_admin(auth.role)?;
    if body.quota_bytes <= 0 {
        return Err(AppError::validation("Quota must be positive"));
    }

    state.quota.update_site_quota(site_id, body.quota_bytes).await?;

    let site = state
        .site_repo
        .find_by_id(site_id)
        .await?
        .ok_or_else(|| AppError::not_found("Site not found"))?;

    state
        .activity
        .log(
            &auth.actor(),
            actions::SITE_QUOTA_UPDATE,
            "site",
            Some(site_id.into_uuid()),
            Some(site.name.clone()),
            serde_json::json!({"new_quota": body.quota_bytes}),
        )
        .await;

    Ok(Json(site))
}
