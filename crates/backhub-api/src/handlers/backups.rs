//! Backup record handlers: listing, deletion, download links.

use axum::Json;
use axum::extract::{Path, Query, State};
use serde::{Deserialize, Serialize};

use backhub_core::error::AppError;
use backhub_core::types::id::BackupId;
use backhub_core::types::response::AckResponse;
use backhub_entity::backup::Backup;
use backhub_service::activity::actions;
use backhub_service::retention::RetentionService;

use crate::extractors::AuthUser;
use crate::state::AppState;

/// GET /api/backups/scheduled-deletions — RBAC filtered.
pub async fn list_scheduled_deletions(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<Vec<Backup>>, AppError> {
    let all = state.backup_repo.find_scheduled_deletions().await?;
    let mut visible = Vec::with_capacity(all.len());
    for backup in all {
        if auth.can_view_site(&state, backup.site_id).await? {
            visible.push(backup);
        }
    }
    Ok(Json(visible))
}

/// Query for backup deletion.
#[derive(Debug, Deserialize)]
pub struct DeleteQuery {
    /// Also delete the blob from the object store (default true).
    pub delete_remote: Option<bool>,
}

/// Deletion result.
#[derive(Debug, Serialize)]
pub struct DeleteResponse {
    /// Whether the operation succeeded.
    pub success: bool,
    /// Bytes released from accounting.
    pub freed_bytes: i64,
}

/// DELETE /api/backups/:id — super admin.
pub async fn delete_backup(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(backup_id): Path<BackupId>,
    Query(query): Query<DeleteQuery>,
) -> Result<Json<DeleteResponse>, AppError> {
    state.rbac.require_super_admin(auth.role)?;

    let backup = state
        .backup_repo
        .find_by_id(backup_id)
        .await?
        .ok_or_else(|| AppError::not_found("Backup not found"))?;

    if query.delete_remote.unwrap_or(true) {
        state.retention.delete_backup(&backup).await?;
    } else {
        state.accounting_repo.apply_deletion(&backup).await?;
    }

    state
        .activity
        .log(
            &auth.actor(),
            actions::BACKUP_DELETE,
            "backup",
            Some(backup_id.into_uuid()),
            Some(backup.filename.clone()),
            serde_json::json!({"freed_bytes": backup.size_bytes}),
        )
        .await;

    Ok(Json(DeleteResponse {
        success: true,
        freed_bytes: backup.size_bytes,
    }))
}

/// DELETE /api/backups/:id/cancel-deletion
///
/// Clears a scheduled deletion; the backup re-enters accounting-as-kept
/// immediately.
pub async fn cancel_scheduled_deletion(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(backup_id): Path<BackupId>,
) -> Result<Json<AckResponse>, AppError> {
    let backup = state
        .backup_repo
        .find_by_id(backup_id)
        .await?
        .ok_or_else(|| AppError::not_found("Backup not found"))?;
    auth.require_site(&state, backup.site_id).await?;

    let cancelled = state.retention.cancel_scheduled(backup_id).await?;
    let message = if cancelled {
        format!("Cancelled scheduled deletion for {}", backup.filename)
    } else {
        "Backup was not scheduled for deletion".to_string()
    };

    if cancelled {
        state
            .activity
            .log(
                &auth.actor(),
                actions::BACKUP_DELETION_CANCELLED,
                "backup",
                Some(backup_id.into_uuid()),
                Some(backup.filename.clone()),
                serde_json::Value::Null,
            )
            .await;
    }

    Ok(Json(AckResponse::ok(message)))
}

/// Download link response.
#[derive(Debug, Serialize)]
pub struct DownloadResponse {
    /// Presigned GET URL, valid for one hour.
    pub url: String,
    /// Seconds the link stays valid.
    pub expires_seconds: u64,
}

/// GET /api/backups/:id/download
///
/// Restore is a manual recipe: download the archive through this link,
/// unpack it, import `database.sql`, and copy `wp-content` back.
pub async fn download_backup(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(backup_id): Path<BackupId>,
) -> Result<Json<DownloadResponse>, AppError> {
    let backup = state
        .backup_repo
        .find_by_id(backup_id)
        .await?
        .ok_or_else(|| AppError::not_found("Backup not found"))?;
    auth.require_site(&state, backup.site_id).await?;

    let object_path = backup
        .object_path
        .as_deref()
        .ok_or_else(|| AppError::not_found("Backup has no stored object"))?;
    let provider_id = backup
        .provider_id
        .ok_or_else(|| AppError::integrity("Backup has no provider"))?;
    let provider = state
        .provider_repo
        .find_by_id(provider_id)
        .await?
        .ok_or_else(|| AppError::integrity("Backup references a missing provider"))?;

    let ttl = RetentionService::download_link_ttl();
    let store = state.storage_access.open(&provider).await?;
    let url = store.presign_get(object_path, ttl).await?;

    Ok(Json(DownloadResponse {
        url,
        expires_seconds: ttl.as_secs(),
    }))
}
