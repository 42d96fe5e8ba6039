//! Storage provider administration and reconciliation handlers.

use axum::Json;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use serde::Deserialize;

use backhub_core::error::AppError;
use backhub_core::types::id::ProviderId;
use backhub_entity::provider::{ProviderKind, StorageProvider};
use backhub_service::activity::actions;
use backhub_service::reconcile::ReconcileReport;

use crate::extractors::AuthUser;
use crate::state::AppState;

/// GET /api/storage/providers — super admin.
pub async fn list_providers(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<Vec<StorageProvider>>, AppError> {
    state.rbac.require_super_admin(auth.role)?;
    Ok(Json(state.provider_repo.find_all().await?))
}

/// Provider creation body; keys arrive plaintext and are sealed before
/// they touch the database.
#[derive(Debug, Deserialize)]
pub struct CreateProviderRequest {
    /// Human-readable name.
    pub name: String,
    /// Store kind.
    pub kind: ProviderKind,
    /// Endpoint URL (S3-compatible) or root path (local).
    pub endpoint: String,
    /// Region hint.
    #[serde(default)]
    pub region: String,
    /// Bucket name.
    pub bucket: String,
    /// Plaintext access key.
    pub access_key: String,
    /// Plaintext secret key.
    pub secret_key: String,
    /// Capacity cap; 0 = unlimited.
    #[serde(default)]
    pub storage_limit_bytes: i64,
    /// Whether this becomes the default provider.
    #[serde(default)]
    pub is_default: bool,
}

/// POST /api/storage/providers — super admin.
pub async fn create_provider(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(body): Json<CreateProviderRequest>,
) -> Result<(StatusCode, Json<StorageProvider>), AppError> {
    state.rbac.require_super_admin(auth.role)?;

    if body.bucket.is_empty() {
        return Err(AppError::validation("Bucket is required"));
    }

    let provider = StorageProvider {
        id: ProviderId::new(),
        name: body.name.clone(),
        kind: body.kind,
        endpoint: body.endpoint.clone(),
        region: if body.region.is_empty() {
            "us-east-1".to_string()
        } else {
            body.region.clone()
        },
        bucket: body.bucket.clone(),
        access_key_sealed: state.seal.seal(&body.access_key)?,
        secret_key_sealed: state.seal.seal(&body.secret_key)?,
        storage_limit_bytes: body.storage_limit_bytes,
        storage_used_bytes: 0,
        is_default: body.is_default,
        is_active: true,
        created_at: chrono::Utc::now(),
    };
    let created = state.provider_repo.create(&provider).await?;

    state
        .activity
        .log(
            &auth.actor(),
            actions::PROVIDER_ADD,
            "provider",
            Some(created.id.into_uuid()),
            Some(created.name.clone()),
            serde_json::json!({"kind": created.kind, "bucket": created.bucket}),
        )
        .await;

    Ok((StatusCode::CREATED, Json(created)))
}

/// Query for the reconciliation endpoint.
#[derive(Debug, Deserialize)]
pub struct ReconcileQuery {
    /// Produce the diff without mutating anything.
    #[serde(default)]
    pub dry_run: bool,
}

/// POST /api/storage/reconcile?dry_run= — super admin.
pub async fn reconcile(
    State(state): State<AppState>,
    auth: AuthUser,
    Query(query): Query<ReconcileQuery>,
) -> Result<Json<ReconcileReport>, AppError> {
    state.rbac.require_super_admin(auth.role)?;

    let report = state.reconcile.run(query.dry_run).await?;

    state
        .activity
        .log(
            &auth.actor(),
            actions::RECONCILE_RUN,
            "provider",
            None,
            None,
            serde_json::json!({
                "dry_run": query.dry_run,
                "sites_with_drift": report.sites_with_drift,
                "total_drift_bytes": report.total_drift_bytes,
            }),
        )
        .await;

    Ok(Json(report))
}
