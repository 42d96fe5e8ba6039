//! Node enrollment and management handlers.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use serde::Deserialize;

use backhub_core::error::AppError;
use backhub_core::types::id::NodeId;
use backhub_entity::node::{JoinRequest, Node};
use backhub_service::activity::actions;
use backhub_service::enrollment::{EnrollmentStatus, JoinResponse};

use crate::extractors::{AuthNode, AuthUser};
use crate::state::AppState;

/// POST /api/nodes/join-request — public.
pub async fn join_request(
    State(state): State<AppState>,
    Json(body): Json<JoinRequest>,
) -> Result<(StatusCode, Json<JoinResponse>), AppError> {
    let response = state.enrollment.join(&body).await?;

    state
        .activity
        .log(
            &Default::default(),
            actions::NODE_JOIN,
            "node",
            Some(response.request_id.into_uuid()),
            Some(body.hostname.clone()),
            serde_json::json!({"address": body.address, "code": response.code}),
        )
        .await;

    Ok((StatusCode::CREATED, Json(response)))
}

/// GET /api/nodes/status/code/:code — public.
///
/// Returns the enrollment status; delivers the API key exactly once upon
/// first observation of the active state.
pub async fn status_by_code(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> Result<Json<EnrollmentStatus>, AppError> {
    let status = state.enrollment.status_by_code(&code).await?;
    Ok(Json(status))
}

/// POST /api/nodes/approve/:id — super admin.
pub async fn approve(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(node_id): Path<NodeId>,
) -> Result<Json<Node>, AppError> {
    state.rbac.require_super_admin(auth.role)?;
    let node = state.enrollment.approve(node_id, None).await?;

    state
        .activity
        .log(
            &auth.actor(),
            actions::NODE_APPROVE,
            "node",
            Some(node.id.into_uuid()),
            Some(node.hostname.clone()),
            serde_json::Value::Null,
        )
        .await;

    Ok(Json(node))
}

/// Register-by-code request body.
#[derive(Debug, Deserialize)]
pub struct RegisterByCodeRequest {
    /// The 5-character code from the node's console.
    pub code: String,
    /// Address the master should use to reach the node.
    pub address: Option<String>,
}

/// POST /api/nodes/register-by-code — super admin.
pub async fn register_by_code(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(body): Json<RegisterByCodeRequest>,
) -> Result<Json<Node>, AppError> {
    state.rbac.require_super_admin(auth.role)?;
    let node = state
        .enrollment
        .register_by_code(&body.code, body.address.as_deref())
        .await?;

    state
        .activity
        .log(
            &auth.actor(),
            actions::NODE_APPROVE,
            "node",
            Some(node.id.into_uuid()),
            Some(node.hostname.clone()),
            serde_json::json!({"method": "register_by_code"}),
        )
        .await;

    Ok(Json(node))
}

/// GET /api/nodes — RBAC filtered.
pub async fn list_nodes(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<Vec<Node>>, AppError> {
    let nodes = if auth.role.is_super_admin() {
        state.node_repo.find_all().await?
    } else {
        state.node_repo.find_assigned(auth.user_id).await?
    };
    Ok(Json(nodes))
}

/// GET /api/nodes/:id
pub async fn get_node(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(node_id): Path<NodeId>,
) -> Result<Json<Node>, AppError> {
    auth.require_node(&state, node_id).await?;
    let node = state
        .node_repo
        .find_by_id(node_id)
        .await?
        .ok_or_else(|| AppError::not_found("Node not found"))?;
    Ok(Json(node))
}

/// GET /api/nodes/:id/sites
pub async fn list_node_sites(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(node_id): Path<NodeId>,
) -> Result<Json<Vec<backhub_entity::site::Site>>, AppError> {
    auth.require_node(&state, node_id).await?;
    Ok(Json(state.site_repo.find_by_node(node_id).await?))
}

/// Node quota update body.
#[derive(Debug, Deserialize)]
pub struct NodeQuotaUpdate {
    /// New quota in bytes.
    pub quota_bytes: i64,
}

/// PUT /api/nodes/:id/quota — super admin.
pub async fn update_quota(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(node_id): Path<NodeId>,
    Json(body): Json<NodeQuotaUpdate>,
) -> Result<Json<Node>, AppError> {
    state.rbac.require_super_admin(auth.role)?;

    if body.quota_bytes <= 0 {
        return Err(AppError::validation("Quota must be positive"));
    }

    let node = state
        .node_repo
        .find_by_id(node_id)
        .await?
        .ok_or_else(|| AppError::not_found("Node not found"))?;

    // A node quota below the sum of its site quotas would break the
    // site-quota invariant.
    let sites_total = state.site_repo.sum_quota_on_node(node_id, None).await?;
    if body.quota_bytes < sites_total {
        return Err(AppError::validation(format!(
            "Node quota cannot drop below the {sites_total} bytes already granted to its sites"
        )));
    }

    state.node_repo.update_quota(node_id, body.quota_bytes).await?;

    state
        .activity
        .log(
            &auth.actor(),
            actions::NODE_QUOTA_UPDATE,
            "node",
            Some(node_id.into_uuid()),
            Some(node.hostname.clone()),
            serde_json::json!({
                "old_quota": node.storage_quota_bytes,
                "new_quota": body.quota_bytes,
            }),
        )
        .await;

    let node = state
        .node_repo
        .find_by_id(node_id)
        .await?
        .ok_or_else(|| AppError::not_found("Node not found"))?;
    Ok(Json(node))
}

/// GET /api/nodes/storage-config — node auth.
///
/// Hands the daemon unsealed credentials for its assigned provider.
/// Plaintext travels only over TLS and is never persisted by the node.
pub async fn storage_config(
    State(state): State<AppState>,
    node: AuthNode,
) -> Result<Json<backhub_entity::provider::ProviderCredentials>, AppError> {
    let provider = state
        .provider_repo
        .find_default()
        .await?
        .ok_or_else(|| AppError::not_found("No default storage provider configured"))?;

    let creds = state.storage_access.unseal(&provider).await?;
    tracing::debug!(node_id = %node.id, provider_id = %provider.id, "Issued storage credentials");
    Ok(Json(creds))
}
