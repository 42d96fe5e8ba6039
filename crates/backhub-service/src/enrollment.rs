//! Node enrollment: join requests, approval, one-shot key delivery.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use backhub_auth::apikey::{self, REGISTRATION_CODE_LEN};
use backhub_core::error::AppError;
use backhub_core::result::AppResult;
use backhub_core::types::id::NodeId;
use backhub_database::repositories::node::NodeRepository;
use backhub_entity::node::{JoinRequest, Node, NodeStatus};

/// Default quota handed to freshly joined nodes: 100 GiB.
const DEFAULT_NODE_QUOTA_BYTES: i64 = 100 * 1024 * 1024 * 1024;

/// Response to a join request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinResponse {
    /// Opaque id of the pending node, polled as the request id.
    pub request_id: NodeId,
    /// Registration code to display on the node's console.
    pub code: String,
    /// Human-readable status line.
    pub message: String,
}

/// Answer to a status poll.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrollmentStatus {
    /// Current node status.
    pub status: NodeStatus,
    /// Plaintext API key, present exactly once after approval.
    pub api_key: Option<String>,
}

/// The enrollment state machine.
#[derive(Debug, Clone)]
pub struct EnrollmentService {
    node_repo: Arc<NodeRepository>,
}

impl EnrollmentService {
    /// Create the enrollment service.
    pub fn new(node_repo: Arc<NodeRepository>) -> Self {
        Self { node_repo }
    }

    /// Handle a public join request.
    ///
    /// A hostname that is already pending gets its existing request back;
    /// a blocked hostname is refused; an active one is told so.
    pub async fn join(&self, request: &JoinRequest) -> AppResult<JoinResponse> {
        let code = normalize_code(&request.code)?;

        if let Some(existing) = self.node_repo.find_by_hostname(&request.hostname).await? {
            match existing.status {
                NodeStatus::Blocked => {
                    return Err(AppError::authorization("Node is blocked from joining"));
                }
                NodeStatus::Active => {
                    return Err(AppError::conflict("Node is already registered and active"));
                }
                NodeStatus::Pending | NodeStatus::Inactive => {
                    return Ok(JoinResponse {
                        request_id: existing.id,
                        code: existing
                            .registration_code
                            .clone()
                            .unwrap_or_else(|| code.clone()),
                        message: "Join request already pending".to_string(),
                    });
                }
            }
        }

        let mut node = Node {
            id: NodeId::new(),
            hostname: request.hostname.clone(),
            address: request.address.clone(),
            status: NodeStatus::Pending,
            registration_code: Some(code.clone()),
            join_code: Some(code.clone()),
            api_key_hash: None,
            api_key_plain: None,
            storage_quota_bytes: DEFAULT_NODE_QUOTA_BYTES,
            storage_used_bytes: 0,
            created_at: chrono::Utc::now(),
            last_seen_at: None,
        };
        node = self.node_repo.create_pending(&node).await?;

        info!(node_id = %node.id, hostname = %node.hostname, "Join request recorded");
        Ok(JoinResponse {
            request_id: node.id,
            code,
            message: "Join request submitted; waiting for approval".to_string(),
        })
    }

    /// Answer a status poll by code. On the first poll after approval
    /// the plaintext API key is handed over and the slot cleared; every
    /// later poll sees `api_key: null`.
    pub async fn status_by_code(&self, code: &str) -> AppResult<EnrollmentStatus> {
        let code = normalize_code(code)?;
        let node = self
            .node_repo
            .find_by_join_code(&code)
            .await?
            .ok_or_else(|| AppError::not_found("No node with this code"))?;

        let api_key = if node.status == NodeStatus::Active {
            self.node_repo.take_api_key(node.id).await?
        } else {
            None
        };

        Ok(EnrollmentStatus {
            status: node.status,
            api_key,
        })
    }

    /// Approve a pending node by id: generate the API key, store only its
    /// hash, activate, clear the registration code.
    pub async fn approve(&self, node_id: NodeId, address: Option<&str>) -> AppResult<Node> {
        let node = self
            .node_repo
            .find_by_id(node_id)
            .await?
            .ok_or_else(|| AppError::not_found("Node not found"))?;
        if node.status != NodeStatus::Pending {
            return Err(AppError::conflict(format!(
                "Node is {}; only pending nodes can be approved",
                node.status
            )));
        }

        let key = apikey::generate_api_key();
        let approved = self
            .node_repo
            .approve(node_id, &key.hash, &key.plaintext, address)
            .await?
            .ok_or_else(|| AppError::conflict("Node was approved concurrently"))?;

        info!(node_id = %node_id, hostname = %approved.hostname, "Node approved");
        Ok(approved)
    }

    /// Approve by registration code (the admin typed the code shown on
    /// the node's console).
    pub async fn register_by_code(&self, code: &str, address: Option<&str>) -> AppResult<Node> {
        let code = normalize_code(code)?;
        let node = self
            .node_repo
            .find_pending_by_code(&code)
            .await?
            .ok_or_else(|| AppError::not_found("No pending node with this code"))?;
        self.approve(node.id, address).await
    }
}

/// Uppercase and validate a registration code.
fn normalize_code(code: &str) -> AppResult<String> {
    let code = code.trim().to_uppercase();
    if code.len() != REGISTRATION_CODE_LEN {
        return Err(AppError::validation(format!(
            "Registration code must be {REGISTRATION_CODE_LEN} characters"
        )));
    }
    Ok(code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_normalization() {
        assert_eq!(normalize_code(" xk7m2 ").unwrap(), "XK7M2");
        assert!(normalize_code("ABC").is_err());
        assert!(normalize_code("TOOLONG").is_err());
    }
}
