//! HTTP client for daemon control listeners.
//!
//! The master forwards backup start/stop and temp-dir sweeps to the
//! daemon's control port at the node's last-known address. Control
//! requests are short; anything slow happens inside the daemon.

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use backhub_core::error::AppError;
use backhub_core::result::AppResult;
use backhub_entity::node::Node;

/// Client for the daemon's control API.
#[derive(Debug, Clone)]
pub struct NodeControlClient {
    http: reqwest::Client,
}

impl Default for NodeControlClient {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeControlClient {
    /// Create the client.
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(15))
                .build()
                .expect("reqwest client construction cannot fail with static config"),
        }
    }

    fn base_url(node: &Node) -> AppResult<String> {
        if node.address.is_empty() {
            return Err(AppError::config("Node has no known address"));
        }
        let address = if node.address.starts_with("http") {
            node.address.clone()
        } else {
            format!("http://{}", node.address)
        };
        Ok(address.trim_end_matches('/').to_string())
    }

    async fn post<T: DeserializeOwned>(
        &self,
        node: &Node,
        path: &str,
        body: Value,
    ) -> AppResult<T> {
        let url = format!("{}{}", Self::base_url(node)?, path);
        debug!(node_id = %node.id, url = %url, "Forwarding control request");

        let response = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::transient(format!("Node unreachable: {e}")))?;

        let status = response.status();
        if status == reqwest::StatusCode::CONFLICT {
            return Err(AppError::conflict("Node refused: job already running"));
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(AppError::transient(format!(
                "Node control request failed ({status}): {text}"
            )));
        }

        response
            .json()
            .await
            .map_err(|e| AppError::transient(format!("Bad node response: {e}")))
    }

    /// Ask the daemon to start a backup for a site at the given epoch.
    pub async fn start_backup(
        &self,
        node: &Node,
        site_id: uuid::Uuid,
        epoch: i64,
    ) -> AppResult<Value> {
        self.post(
            node,
            "/control/backup/start",
            serde_json::json!({ "site_id": site_id, "epoch": epoch }),
        )
        .await
    }

    /// Ask the daemon to cancel the running backup for a site.
    pub async fn stop_backup(&self, node: &Node, site_id: uuid::Uuid) -> AppResult<Value> {
        self.post(
            node,
            "/control/backup/stop",
            serde_json::json!({ "site_id": site_id }),
        )
        .await
    }

    /// Ask the daemon to sweep a site's temp directories.
    pub async fn sweep_site(&self, node: &Node, site_id: uuid::Uuid) -> AppResult<Value> {
        self.post(
            node,
            &format!("/control/sweep/{site_id}"),
            Value::Null,
        )
        .await
    }
}
