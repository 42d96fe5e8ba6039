//! HTTP client for the master API.

use std::time::Duration;

use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use backhub_core::error::{AppError, ErrorKind};
use backhub_core::result::AppResult;
use backhub_core::types::id::SiteId;
use backhub_entity::backup::{Backup, BackupReport};
use backhub_entity::node::JoinRequest;
use backhub_entity::progress::{ProgressOutcome, ProgressPatch};
use backhub_entity::provider::ProviderCredentials;
use backhub_entity::site::{DiscoveredSite, Site};

/// Pre-flight answer the upload stage acts on.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct PreflightAnswer {
    /// Whether the upload may proceed.
    pub can_proceed: bool,
    /// Which bound would be exceeded, if any.
    pub exceeded: Option<String>,
    /// Human-readable warning.
    pub warning: Option<String>,
}

/// Ack for a progress write.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct ProgressAck {
    /// False when the write was dropped as stale.
    pub applied: bool,
    /// Cooperative cancellation flag.
    pub stop_requested: bool,
}

/// Enrollment status poll answer.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct EnrollmentPoll {
    /// `pending`, `active`, `blocked`, `inactive`.
    pub status: String,
    /// Plaintext API key, present exactly once after approval.
    pub api_key: Option<String>,
}

/// Client for every call the daemon makes against the master.
#[derive(Debug, Clone)]
pub struct MasterClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl MasterClient {
    /// Create a client; the API key is absent until enrollment finishes.
    pub fn new(base_url: &str, api_key: Option<String>) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .expect("reqwest client construction cannot fail with static config"),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        }
    }

    /// Install the API key after enrollment.
    pub fn with_api_key(&self, api_key: String) -> Self {
        Self {
            http: self.http.clone(),
            base_url: self.base_url.clone(),
            api_key: Some(api_key),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn authed(&self, req: reqwest::RequestBuilder) -> AppResult<reqwest::RequestBuilder> {
        let key = self
            .api_key
            .as_deref()
            .ok_or_else(|| AppError::config("Daemon is not enrolled yet"))?;
        Ok(req.header("X-API-KEY", key))
    }

    async fn handle<T: DeserializeOwned>(response: reqwest::Response) -> AppResult<T> {
        let status = response.status();
        if status.is_success() {
            return response
                .json()
                .await
                .map_err(|e| AppError::transient(format!("Bad master response: {e}")));
        }

        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<Value>(&body)
            .ok()
            .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(String::from))
            .unwrap_or(body);

        let kind = match status {
            StatusCode::CONFLICT => ErrorKind::Conflict,
            StatusCode::NOT_FOUND => ErrorKind::NotFound,
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ErrorKind::Authentication,
            StatusCode::UNPROCESSABLE_ENTITY => ErrorKind::QuotaExceeded,
            _ => ErrorKind::Transient,
        };
        Err(AppError::new(kind, format!("Master returned {status}: {message}")))
    }

    // ── Enrollment (public endpoints) ────────────────────────

    /// Submit a join request.
    pub async fn join_request(&self, request: &JoinRequest) -> AppResult<Value> {
        let response = self
            .http
            .post(self.url("/api/nodes/join-request"))
            .json(request)
            .send()
            .await
            .map_err(|e| AppError::transient(format!("Master unreachable: {e}")))?;
        Self::handle(response).await
    }

    /// Poll enrollment status by code.
    pub async fn poll_status(&self, code: &str) -> AppResult<EnrollmentPoll> {
        let response = self
            .http
            .get(self.url(&format!("/api/nodes/status/code/{code}")))
            .send()
            .await
            .map_err(|e| AppError::transient(format!("Master unreachable: {e}")))?;
        Self::handle(response).await
    }

    // ── Authenticated node endpoints ─────────────────────────

    /// Fetch this node's sites.
    pub async fn my_sites(&self) -> AppResult<Vec<Site>> {
        let req = self.authed(self.http.get(self.url("/api/daemon/sites")))?;
        Self::handle(req.send().await.map_err(transient)?).await
    }

    /// Fetch one site.
    pub async fn get_site(&self, site_id: SiteId) -> AppResult<Site> {
        let req = self.authed(self.http.get(self.url(&format!("/api/daemon/sites/{site_id}"))))?;
        Self::handle(req.send().await.map_err(transient)?).await
    }

    /// Persist a computed next run.
    pub async fn update_next_run(
        &self,
        site_id: SiteId,
        next_run_at: Option<chrono::DateTime<chrono::Utc>>,
    ) -> AppResult<Value> {
        let req = self.authed(
            self.http
                .post(self.url(&format!("/api/daemon/sites/{site_id}/next-run")))
                .json(&serde_json::json!({"next_run_at": next_run_at})),
        )?;
        Self::handle(req.send().await.map_err(transient)?).await
    }

    /// Report scanner discoveries.
    pub async fn report_sites(&self, sites: &[DiscoveredSite]) -> AppResult<Vec<Site>> {
        let req = self.authed(
            self.http
                .post(self.url("/api/daemon/sites/report"))
                .json(sites),
        )?;
        Self::handle(req.send().await.map_err(transient)?).await
    }

    /// Claim a new epoch for a job. 409 while one is running.
    pub async fn begin_progress(&self, site_id: SiteId) -> AppResult<i64> {
        #[derive(serde::Deserialize)]
        struct Begin {
            epoch: i64,
        }
        let req = self.authed(
            self.http
                .post(self.url(&format!("/api/daemon/progress/begin/{site_id}"))),
        )?;
        let begin: Begin = Self::handle(req.send().await.map_err(transient)?).await?;
        Ok(begin.epoch)
    }

    /// Write a progress patch; the ack carries the stop flag.
    pub async fn update_progress(
        &self,
        site_id: SiteId,
        epoch: i64,
        patch: &ProgressPatch,
    ) -> AppResult<ProgressAck> {
        let mut body = serde_json::to_value(patch)?;
        body["epoch"] = serde_json::json!(epoch);
        let req = self.authed(
            self.http
                .post(self.url(&format!("/api/daemon/progress/{site_id}")))
                .json(&body),
        )?;
        Self::handle(req.send().await.map_err(transient)?).await
    }

    /// Publish the terminal outcome.
    pub async fn finish_progress(
        &self,
        site_id: SiteId,
        epoch: i64,
        outcome: &ProgressOutcome,
    ) -> AppResult<ProgressAck> {
        let mut body = serde_json::to_value(outcome)?;
        body["epoch"] = serde_json::json!(epoch);
        let req = self.authed(
            self.http
                .post(self.url(&format!("/api/daemon/progress/{site_id}/finish")))
                .json(&body),
        )?;
        Self::handle(req.send().await.map_err(transient)?).await
    }

    /// Pre-flight quota check with the on-disk bundle size.
    pub async fn quota_preflight(
        &self,
        site_id: SiteId,
        estimated_bytes: i64,
    ) -> AppResult<PreflightAnswer> {
        let req = self.authed(self.http.get(self.url(&format!(
            "/api/daemon/quota/check/{site_id}?estimated_bytes={estimated_bytes}"
        ))))?;
        Self::handle(req.send().await.map_err(transient)?).await
    }

    /// Fetch unsealed storage credentials for the upload stage.
    pub async fn storage_config(&self) -> AppResult<ProviderCredentials> {
        let req = self.authed(self.http.get(self.url("/api/nodes/storage-config")))?;
        Self::handle(req.send().await.map_err(transient)?).await
    }

    /// Report a finished backup for accounting.
    pub async fn report_backup(&self, report: &BackupReport) -> AppResult<Backup> {
        let req = self.authed(
            self.http
                .post(self.url("/api/daemon/backups/report"))
                .json(report),
        )?;
        Self::handle(req.send().await.map_err(transient)?).await
    }

    /// Send the stats beacon.
    pub async fn heartbeat(&self, active_jobs: u32, temp_bytes: u64) -> AppResult<Value> {
        let req = self.authed(self.http.post(self.url("/api/daemon/heartbeat")).json(
            &serde_json::json!({
                "active_jobs": active_jobs,
                "temp_bytes": temp_bytes,
                "version": env!("CARGO_PKG_VERSION"),
            }),
        ))?;
        debug!(active_jobs, temp_bytes, "Sending heartbeat");
        Self::handle(req.send().await.map_err(transient)?).await
    }
}

fn transient(e: reqwest::Error) -> AppError {
    AppError::transient(format!("Master unreachable: {e}"))
}
