//! Activity logging helper.
//!
//! Handlers, workers, and the CLI record actions through this wrapper;
//! an audit failure is logged and swallowed so it can never fail the
//! operation it describes.

use std::sync::Arc;

use serde_json::Value;
use tracing::warn;
use uuid::Uuid;

use backhub_core::types::id::UserId;
use backhub_database::repositories::activity::ActivityRepository;
use backhub_entity::activity::CreateActivityEntry;

/// Well-known action names.
pub mod actions {
    pub const NODE_JOIN: &str = "node.join";
    pub const NODE_APPROVE: &str = "node.approve";
    pub const NODE_QUOTA_UPDATE: &str = "node.quota_update";
    pub const SITE_QUOTA_UPDATE: &str = "site.quota_update";
    pub const BACKUP_START: &str = "backup.start";
    pub const BACKUP_STOP: &str = "backup.stop";
    pub const BACKUP_RESET: &str = "backup.reset";
    pub const BACKUP_DELETE: &str = "backup.delete";
    pub const BACKUP_DELETION_CANCELLED: &str = "backup.deletion_cancelled";
    pub const PROVIDER_ADD: &str = "provider.add";
    pub const RECONCILE_RUN: &str = "storage.reconcile";
    pub const USER_LOGIN: &str = "user.login";
    pub const USER_PASSWORD_RESET: &str = "user.password_reset";
    pub const USER_MFA_DISABLED: &str = "user.mfa_disabled";
}

/// Request context attached to logged actions.
#[derive(Debug, Clone, Default)]
pub struct ActorContext {
    /// Acting user, if any.
    pub actor_id: Option<UserId>,
    /// Source address.
    pub ip_address: Option<String>,
    /// Coarse user agent.
    pub user_agent: Option<String>,
}

/// Appends audit entries without ever failing the caller.
#[derive(Debug, Clone)]
pub struct ActivityLogger {
    repo: Arc<ActivityRepository>,
}

impl ActivityLogger {
    /// Create the activity logger.
    pub fn new(repo: Arc<ActivityRepository>) -> Self {
        Self { repo }
    }

    /// Record an action.
    pub async fn log(
        &self,
        ctx: &ActorContext,
        action: &str,
        target_type: &str,
        target_id: Option<Uuid>,
        target_name: Option<String>,
        details: Value,
    ) {
        let entry = CreateActivityEntry {
            actor_id: ctx.actor_id,
            action: action.to_string(),
            target_type: target_type.to_string(),
            target_id,
            target_name,
            ip_address: ctx.ip_address.clone(),
            user_agent: ctx.user_agent.clone(),
            details,
        };
        if let Err(e) = self.repo.create(&entry).await {
            warn!(action, error = %e, "Failed to record activity entry");
        }
    }
}
