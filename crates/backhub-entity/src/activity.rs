//! Activity log entity.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use backhub_core::types::id::{ActivityId, UserId};

/// Number of entries kept per actor; older ones are pruned on insert.
pub const ACTIVITY_RETENTION_PER_ACTOR: i64 = 100;

/// An append-only audit trail entry.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ActivityEntry {
    /// Unique entry identifier.
    pub id: ActivityId,
    /// Acting user; null for system and CLI actions.
    pub actor_id: Option<UserId>,
    /// Action kind, e.g. `node.approve`, `backup.delete`.
    pub action: String,
    /// Kind of target: `node`, `site`, `backup`, `provider`, `user`.
    pub target_type: String,
    /// Target entity id, when applicable.
    pub target_id: Option<Uuid>,
    /// Human-readable target name at the time of the action.
    pub target_name: Option<String>,
    /// Source address of the request.
    pub ip_address: Option<String>,
    /// Coarse user agent.
    pub user_agent: Option<String>,
    /// Free-form detail map.
    pub details: serde_json::Value,
    /// When the action happened.
    pub created_at: DateTime<Utc>,
}

/// Data required to append an activity entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateActivityEntry {
    /// Acting user; null for system and CLI actions.
    pub actor_id: Option<UserId>,
    /// Action kind.
    pub action: String,
    /// Kind of target.
    pub target_type: String,
    /// Target entity id.
    pub target_id: Option<Uuid>,
    /// Human-readable target name.
    pub target_name: Option<String>,
    /// Source address.
    pub ip_address: Option<String>,
    /// Coarse user agent.
    pub user_agent: Option<String>,
    /// Free-form detail map.
    pub details: serde_json::Value,
}

impl CreateActivityEntry {
    /// A system-originated entry with no actor or request context.
    pub fn system(action: &str, target_type: &str, target_id: Option<Uuid>) -> Self {
        Self {
            actor_id: None,
            action: action.to_string(),
            target_type: target_type.to_string(),
            target_id,
            target_name: None,
            ip_address: None,
            user_agent: None,
            details: serde_json::Value::Null,
        }
    }
}
