//! Managed node entity.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;

use backhub_core::types::id::NodeId;

/// Lifecycle status of a managed node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "node_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    /// Join requested, awaiting approval. Carries a registration code.
    Pending,
    /// Approved and operating. Holds exactly one API-key hash.
    Active,
    /// Refused; join requests from this host are rejected.
    Blocked,
    /// Administratively disabled without revoking enrollment.
    Inactive,
}

impl NodeStatus {
    /// Return the status as a lowercase string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Blocked => "blocked",
            Self::Inactive => "inactive",
        }
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A client server running the backup daemon.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Node {
    /// Unique node identifier; appears in object-store keys.
    pub id: NodeId,
    /// Reported hostname.
    pub hostname: String,
    /// Last known network address of the daemon's control listener.
    pub address: String,
    /// Lifecycle status.
    pub status: NodeStatus,
    /// 5-character enrollment code; present only while pending and
    /// cleared atomically at approval.
    pub registration_code: Option<String>,
    /// Immutable record of the code used at join; status polls resolve
    /// through it after the registration code has been cleared.
    pub join_code: Option<String>,
    /// SHA-256 hash of the node API key; non-null exactly when active.
    #[serde(skip_serializing, default)]
    pub api_key_hash: Option<String>,
    /// One-shot delivery slot: plaintext key parked between approval and
    /// the first successful status poll, then cleared atomically.
    #[serde(skip_serializing, default)]
    pub api_key_plain: Option<String>,
    /// Upper bound on the sum of this node's site quotas.
    pub storage_quota_bytes: i64,
    /// Accounted bytes across all sites on this node.
    pub storage_used_bytes: i64,
    /// When the node was first seen.
    pub created_at: DateTime<Utc>,
    /// Last heartbeat or authenticated request.
    pub last_seen_at: Option<DateTime<Utc>>,
}

impl Node {
    /// Remaining quota after current usage, never negative.
    pub fn remaining_quota_bytes(&self) -> i64 {
        (self.storage_quota_bytes - self.storage_used_bytes).max(0)
    }

    /// Whether the node may execute backups.
    pub fn is_active(&self) -> bool {
        self.status == NodeStatus::Active
    }
}

/// Payload recorded for an incoming join request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinRequest {
    /// Hostname reported by the daemon.
    pub hostname: String,
    /// Address the master should use to reach the daemon.
    pub address: String,
    /// Registration code generated and displayed by the daemon.
    pub code: String,
}
