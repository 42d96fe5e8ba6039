//! User entity and RBAC roles.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;

use backhub_core::error::AppError;
use backhub_core::types::id::UserId;

/// Roles available in the RBAC system.
///
/// Roles are ordered by privilege: SuperAdmin > NodeAdmin > SiteAdmin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "user_role", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    /// Sees and manages everything.
    SuperAdmin,
    /// Sees assigned nodes, their sites and backups.
    NodeAdmin,
    /// Sees only assigned sites.
    SiteAdmin,
}

impl UserRole {
    /// Return the privilege level (higher = more privileged).
    pub fn privilege_level(&self) -> u8 {
        match self {
            Self::SuperAdmin => 3,
            Self::NodeAdmin => 2,
            Self::SiteAdmin => 1,
        }
    }

    /// Check if this role has at least the given role's privileges.
    pub fn has_at_least(&self, other: &UserRole) -> bool {
        self.privilege_level() >= other.privilege_level()
    }

    /// Check if this role is the super admin.
    pub fn is_super_admin(&self) -> bool {
        matches!(self, Self::SuperAdmin)
    }

    /// Return the role as a snake_case string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SuperAdmin => "super_admin",
            Self::NodeAdmin => "node_admin",
            Self::SiteAdmin => "site_admin",
        }
    }
}

impl fmt::Display for UserRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for UserRole {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "super_admin" => Ok(Self::SuperAdmin),
            "node_admin" => Ok(Self::NodeAdmin),
            "site_admin" => Ok(Self::SiteAdmin),
            _ => Err(AppError::validation(format!(
                "Invalid user role: '{s}'. Expected one of: super_admin, node_admin, site_admin"
            ))),
        }
    }
}

/// A dashboard or API user.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    /// Unique user identifier.
    pub id: UserId,
    /// Login email, unique.
    pub email: String,
    /// Argon2id password hash.
    #[serde(skip_serializing, default)]
    pub password_hash: String,
    /// Display name.
    pub full_name: Option<String>,
    /// RBAC role.
    pub role: UserRole,
    /// Whether the account may log in.
    pub is_active: bool,
    /// Whether TOTP is required at login.
    pub mfa_enabled: bool,
    /// Sealed TOTP secret; null when MFA is off.
    #[serde(skip_serializing, default)]
    pub mfa_secret_sealed: Option<String>,
    /// When the account was created.
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_privilege_ordering() {
        assert!(UserRole::SuperAdmin.has_at_least(&UserRole::SiteAdmin));
        assert!(UserRole::NodeAdmin.has_at_least(&UserRole::NodeAdmin));
        assert!(!UserRole::SiteAdmin.has_at_least(&UserRole::NodeAdmin));
    }

    #[test]
    fn test_from_str() {
        assert_eq!(
            "super_admin".parse::<UserRole>().unwrap(),
            UserRole::SuperAdmin
        );
        assert_eq!("SITE_ADMIN".parse::<UserRole>().unwrap(), UserRole::SiteAdmin);
        assert!("root".parse::<UserRole>().is_err());
    }
}
