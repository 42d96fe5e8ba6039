//! Role-based access checks.
//!
//! Pure role gates live here; the assignment-scoped checks (which nodes
//! and sites a non-super-admin may see) combine these with the M:N
//! assignment tables at the API layer.

use backhub_core::error::AppError;
use backhub_core::result::AppResult;
use backhub_entity::user::UserRole;

/// Stateless role gate.
#[derive(Debug, Clone, Default)]
pub struct RbacEnforcer;

impl RbacEnforcer {
    /// Create a new enforcer.
    pub fn new() -> Self {
        Self
    }

    /// Only the super admin passes.
    pub fn require_super_admin(&self, role: UserRole) -> AppResult<()> {
        if role.is_super_admin() {
            Ok(())
        } else {
            Err(AppError::authorization("Super admin privileges required"))
        }
    }

    /// Node admins and above pass.
    pub fn require_node_admin(&self, role: UserRole) -> AppResult<()> {
        if role.has_at_least(&UserRole::NodeAdmin) {
            Ok(())
        } else {
            Err(AppError::authorization("Node admin privileges required"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn super_admin_gate() {
        let rbac = RbacEnforcer::new();
        assert!(rbac.require_super_admin(UserRole::SuperAdmin).is_ok());
        assert!(rbac.require_super_admin(UserRole::NodeAdmin).is_err());
    }

    #[test]
    fn node_admin_gate() {
        let rbac = RbacEnforcer::new();
        assert!(rbac.require_node_admin(UserRole::SuperAdmin).is_ok());
        assert!(rbac.require_node_admin(UserRole::NodeAdmin).is_ok());
        assert!(rbac.require_node_admin(UserRole::SiteAdmin).is_err());
    }
}
