//! `AuthUser` extractor — validates the bearer token and loads request context.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use backhub_core::error::AppError;
use backhub_core::result::AppResult;
use backhub_core::types::id::{NodeId, SiteId, UserId};
use backhub_entity::user::UserRole;
use backhub_service::activity::ActorContext;

use crate::state::AppState;

/// Authenticated user context available in handlers.
#[derive(Debug, Clone)]
pub struct AuthUser {
    /// The user's id.
    pub user_id: UserId,
    /// Role at token issuance.
    pub role: UserRole,
    /// Source address.
    pub ip_address: Option<String>,
    /// Coarse user agent.
    pub user_agent: Option<String>,
}

impl AuthUser {
    /// The activity-log context for this request.
    pub fn actor(&self) -> ActorContext {
        ActorContext {
            actor_id: Some(self.user_id),
            ip_address: self.ip_address.clone(),
            user_agent: self.user_agent.clone(),
        }
    }

    /// Whether the user may observe a node: super admin, or the node is
    /// in their assigned set.
    pub async fn can_view_node(&self, state: &AppState, node_id: NodeId) -> AppResult<bool> {
        if self.role.is_super_admin() {
            return Ok(true);
        }
        if self.role == UserRole::NodeAdmin {
            return state
                .assignment_repo
                .is_node_assigned(self.user_id, node_id)
                .await;
        }
        Ok(false)
    }

    /// Whether the user may observe a site, per the RBAC table: super
    /// admin sees everything, a node admin sees sites on assigned nodes,
    /// a site admin only directly assigned sites.
    pub async fn can_view_site(&self, state: &AppState, site_id: SiteId) -> AppResult<bool> {
        match self.role {
            UserRole::SuperAdmin => Ok(true),
            UserRole::NodeAdmin => {
                state
                    .assignment_repo
                    .is_site_on_assigned_node(self.user_id, site_id)
                    .await
            }
            UserRole::SiteAdmin => {
                state
                    .assignment_repo
                    .is_site_assigned(self.user_id, site_id)
                    .await
            }
        }
    }

    /// Error-raising variant of [`Self::can_view_site`].
    pub async fn require_site(&self, state: &AppState, site_id: SiteId) -> AppResult<()> {
        if self.can_view_site(state, site_id).await? {
            Ok(())
        } else {
            Err(AppError::authorization("Access to this site is denied"))
        }
    }

    /// Error-raising variant of [`Self::can_view_node`].
    pub async fn require_node(&self, state: &AppState, node_id: NodeId) -> AppResult<()> {
        if self.can_view_node(state, node_id).await? {
            Ok(())
        } else {
            Err(AppError::authorization("Access to this node is denied"))
        }
    }
}

/// Pull request metadata shared by both auth extractors.
pub(crate) fn request_meta(parts: &Parts) -> (Option<String>, Option<String>) {
    let ip = parts
        .headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.split(',').next().unwrap_or(v).trim().to_string());
    let agent = parts
        .headers
        .get("user-agent")
        .and_then(|v| v.to_str().ok())
        .map(String::from);
    (ip, agent)
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let auth_header = parts
            .headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| AppError::authentication("Missing Authorization header"))?;

        let token = auth_header
            .strip_prefix("Bearer ")
            .ok_or_else(|| AppError::authentication("Invalid Authorization header format"))?;

        // Full scope required: an mfa-pending token only reaches the OTP
        // redemption endpoint, which decodes manually.
        let claims = state.tokens.decode_full(token)?;

        let (ip_address, user_agent) = request_meta(parts);

        Ok(AuthUser {
            user_id: claims.user_id(),
            role: claims.role,
            ip_address,
            user_agent,
        })
    }
}
