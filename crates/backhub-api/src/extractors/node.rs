//! `AuthNode` extractor — authenticates daemons by `X-API-KEY`.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use backhub_auth::apikey;
use backhub_core::error::AppError;
use backhub_entity::node::Node;

use crate::state::AppState;

/// Authenticated node context for daemon-facing endpoints.
#[derive(Debug, Clone)]
pub struct AuthNode(pub Node);

impl std::ops::Deref for AuthNode {
    type Target = Node;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl FromRequestParts<AppState> for AuthNode {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let presented = parts
            .headers
            .get("x-api-key")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| AppError::authentication("Missing X-API-KEY header"))?;

        // The hash is the lookup key; the constant-time comparison guards
        // against a forged digest collision in the index lookup path.
        let hash = apikey::hash_api_key(presented);
        let node = state
            .node_repo
            .find_active_by_key_hash(&hash)
            .await?
            .ok_or_else(|| AppError::authentication("Unknown or inactive API key"))?;

        let stored = node
            .api_key_hash
            .as_deref()
            .ok_or_else(|| AppError::integrity("Active node has no API key hash"))?;
        if !apikey::verify_api_key(presented, stored) {
            return Err(AppError::authentication("API key mismatch"));
        }

        state.node_repo.touch_last_seen(node.id).await.ok();

        Ok(AuthNode(node))
    }
}
