//! Activity log handlers.

use axum::Json;
use axum::extract::{Query, State};
use serde::Deserialize;

use backhub_core::error::AppError;
use backhub_core::types::pagination::{PageRequest, PageResponse};
use backhub_entity::activity::ActivityEntry;

use crate::extractors::AuthUser;
use crate::state::AppState;

/// Query for activity search.
#[derive(Debug, Deserialize)]
pub struct ActivityQuery {
    /// Filter by action name.
    pub action: Option<String>,
    /// Page number.
    pub page: Option<u64>,
    /// Page size.
    pub page_size: Option<u64>,
}

/// GET /api/activity
///
/// Super admins see the whole log; everyone else only their own actions.
pub async fn search_activity(
    State(state): State<AppState>,
    auth: AuthUser,
    Query(query): Query<ActivityQuery>,
) -> Result<Json<PageResponse<ActivityEntry>>, AppError> {
    let page = PageRequest::new(query.page.unwrap_or(1), query.page_size.unwrap_or(25));
    let actor = if auth.role.is_super_admin() {
        None
    } else {
        Some(auth.user_id)
    };
    Ok(Json(
        state
            .activity_repo
            .search(actor, query.action.as_deref(), &page)
            .await?,
    ))
}
