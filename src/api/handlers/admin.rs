//! Administrative session management.

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
};
use std::sync::Arc;
use tracing::info;

use crate::auth::{AuthError, AuthState, ErrorBody, Principal};
use crate::users::Role;

/// Revoke a session lineage by id. Refresh tokens of the lineage stop working
/// immediately; already issued access tokens run out on their own.
#[utoipa::path(
    delete,
    path = "/v1/admin/sessions/{session_id}",
    params(
        ("session_id" = String, Path, description = "Session lineage id (`sid` claim)")
    ),
    responses(
        (status = 204, description = "Session revoked"),
        (status = 401, description = "Missing or invalid access token.", body = ErrorBody),
        (status = 403, description = "Caller is not an admin.", body = ErrorBody),
        (status = 404, description = "Unknown or expired session."),
        (status = 503, description = "Session store unavailable.", body = ErrorBody)
    ),
    security(("bearer" = [])),
    tag = "admin"
)]
pub async fn revoke_session(
    principal: Principal,
    auth_state: Extension<Arc<AuthState>>,
    Path(session_id): Path<String>,
) -> Result<StatusCode, AuthError> {
    principal.require_role(&[Role::Admin])?;

    if auth_state.sessions().logout_session(&session_id).await? {
        info!(admin = %principal.user_id, session_id, "session revoked");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Ok(StatusCode::NOT_FOUND)
    }
}
