//! Authenticated self-service endpoint.
//!
//! Flow Overview:
//! 1) The access guard attaches a [`Principal`] to the request.
//! 2) Resolve the current user record by the principal's email.

use axum::{Json, extract::Extension};
use std::sync::Arc;

use super::types::UserResponse;
use crate::auth::{AuthError, AuthState, ErrorBody, Principal};

#[utoipa::path(
    get,
    path = "/v1/me",
    responses(
        (status = 200, description = "Return the authenticated user profile.", body = UserResponse),
        (status = 401, description = "Missing or invalid access token.", body = ErrorBody),
    ),
    security(("bearer" = [])),
    tag = "me"
)]
pub async fn get_me(
    principal: Principal,
    auth_state: Extension<Arc<AuthState>>,
) -> Result<Json<UserResponse>, AuthError> {
    let user = auth_state
        .users()
        .get_user_by_email(&principal.email)
        .await?
        .filter(|user| user.id == principal.user_id)
        .ok_or(AuthError::UnknownAccount)?;

    Ok(Json(UserResponse::from(user)))
}
