//! Signup, login, refresh rotation, logout and email-link endpoints.
//!
//! Every endpoint charges its route-class rate limit first, before the body is
//! inspected or any credential or token work happens. Refresh tokens are accepted from the JSON body or from the
//! `warden_refresh` cookie, and successful logins and refreshes set that cookie.

use axum::{
    Json,
    extract::Extension,
    http::{HeaderMap, HeaderValue, StatusCode, header::SET_COOKIE},
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use tracing::{debug, warn};

use super::types::{
    LoginRequest, PasswordResetConfirmRequest, PasswordResetRequest, RefreshRequest,
    ResendVerificationRequest, SignupRequest, UserResponse, VerifyEmailRequest,
};
use crate::auth::{
    AuthError, AuthState, ClientIdentity, ErrorBody, ResendOutcome, RouteClass, SignupInput,
    TokenPair,
    rate_limit::enforce,
    signup as create_account,
    utils::{REFRESH_COOKIE_NAME, clear_refresh_cookie, extract_cookie, refresh_cookie},
};

fn missing_payload() -> AuthError {
    AuthError::Validation("missing payload".to_string())
}

async fn charge(
    state: &AuthState,
    class: RouteClass,
    client: &ClientIdentity,
) -> Result<(), AuthError> {
    enforce(state.rate_limiter(), class, &client.0).await
}

/// Refresh token from the body, falling back to the cookie.
fn refresh_token_from(headers: &HeaderMap, payload: Option<Json<RefreshRequest>>) -> Option<String> {
    payload
        .and_then(|Json(request)| request.refresh_token)
        .map(|token| token.trim().to_string())
        .filter(|token| !token.is_empty())
        .or_else(|| extract_cookie(headers, REFRESH_COOKIE_NAME))
}

fn token_response(state: &AuthState, pair: TokenPair) -> Result<Response, AuthError> {
    let cookie = refresh_cookie(
        &pair.refresh_token,
        state.config().refresh_ttl(),
        state.config().cookie_secure(),
    )
    .map_err(|err| AuthError::Internal(format!("failed to build refresh cookie: {err}")))?;
    Ok((StatusCode::OK, [(SET_COOKIE, cookie)], Json(pair)).into_response())
}

fn cleared_cookie(state: &AuthState) -> Option<HeaderValue> {
    clear_refresh_cookie(state.config().cookie_secure())
        .map_err(|err| warn!("failed to build clearing cookie: {err}"))
        .ok()
}

#[utoipa::path(
    post,
    path = "/v1/auth/signup",
    request_body = SignupRequest,
    responses(
        (status = 201, description = "Account created, verification email queued", body = UserResponse),
        (status = 409, description = "Email already registered", body = ErrorBody),
        (status = 422, description = "Invalid username, email or password", body = ErrorBody),
        (status = 429, description = "Rate limited", body = ErrorBody)
    ),
    tag = "auth"
)]
pub async fn signup(
    client: ClientIdentity,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<SignupRequest>>,
) -> Result<Response, AuthError> {
    charge(&auth_state, RouteClass::Signup, &client).await?;
    let Some(Json(request)) = payload else {
        return Err(missing_payload());
    };

    let user = create_account(
        &auth_state,
        SignupInput {
            username: request.username,
            email: request.email,
            password: request.password,
        },
    )
    .await?;

    Ok((StatusCode::CREATED, Json(UserResponse::from(user))).into_response())
}

#[utoipa::path(
    post,
    path = "/v1/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Token pair issued; refresh token also set as cookie", body = TokenPair),
        (status = 401, description = "Invalid credentials", body = ErrorBody),
        (status = 403, description = "Email not verified", body = ErrorBody),
        (status = 429, description = "Rate limited", body = ErrorBody)
    ),
    tag = "auth"
)]
pub async fn login(
    client: ClientIdentity,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<LoginRequest>>,
) -> Result<Response, AuthError> {
    charge(&auth_state, RouteClass::Login, &client).await?;
    let Some(Json(request)) = payload else {
        return Err(missing_payload());
    };

    let pair = auth_state
        .sessions()
        .login(&request.email, &request.password)
        .await?;
    token_response(&auth_state, pair)
}

#[utoipa::path(
    post,
    path = "/v1/auth/refresh",
    request_body(content = RefreshRequest, description = "Optional when the refresh cookie is sent"),
    responses(
        (status = 200, description = "Rotated token pair", body = TokenPair),
        (status = 401, description = "Invalid, expired or already rotated refresh token", body = ErrorBody),
        (status = 429, description = "Rate limited", body = ErrorBody),
        (status = 503, description = "Session store unavailable", body = ErrorBody)
    ),
    tag = "auth"
)]
pub async fn refresh(
    client: ClientIdentity,
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<RefreshRequest>>,
) -> Result<Response, AuthError> {
    charge(&auth_state, RouteClass::Refresh, &client).await?;

    let token = refresh_token_from(&headers, payload).ok_or(AuthError::MissingToken)?;
    let pair = auth_state.sessions().refresh(&token).await?;
    token_response(&auth_state, pair)
}

#[utoipa::path(
    post,
    path = "/v1/auth/logout",
    request_body(content = RefreshRequest, description = "Optional when the refresh cookie is sent"),
    responses(
        (status = 204, description = "Session revoked and cookie cleared"),
        (status = 401, description = "Invalid or already revoked refresh token", body = ErrorBody),
        (status = 503, description = "Session store unavailable", body = ErrorBody)
    ),
    tag = "auth"
)]
pub async fn logout(
    client: ClientIdentity,
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<RefreshRequest>>,
) -> Result<Response, AuthError> {
    charge(&auth_state, RouteClass::Refresh, &client).await?;

    let token = refresh_token_from(&headers, payload).ok_or(AuthError::MissingToken)?;
    auth_state.sessions().logout(&token).await?;

    let mut response = StatusCode::NO_CONTENT.into_response();
    if let Some(cookie) = cleared_cookie(&auth_state) {
        response.headers_mut().insert(SET_COOKIE, cookie);
    }
    Ok(response)
}

#[utoipa::path(
    post,
    path = "/v1/auth/verify-email",
    request_body = VerifyEmailRequest,
    responses(
        (status = 204, description = "Email verified"),
        (status = 400, description = "Link expired, already used or invalid", body = ErrorBody),
        (status = 429, description = "Rate limited", body = ErrorBody)
    ),
    tag = "auth"
)]
pub async fn verify_email(
    client: ClientIdentity,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<VerifyEmailRequest>>,
) -> Response {
    if let Err(err) = charge(&auth_state, RouteClass::VerifyEmail, &client).await {
        return err.into_response();
    }
    let Some(Json(request)) = payload else {
        return missing_payload().into_response();
    };

    match auth_state.verification().redeem(request.token.trim()).await {
        Ok(email) => {
            debug!(email, "email verified");
            StatusCode::NO_CONTENT.into_response()
        }
        Err(err) => err.into_link_response(),
    }
}

/// Resend a verification email (always returns 204 to avoid user enumeration).
#[utoipa::path(
    post,
    path = "/v1/auth/resend-verification",
    request_body = ResendVerificationRequest,
    responses(
        (status = 204, description = "Resend accepted")
    ),
    tag = "auth"
)]
pub async fn resend_verification(
    client: ClientIdentity,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<ResendVerificationRequest>>,
) -> impl IntoResponse {
    let Some(Json(request)) = payload else {
        return StatusCode::NO_CONTENT;
    };
    if let Err(err) = charge(&auth_state, RouteClass::ResendVerification, &client).await {
        debug!("resend-verification suppressed: {err}");
        return StatusCode::NO_CONTENT;
    }

    match auth_state
        .verification()
        .resend_verification(&request.email)
        .await
    {
        Ok(ResendOutcome::Queued) => debug!("verification email re-queued"),
        Ok(ResendOutcome::Cooldown | ResendOutcome::Noop) => {}
        Err(err) => warn!("failed to resend verification: {err}"),
    }
    StatusCode::NO_CONTENT
}

/// Request a password reset link (always returns 204 to avoid user enumeration).
#[utoipa::path(
    post,
    path = "/v1/auth/password-reset",
    request_body = PasswordResetRequest,
    responses(
        (status = 204, description = "Reset request accepted")
    ),
    tag = "auth"
)]
pub async fn password_reset(
    client: ClientIdentity,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<PasswordResetRequest>>,
) -> impl IntoResponse {
    let Some(Json(request)) = payload else {
        return StatusCode::NO_CONTENT;
    };
    if let Err(err) = charge(&auth_state, RouteClass::PasswordReset, &client).await {
        debug!("password-reset suppressed: {err}");
        return StatusCode::NO_CONTENT;
    }

    match auth_state
        .verification()
        .request_password_reset(&request.email)
        .await
    {
        Ok(ResendOutcome::Queued) => debug!("password reset email queued"),
        Ok(ResendOutcome::Cooldown | ResendOutcome::Noop) => {}
        Err(err) => warn!("failed to queue password reset: {err}"),
    }
    StatusCode::NO_CONTENT
}

#[utoipa::path(
    post,
    path = "/v1/auth/password-reset/confirm",
    request_body = PasswordResetConfirmRequest,
    responses(
        (status = 204, description = "Password updated"),
        (status = 400, description = "Link expired, already used or invalid", body = ErrorBody),
        (status = 422, description = "New password rejected", body = ErrorBody),
        (status = 429, description = "Rate limited", body = ErrorBody)
    ),
    tag = "auth"
)]
pub async fn password_reset_confirm(
    client: ClientIdentity,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<PasswordResetConfirmRequest>>,
) -> Response {
    if let Err(err) = charge(&auth_state, RouteClass::PasswordReset, &client).await {
        return err.into_response();
    }
    let Some(Json(request)) = payload else {
        return missing_payload().into_response();
    };

    match auth_state
        .verification()
        .reset_password(request.token.trim(), &request.new_password)
        .await
    {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => err.into_link_response(),
    }
}
