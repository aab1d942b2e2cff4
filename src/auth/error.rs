//! Error type shared by every auth component and its HTTP mapping.
//!
//! Credential, token and session failures all collapse into the same 401 body
//! so a caller cannot tell a wrong password from an unknown account or a
//! revoked session. Email-link redemption uses [`AuthError::into_link_response`]
//! instead, where the user does need to know whether to request a new link.

use axum::{
    Json,
    http::{
        HeaderMap, HeaderValue, StatusCode,
        header::{RETRY_AFTER, WWW_AUTHENTICATE},
    },
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error};
use utoipa::ToSchema;

use super::token::TokenError;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("email address not verified")]
    EmailNotVerified,
    #[error("missing bearer token")]
    MissingToken,
    #[error("invalid signature")]
    InvalidSignature,
    #[error("token expired")]
    Expired,
    #[error("unexpected token type")]
    TypeMismatch,
    #[error("malformed token")]
    Malformed,
    #[error("invalid session")]
    InvalidSession,
    #[error("token already used")]
    AlreadyUsed,
    #[error("unknown account")]
    UnknownAccount,
    #[error("rate limited, retry after {}s", retry_after.as_secs())]
    RateLimited { retry_after: Duration },
    #[error("forbidden")]
    Forbidden,
    #[error("already exists")]
    Conflict,
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("dependency unavailable: {0}")]
    DependencyUnavailable(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<StoreError> for AuthError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict => Self::Conflict,
            StoreError::Unavailable(message) => Self::DependencyUnavailable(message),
        }
    }
}

impl From<TokenError> for AuthError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Malformed => Self::Malformed,
            TokenError::InvalidSignature => Self::InvalidSignature,
            TokenError::Expired => Self::Expired,
            TokenError::TypeMismatch { .. } => Self::TypeMismatch,
            TokenError::Encode(message) => Self::Internal(message),
        }
    }
}

#[derive(ToSchema, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct ErrorBody {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ErrorBody {
    fn new(error: &str) -> Self {
        Self {
            error: error.to_string(),
            message: None,
        }
    }

    fn with_message(error: &str, message: impl Into<String>) -> Self {
        Self {
            error: error.to_string(),
            message: Some(message.into()),
        }
    }
}

impl AuthError {
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidCredentials
            | Self::MissingToken
            | Self::InvalidSignature
            | Self::Expired
            | Self::TypeMismatch
            | Self::Malformed
            | Self::InvalidSession
            | Self::UnknownAccount => StatusCode::UNAUTHORIZED,
            Self::EmailNotVerified | Self::Forbidden => StatusCode::FORBIDDEN,
            Self::AlreadyUsed => StatusCode::BAD_REQUEST,
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::Conflict => StatusCode::CONFLICT,
            Self::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::DependencyUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Response for email-link redemption (verification and password reset).
    #[must_use]
    pub fn into_link_response(self) -> Response {
        let message = match &self {
            Self::Expired => "link expired",
            Self::AlreadyUsed => "link already used",
            Self::InvalidSignature | Self::Malformed | Self::TypeMismatch | Self::UnknownAccount => {
                "invalid link"
            }
            _ => return self.into_response(),
        };
        debug!("email link rejected: {self}");
        (
            StatusCode::BAD_REQUEST,
            Json(ErrorBody::with_message("invalid_link", message)),
        )
            .into_response()
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = self.status();
        let mut headers = HeaderMap::new();
        let body = match &self {
            Self::InvalidCredentials
            | Self::MissingToken
            | Self::InvalidSignature
            | Self::Expired
            | Self::TypeMismatch
            | Self::Malformed
            | Self::InvalidSession
            | Self::UnknownAccount => {
                debug!("unauthenticated: {self}");
                headers.insert(WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
                ErrorBody::new("unauthenticated")
            }
            Self::EmailNotVerified => ErrorBody::new("email_not_verified"),
            Self::Forbidden => ErrorBody::new("forbidden"),
            Self::AlreadyUsed => ErrorBody::with_message("invalid_link", "link already used"),
            Self::RateLimited { retry_after } => {
                let seconds = retry_after.as_secs().max(1);
                if let Ok(value) = HeaderValue::from_str(&seconds.to_string()) {
                    headers.insert(RETRY_AFTER, value);
                }
                ErrorBody::new("rate_limited")
            }
            Self::Conflict => ErrorBody::new("conflict"),
            Self::Validation(message) => ErrorBody::with_message("validation", message.clone()),
            Self::DependencyUnavailable(message) => {
                error!("dependency unavailable: {message}");
                ErrorBody::new("unavailable")
            }
            Self::Internal(message) => {
                error!("internal error: {message}");
                ErrorBody::new("internal")
            }
        };
        (status, headers, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use axum::body::to_bytes;

    async fn body_of(response: Response) -> Result<ErrorBody> {
        let bytes = to_bytes(response.into_body(), usize::MAX).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    #[tokio::test]
    async fn unauthenticated_errors_share_one_shape() -> Result<()> {
        for err in [
            AuthError::InvalidCredentials,
            AuthError::InvalidSignature,
            AuthError::Expired,
            AuthError::InvalidSession,
            AuthError::UnknownAccount,
        ] {
            let response = err.into_response();
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
            assert_eq!(
                response.headers().get(WWW_AUTHENTICATE),
                Some(&HeaderValue::from_static("Bearer"))
            );
            assert_eq!(body_of(response).await?, ErrorBody::new("unauthenticated"));
        }
        Ok(())
    }

    #[tokio::test]
    async fn rate_limited_sets_retry_after() -> Result<()> {
        let response = AuthError::RateLimited {
            retry_after: Duration::from_secs(42),
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            response.headers().get(RETRY_AFTER),
            Some(&HeaderValue::from_static("42"))
        );

        let response = AuthError::RateLimited {
            retry_after: Duration::ZERO,
        }
        .into_response();
        assert_eq!(
            response.headers().get(RETRY_AFTER),
            Some(&HeaderValue::from_static("1"))
        );
        Ok(())
    }

    #[tokio::test]
    async fn link_responses_are_distinguishable() -> Result<()> {
        let expired = body_of(AuthError::Expired.into_link_response()).await?;
        let used = body_of(AuthError::AlreadyUsed.into_link_response()).await?;
        let invalid = body_of(AuthError::InvalidSignature.into_link_response()).await?;
        assert_eq!(expired.message.as_deref(), Some("link expired"));
        assert_eq!(used.message.as_deref(), Some("link already used"));
        assert_eq!(invalid.message.as_deref(), Some("invalid link"));

        let passthrough = AuthError::DependencyUnavailable("db".to_string()).into_link_response();
        assert_eq!(passthrough.status(), StatusCode::SERVICE_UNAVAILABLE);
        Ok(())
    }

    #[test]
    fn status_mapping() {
        assert_eq!(AuthError::EmailNotVerified.status(), StatusCode::FORBIDDEN);
        assert_eq!(AuthError::Forbidden.status(), StatusCode::FORBIDDEN);
        assert_eq!(AuthError::Conflict.status(), StatusCode::CONFLICT);
        assert_eq!(
            AuthError::Validation("x".to_string()).status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            AuthError::DependencyUnavailable("x".to_string()).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn conversions() {
        assert!(matches!(
            AuthError::from(StoreError::Conflict),
            AuthError::Conflict
        ));
        assert!(matches!(
            AuthError::from(StoreError::Unavailable("down".to_string())),
            AuthError::DependencyUnavailable(_)
        ));
        assert!(matches!(
            AuthError::from(TokenError::Expired),
            AuthError::Expired
        ));
    }
}
