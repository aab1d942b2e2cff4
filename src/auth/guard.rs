//! Access-token middleware and the authenticated principal.
//!
//! Flow Overview: derive the client identity from the socket peer (or the
//! forwarding headers behind a trusted proxy), charge the `api` rate limit,
//! read the bearer token, validate it as an access token and attach a
//! [`Principal`] to the request. Any failure short-circuits with 401 or 429
//! before the handler runs.

use axum::{
    extract::{ConnectInfo, FromRequestParts, Request},
    http::{Extensions, HeaderMap, request::Parts},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::convert::Infallible;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use uuid::Uuid;

use super::error::AuthError;
use super::rate_limit::{RouteClass, enforce};
use super::session::{EMAIL_CLAIM, user_id};
use super::state::AuthState;
use super::token::TokenKind;
use super::utils::{client_identity, client_ip, extract_bearer_token};
use crate::users::Role;

/// Authenticated user context derived from the access token.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Principal {
    pub user_id: Uuid,
    pub email: String,
    pub role: Role,
}

impl Principal {
    /// # Errors
    /// [`AuthError::Forbidden`] unless the principal holds one of `roles`.
    pub fn require_role(&self, roles: &[Role]) -> Result<(), AuthError> {
        if roles.contains(&self.role) {
            Ok(())
        } else {
            Err(AuthError::Forbidden)
        }
    }
}

impl<S: Send + Sync> FromRequestParts<S> for Principal {
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Principal>()
            .cloned()
            .ok_or(AuthError::MissingToken)
    }
}

/// Socket peer from `ConnectInfo` and whether the [`AuthState`] in
/// `extensions` trusts forwarding headers.
fn peer_and_trust(extensions: &Extensions) -> (Option<IpAddr>, bool) {
    let peer = extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());
    let trust_proxy = extensions
        .get::<Arc<AuthState>>()
        .is_some_and(|state| state.config().trust_proxy_headers());
    (peer, trust_proxy)
}

/// Client address of a request, resolved like the rate-limit identity.
#[must_use]
pub fn request_ip(headers: &HeaderMap, extensions: &Extensions) -> Option<IpAddr> {
    let (peer, trust_proxy) = peer_and_trust(extensions);
    client_ip(headers, peer, trust_proxy)
}

/// Rate-limit key for the caller.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientIdentity(pub String);

impl ClientIdentity {
    #[must_use]
    pub fn resolve(headers: &HeaderMap, extensions: &Extensions) -> Self {
        let (peer, trust_proxy) = peer_and_trust(extensions);
        Self(client_identity(headers, peer, trust_proxy))
    }
}

impl<S: Send + Sync> FromRequestParts<S> for ClientIdentity {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self::resolve(&parts.headers, &parts.extensions))
    }
}

/// Resolve the request's bearer token into a [`Principal`].
///
/// # Errors
/// Rate-limit denials and any token failure.
pub async fn authenticate(
    state: &AuthState,
    client: &ClientIdentity,
    headers: &HeaderMap,
) -> Result<Principal, AuthError> {
    enforce(state.rate_limiter(), RouteClass::Api, &client.0).await?;

    let token = extract_bearer_token(headers).ok_or(AuthError::MissingToken)?;
    let claims = state.codec().validate(&token, TokenKind::Access)?;
    let email = claims
        .ext(EMAIL_CLAIM)
        .ok_or(AuthError::Malformed)?
        .to_string();
    Ok(Principal {
        user_id: user_id(&claims)?,
        email,
        role: claims.role.unwrap_or_default(),
    })
}

/// `axum::middleware::from_fn` guard for routes that need an access token.
/// Expects `Extension<Arc<AuthState>>` to be layered outside it.
pub async fn require_access(mut request: Request, next: Next) -> Response {
    let Some(state) = request.extensions().get::<Arc<AuthState>>().cloned() else {
        return AuthError::Internal("auth state missing from request extensions".to_string())
            .into_response();
    };
    let client = ClientIdentity::resolve(request.headers(), request.extensions());
    match authenticate(&state, &client, request.headers()).await {
        Ok(principal) => {
            request.extensions_mut().insert(principal);
            next.run(request).await
        }
        Err(err) => err.into_response(),
    }
}
