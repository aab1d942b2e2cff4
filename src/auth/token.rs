//! Compact signed tokens (JWT, `HS256`/`HS512`).
//!
//! Every token the core hands out (access, refresh, email verification and
//! password reset) goes through [`TokenCodec`]. Claims are a fixed structure
//! tagged by [`TokenKind`]; anything the core does not model explicitly goes in
//! the `ext` string map.
//!
//! Framing and signatures are handled by `jsonwebtoken`. Validation order is
//! fixed: structure, algorithm, signature, claims, expiry, kind. Expiry is
//! checked here rather than by `jsonwebtoken` so callers can validate against
//! an explicit clock and a token is expired exactly at `exp + leeway`.

use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, errors::ErrorKind};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use ulid::Ulid;

use crate::users::Role;

pub const DEFAULT_LEEWAY_SECONDS: u64 = 5;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Algorithm {
    #[default]
    HS256,
    HS512,
}

impl Algorithm {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::HS256 => "HS256",
            Self::HS512 => "HS512",
        }
    }

    fn jwt(self) -> jsonwebtoken::Algorithm {
        match self {
            Self::HS256 => jsonwebtoken::Algorithm::HS256,
            Self::HS512 => jsonwebtoken::Algorithm::HS512,
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Algorithm {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_uppercase().as_str() {
            "HS256" => Ok(Self::HS256),
            "HS512" => Ok(Self::HS512),
            other => Err(format!("unsupported JWT algorithm: {other} (expected HS256 or HS512)")),
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
    Verify,
    Reset,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Access => "access",
            Self::Refresh => "refresh",
            Self::Verify => "verify",
            Self::Reset => "reset",
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Claims {
    pub sub: String,
    pub iat: i64,
    pub exp: i64,
    pub typ: TokenKind,
    pub jti: String,
    /// Session lineage id, only on refresh tokens.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub ext: BTreeMap<String, String>,
}

impl Claims {
    /// Claims for `kind` issued at `now` (unix seconds) and valid for `ttl`, with a fresh `jti`.
    #[must_use]
    pub fn new(kind: TokenKind, subject: impl Into<String>, ttl: Duration, now: i64) -> Self {
        let ttl = i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX);
        Self {
            sub: subject.into(),
            iat: now,
            exp: now.saturating_add(ttl),
            typ: kind,
            jti: Ulid::new().to_string(),
            sid: None,
            role: None,
            ext: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_jti(mut self, jti: impl Into<String>) -> Self {
        self.jti = jti.into();
        self
    }

    #[must_use]
    pub fn with_session(mut self, sid: impl Into<String>) -> Self {
        self.sid = Some(sid.into());
        self
    }

    #[must_use]
    pub fn with_role(mut self, role: Role) -> Self {
        self.role = Some(role);
        self
    }

    #[must_use]
    pub fn with_ext(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.ext.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn ext(&self, key: &str) -> Option<&str> {
        self.ext.get(key).map(String::as_str)
    }

    /// Seconds left until `exp` as seen from `now`, never negative.
    #[must_use]
    pub fn remaining(&self, now: i64) -> Duration {
        Duration::from_secs(u64::try_from(self.exp.saturating_sub(now)).unwrap_or(0))
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("malformed token")]
    Malformed,
    #[error("invalid signature")]
    InvalidSignature,
    #[error("token expired")]
    Expired,
    #[error("expected {expected} token, found {found}")]
    TypeMismatch {
        expected: TokenKind,
        found: TokenKind,
    },
    #[error("failed to encode token: {0}")]
    Encode(String),
}

impl From<jsonwebtoken::errors::Error> for TokenError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        match err.kind() {
            ErrorKind::InvalidSignature | ErrorKind::InvalidAlgorithm => Self::InvalidSignature,
            ErrorKind::ExpiredSignature => Self::Expired,
            _ => Self::Malformed,
        }
    }
}

/// Current wall-clock time in unix seconds.
#[must_use]
pub fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| i64::try_from(elapsed.as_secs()).unwrap_or(i64::MAX))
}

/// Signs and validates tokens with a single shared secret.
#[derive(Clone, Debug)]
pub struct TokenCodec {
    secret: SecretString,
    algorithm: Algorithm,
    leeway: i64,
}

impl TokenCodec {
    #[must_use]
    pub fn new(secret: SecretString, algorithm: Algorithm) -> Self {
        Self {
            secret,
            algorithm,
            leeway: i64::try_from(DEFAULT_LEEWAY_SECONDS).unwrap_or(0),
        }
    }

    /// Clock skew tolerated when checking `exp`.
    #[must_use]
    pub fn with_leeway(mut self, leeway: Duration) -> Self {
        self.leeway = i64::try_from(leeway.as_secs()).unwrap_or(i64::MAX);
        self
    }

    #[must_use]
    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    #[must_use]
    pub fn leeway(&self) -> Duration {
        Duration::from_secs(u64::try_from(self.leeway).unwrap_or(0))
    }

    /// Sign `claims` into a compact token.
    ///
    /// # Errors
    /// Returns [`TokenError::Encode`] if the claims cannot be serialized or signed.
    pub fn issue(&self, claims: &Claims) -> Result<String, TokenError> {
        jsonwebtoken::encode(
            &Header::new(self.algorithm.jwt()),
            claims,
            &EncodingKey::from_secret(self.secret.expose_secret().as_bytes()),
        )
        .map_err(|err| TokenError::Encode(err.to_string()))
    }

    /// Validate `token` against the current wall clock.
    ///
    /// # Errors
    /// See [`TokenCodec::validate_at`].
    pub fn validate(&self, token: &str, expected: TokenKind) -> Result<Claims, TokenError> {
        self.validate_at(token, expected, now_unix())
    }

    /// Validate `token` as of `now_unix_seconds`.
    ///
    /// # Errors
    /// - [`TokenError::Malformed`] if the token is not three base64url JSON segments,
    ///   or the claims do not decode.
    /// - [`TokenError::InvalidSignature`] if the algorithm differs from the configured
    ///   one or the signature does not match.
    /// - [`TokenError::Expired`] once `now >= exp + leeway`.
    /// - [`TokenError::TypeMismatch`] if the token kind is not `expected`.
    pub fn validate_at(
        &self,
        token: &str,
        expected: TokenKind,
        now_unix_seconds: i64,
    ) -> Result<Claims, TokenError> {
        let claims = jsonwebtoken::decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.secret.expose_secret().as_bytes()),
            &self.validation(),
        )?
        .claims;

        if now_unix_seconds >= claims.exp.saturating_add(self.leeway) {
            return Err(TokenError::Expired);
        }
        if claims.typ != expected {
            return Err(TokenError::TypeMismatch {
                expected,
                found: claims.typ,
            });
        }

        Ok(claims)
    }

    fn validation(&self) -> Validation {
        let mut validation = Validation::new(self.algorithm.jwt());
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.validate_aud = false;
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);
        validation
    }
}
