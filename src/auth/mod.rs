//! Authentication and session core.
//!
//! - [`password`]: Argon2id credential hashing.
//! - [`token`]: signed token codec (access, refresh, verify, reset).
//! - [`rate_limit`]: fixed-window limiter over the shared store.
//! - [`session`]: login, refresh rotation, logout.
//! - [`verification`]: single-use email verification and password reset links.
//! - [`guard`]: access-token middleware exposing a [`Principal`].
//!
//! ## Rate Limiting
//!
//! Limits are per client IP and per route class. The client IP is the socket
//! peer; `X-Forwarded-For` (rightmost hop) and `X-Real-IP` count only when the
//! deployment trusts its reverse proxy. Refresh, resend-verification and password-reset share
//! the strictest default of 2 requests per 10 seconds. When the store is
//! unreachable the limiter lets traffic through and logs a warning unless it
//! is configured to fail closed; session rotation and link redemption always
//! fail closed.

mod error;
pub mod guard;
pub mod password;
pub mod rate_limit;
mod registration;
pub mod session;
mod state;
pub mod token;
pub mod utils;
pub mod verification;

#[cfg(test)]
pub(crate) mod test_support;

pub use error::{AuthError, ErrorBody};
pub use guard::{ClientIdentity, Principal, require_access};
pub use password::CredentialHasher;
pub use rate_limit::{
    NoopRateLimiter, RateLimitConfig, RateLimitDecision, RateLimitPolicy, RateLimiter,
    RouteClass, StoreRateLimiter,
};
pub use session::{SessionManager, TokenPair};
pub use registration::{SignupInput, signup};
pub use state::{AuthConfig, AuthState};
pub use token::{Algorithm, Claims, TokenCodec, TokenError, TokenKind};
pub use verification::{ResendOutcome, VerificationFlow};
