//! Fixed-window rate limiting backed by the shared store.
//!
//! Counters live under `rl:{route-class}:{identity}` and expire at the end of
//! their window, so every instance sharing the store enforces the same limit.
//! One `incr_with_ttl` round trip both counts the request and reports how long
//! the window has left.

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use super::error::AuthError;
use crate::store::FastStore;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RateLimitDecision {
    Allowed,
    Denied { retry_after: Duration },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RouteClass {
    Login,
    Signup,
    Refresh,
    VerifyEmail,
    ResendVerification,
    PasswordReset,
    Api,
}

impl RouteClass {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Login => "login",
            Self::Signup => "signup",
            Self::Refresh => "refresh",
            Self::VerifyEmail => "verify-email",
            Self::ResendVerification => "resend-verification",
            Self::PasswordReset => "password-reset",
            Self::Api => "api",
        }
    }
}

impl fmt::Display for RouteClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RateLimitPolicy {
    pub limit: u64,
    pub window: Duration,
}

impl RateLimitPolicy {
    #[must_use]
    pub const fn new(limit: u64, window: Duration) -> Self {
        Self { limit, window }
    }
}

const DEFAULT_LOGIN: RateLimitPolicy = RateLimitPolicy::new(5, Duration::from_secs(60));
const DEFAULT_SIGNUP: RateLimitPolicy = RateLimitPolicy::new(5, Duration::from_secs(60));
const DEFAULT_SENSITIVE: RateLimitPolicy = RateLimitPolicy::new(2, Duration::from_secs(10));
const DEFAULT_VERIFY_EMAIL: RateLimitPolicy = RateLimitPolicy::new(10, Duration::from_secs(60));
const DEFAULT_API: RateLimitPolicy = RateLimitPolicy::new(120, Duration::from_secs(60));

#[derive(Clone, Debug)]
pub struct RateLimitConfig {
    login: RateLimitPolicy,
    signup: RateLimitPolicy,
    refresh: RateLimitPolicy,
    verify_email: RateLimitPolicy,
    resend_verification: RateLimitPolicy,
    password_reset: RateLimitPolicy,
    api: RateLimitPolicy,
    fail_open: bool,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimitConfig {
    /// Defaults: login and signup 5/min, refresh, resend-verification and
    /// password-reset 2 per 10s, verify-email 10/min, api 120/min. Fails open.
    #[must_use]
    pub fn new() -> Self {
        Self {
            login: DEFAULT_LOGIN,
            signup: DEFAULT_SIGNUP,
            refresh: DEFAULT_SENSITIVE,
            verify_email: DEFAULT_VERIFY_EMAIL,
            resend_verification: DEFAULT_SENSITIVE,
            password_reset: DEFAULT_SENSITIVE,
            api: DEFAULT_API,
            fail_open: true,
        }
    }

    #[must_use]
    pub fn with_policy(mut self, class: RouteClass, policy: RateLimitPolicy) -> Self {
        *self.policy_mut(class) = policy;
        self
    }

    #[must_use]
    pub fn with_fail_open(mut self, fail_open: bool) -> Self {
        self.fail_open = fail_open;
        self
    }

    #[must_use]
    pub fn policy(&self, class: RouteClass) -> RateLimitPolicy {
        match class {
            RouteClass::Login => self.login,
            RouteClass::Signup => self.signup,
            RouteClass::Refresh => self.refresh,
            RouteClass::VerifyEmail => self.verify_email,
            RouteClass::ResendVerification => self.resend_verification,
            RouteClass::PasswordReset => self.password_reset,
            RouteClass::Api => self.api,
        }
    }

    fn policy_mut(&mut self, class: RouteClass) -> &mut RateLimitPolicy {
        match class {
            RouteClass::Login => &mut self.login,
            RouteClass::Signup => &mut self.signup,
            RouteClass::Refresh => &mut self.refresh,
            RouteClass::VerifyEmail => &mut self.verify_email,
            RouteClass::ResendVerification => &mut self.resend_verification,
            RouteClass::PasswordReset => &mut self.password_reset,
            RouteClass::Api => &mut self.api,
        }
    }

    #[must_use]
    pub fn fail_open(&self) -> bool {
        self.fail_open
    }
}

#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Count one request against `key` and decide whether it may proceed.
    async fn allow(
        &self,
        key: &str,
        limit: u64,
        window: Duration,
    ) -> Result<RateLimitDecision, AuthError>;

    /// Apply the configured policy for `class` to `identity`.
    async fn check(
        &self,
        class: RouteClass,
        identity: &str,
    ) -> Result<RateLimitDecision, AuthError>;
}

/// Run `check` and turn a denial into [`AuthError::RateLimited`].
///
/// # Errors
/// Returns [`AuthError::RateLimited`] when denied, or the limiter's own error
/// when it fails closed.
pub async fn enforce(
    limiter: &dyn RateLimiter,
    class: RouteClass,
    identity: &str,
) -> Result<(), AuthError> {
    match limiter.check(class, identity).await? {
        RateLimitDecision::Allowed => Ok(()),
        RateLimitDecision::Denied { retry_after } => Err(AuthError::RateLimited { retry_after }),
    }
}

#[must_use]
pub fn rate_limit_key(class: RouteClass, identity: &str) -> String {
    format!("rl:{}:{identity}", class.as_str())
}

pub struct StoreRateLimiter {
    store: Arc<dyn FastStore>,
    config: RateLimitConfig,
}

impl StoreRateLimiter {
    #[must_use]
    pub fn new(store: Arc<dyn FastStore>, config: RateLimitConfig) -> Self {
        Self { store, config }
    }

    #[must_use]
    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }
}

#[async_trait]
impl RateLimiter for StoreRateLimiter {
    async fn allow(
        &self,
        key: &str,
        limit: u64,
        window: Duration,
    ) -> Result<RateLimitDecision, AuthError> {
        match self.store.incr_with_ttl(key, window).await {
            Ok(counter) if counter.count > limit => Ok(RateLimitDecision::Denied {
                retry_after: counter.ttl.max(Duration::from_secs(1)),
            }),
            Ok(_) => Ok(RateLimitDecision::Allowed),
            Err(err) if self.config.fail_open => {
                warn!(key, "rate limiter store failed, allowing request: {err}");
                Ok(RateLimitDecision::Allowed)
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn check(
        &self,
        class: RouteClass,
        identity: &str,
    ) -> Result<RateLimitDecision, AuthError> {
        let policy = self.config.policy(class);
        self.allow(&rate_limit_key(class, identity), policy.limit, policy.window)
            .await
    }
}

/// Limiter used when rate limiting is disabled.
#[derive(Clone, Debug)]
pub struct NoopRateLimiter;

#[async_trait]
impl RateLimiter for NoopRateLimiter {
    async fn allow(
        &self,
        _key: &str,
        _limit: u64,
        _window: Duration,
    ) -> Result<RateLimitDecision, AuthError> {
        Ok(RateLimitDecision::Allowed)
    }

    async fn check(
        &self,
        _class: RouteClass,
        _identity: &str,
    ) -> Result<RateLimitDecision, AuthError> {
        Ok(RateLimitDecision::Allowed)
    }
}
