//! Auth configuration and the shared state handed to handlers.

use std::sync::Arc;
use std::time::Duration;

use super::{
    password::CredentialHasher, rate_limit::RateLimiter, session::SessionManager,
    token::TokenCodec, verification::VerificationFlow,
};
use crate::mail::Mailer;
use crate::store::FastStore;
use crate::users::UserStore;

const DEFAULT_ACCESS_TTL_SECONDS: u64 = 15 * 60;
const DEFAULT_REFRESH_TTL_SECONDS: u64 = 7 * 24 * 60 * 60;
const DEFAULT_EMAIL_TOKEN_TTL_SECONDS: u64 = 24 * 60 * 60;
const DEFAULT_RESET_TOKEN_TTL_SECONDS: u64 = 60 * 60;
const DEFAULT_RESEND_COOLDOWN_SECONDS: u64 = 60;
const DEFAULT_ROTATION_GRACE_SECONDS: u64 = 2;

#[derive(Clone, Debug)]
pub struct AuthConfig {
    frontend_base_url: String,
    access_ttl_seconds: u64,
    refresh_ttl_seconds: u64,
    email_token_ttl_seconds: u64,
    reset_token_ttl_seconds: u64,
    resend_cooldown_seconds: u64,
    rotation_grace_seconds: u64,
    revoke_on_reuse: bool,
    trust_proxy_headers: bool,
}

impl AuthConfig {
    #[must_use]
    pub fn new(frontend_base_url: String) -> Self {
        Self {
            frontend_base_url,
            access_ttl_seconds: DEFAULT_ACCESS_TTL_SECONDS,
            refresh_ttl_seconds: DEFAULT_REFRESH_TTL_SECONDS,
            email_token_ttl_seconds: DEFAULT_EMAIL_TOKEN_TTL_SECONDS,
            reset_token_ttl_seconds: DEFAULT_RESET_TOKEN_TTL_SECONDS,
            resend_cooldown_seconds: DEFAULT_RESEND_COOLDOWN_SECONDS,
            rotation_grace_seconds: DEFAULT_ROTATION_GRACE_SECONDS,
            revoke_on_reuse: true,
            trust_proxy_headers: false,
        }
    }

    #[must_use]
    pub fn with_access_ttl_seconds(mut self, seconds: u64) -> Self {
        self.access_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_refresh_ttl_seconds(mut self, seconds: u64) -> Self {
        self.refresh_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_email_token_ttl_seconds(mut self, seconds: u64) -> Self {
        self.email_token_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_reset_token_ttl_seconds(mut self, seconds: u64) -> Self {
        self.reset_token_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_resend_cooldown_seconds(mut self, seconds: u64) -> Self {
        self.resend_cooldown_seconds = seconds;
        self
    }

    /// Revoke the whole session lineage when an already-rotated refresh token is replayed.
    #[must_use]
    pub fn with_revoke_on_reuse(mut self, revoke: bool) -> Self {
        self.revoke_on_reuse = revoke;
        self
    }

    /// How long the token a rotation just replaced counts as a lost concurrent
    /// refresh instead of a replay. Zero treats every stale token as a replay.
    #[must_use]
    pub fn with_rotation_grace_seconds(mut self, seconds: u64) -> Self {
        self.rotation_grace_seconds = seconds;
        self
    }

    /// Take the client address from `X-Forwarded-For` / `X-Real-IP` instead of
    /// the socket peer. Only enable behind a proxy that sets these headers.
    #[must_use]
    pub fn with_trust_proxy_headers(mut self, trust: bool) -> Self {
        self.trust_proxy_headers = trust;
        self
    }

    #[must_use]
    pub fn frontend_base_url(&self) -> &str {
        &self.frontend_base_url
    }

    #[must_use]
    pub fn access_ttl(&self) -> Duration {
        Duration::from_secs(self.access_ttl_seconds)
    }

    #[must_use]
    pub fn refresh_ttl(&self) -> Duration {
        Duration::from_secs(self.refresh_ttl_seconds)
    }

    #[must_use]
    pub fn email_token_ttl(&self) -> Duration {
        Duration::from_secs(self.email_token_ttl_seconds)
    }

    #[must_use]
    pub fn reset_token_ttl(&self) -> Duration {
        Duration::from_secs(self.reset_token_ttl_seconds)
    }

    #[must_use]
    pub fn resend_cooldown(&self) -> Duration {
        Duration::from_secs(self.resend_cooldown_seconds)
    }

    #[must_use]
    pub fn revoke_on_reuse(&self) -> bool {
        self.revoke_on_reuse
    }

    #[must_use]
    pub fn rotation_grace(&self) -> Duration {
        Duration::from_secs(self.rotation_grace_seconds)
    }

    #[must_use]
    pub fn trust_proxy_headers(&self) -> bool {
        self.trust_proxy_headers
    }

    /// Only mark cookies secure when the frontend is served over HTTPS.
    #[must_use]
    pub fn cookie_secure(&self) -> bool {
        self.frontend_base_url.starts_with("https://")
    }
}

pub struct AuthState {
    config: AuthConfig,
    codec: TokenCodec,
    hasher: CredentialHasher,
    users: Arc<dyn UserStore>,
    store: Arc<dyn FastStore>,
    rate_limiter: Arc<dyn RateLimiter>,
    sessions: SessionManager,
    verification: VerificationFlow,
}

impl AuthState {
    pub fn new(
        config: AuthConfig,
        codec: TokenCodec,
        hasher: CredentialHasher,
        users: Arc<dyn UserStore>,
        store: Arc<dyn FastStore>,
        rate_limiter: Arc<dyn RateLimiter>,
        mailer: Mailer,
    ) -> Self {
        let sessions = SessionManager::new(
            &config,
            codec.clone(),
            hasher.clone(),
            users.clone(),
            store.clone(),
        );
        let verification = VerificationFlow::new(
            &config,
            codec.clone(),
            hasher.clone(),
            users.clone(),
            store.clone(),
            mailer,
        );
        Self {
            config,
            codec,
            hasher,
            users,
            store,
            rate_limiter,
            sessions,
            verification,
        }
    }

    #[must_use]
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    #[must_use]
    pub fn codec(&self) -> &TokenCodec {
        &self.codec
    }

    #[must_use]
    pub fn hasher(&self) -> &CredentialHasher {
        &self.hasher
    }

    #[must_use]
    pub fn users(&self) -> &dyn UserStore {
        self.users.as_ref()
    }

    #[must_use]
    pub fn store(&self) -> &dyn FastStore {
        self.store.as_ref()
    }

    #[must_use]
    pub fn rate_limiter(&self) -> &dyn RateLimiter {
        self.rate_limiter.as_ref()
    }

    #[must_use]
    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    #[must_use]
    pub fn verification(&self) -> &VerificationFlow {
        &self.verification
    }
}
