//! Email verification and password reset tokens.
//!
//! Both flows mail a signed, single-use link. Redemption claims a
//! `{verify,reset}:used:{jti}` marker with `set_if_absent`, so a link works
//! exactly once even when redeemed concurrently. The marker outlives the token
//! by the codec leeway, after which the token itself is expired anyway.
//!
//! A failed account update never burns a link. Verification marks the account
//! first (idempotent) and claims the marker afterwards. A password reset claims
//! the marker as `pending`, then settles it to `used` or back to `released`
//! depending on whether the new hash was stored; a released marker can be
//! claimed again.
//!
//! Requests that could reveal whether an account exists (resend and reset
//! requests) report [`ResendOutcome`] to the caller, but the HTTP layer always
//! answers 204.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use super::error::AuthError;
use super::password::CredentialHasher;
use super::state::AuthConfig;
use super::token::{Claims, TokenCodec, TokenKind, now_unix};
use super::utils::{build_link, normalize_email, valid_email, validate_password};
use crate::mail::{EmailMessage, Mailer, TEMPLATE_PASSWORD_RESET, TEMPLATE_VERIFY_EMAIL};
use crate::store::FastStore;
use crate::users::UserStore;

const MARKER_USED: &str = "used";
const MARKER_PENDING: &str = "pending";
const MARKER_RELEASED: &str = "released";

/// A claimed single-use marker.
struct Marker {
    key: String,
    ttl: Duration,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResendOutcome {
    /// A new email was dispatched.
    Queued,
    /// An email for this address was sent too recently.
    Cooldown,
    /// Unknown, invalid or already-verified address; nothing sent.
    Noop,
}

pub struct VerificationFlow {
    codec: TokenCodec,
    hasher: CredentialHasher,
    users: Arc<dyn UserStore>,
    store: Arc<dyn FastStore>,
    mailer: Mailer,
    frontend_base_url: String,
    email_token_ttl: Duration,
    reset_token_ttl: Duration,
    resend_cooldown: Duration,
}

impl VerificationFlow {
    #[must_use]
    pub fn new(
        config: &AuthConfig,
        codec: TokenCodec,
        hasher: CredentialHasher,
        users: Arc<dyn UserStore>,
        store: Arc<dyn FastStore>,
        mailer: Mailer,
    ) -> Self {
        Self {
            codec,
            hasher,
            users,
            store,
            mailer,
            frontend_base_url: config.frontend_base_url().to_string(),
            email_token_ttl: config.email_token_ttl(),
            reset_token_ttl: config.reset_token_ttl(),
            resend_cooldown: config.resend_cooldown(),
        }
    }

    /// Issue a verification token for `email` and mail the link without waiting for delivery.
    ///
    /// # Errors
    /// Returns [`AuthError::Internal`] if the token cannot be signed.
    #[instrument(skip(self))]
    pub fn issue_verification(&self, email: &str) -> Result<String, AuthError> {
        let email = normalize_email(email);
        let claims = Claims::new(TokenKind::Verify, email.clone(), self.email_token_ttl, now_unix());
        let token = self.codec.issue(&claims)?;
        let link = build_link(&self.frontend_base_url, "verify-email", &token);
        self.mailer.dispatch(EmailMessage {
            to_email: email,
            template: TEMPLATE_VERIFY_EMAIL.to_string(),
            payload: serde_json::json!({ "verify_url": link }),
        });
        Ok(token)
    }

    /// Consume a verification token and mark its account verified. Returns the email.
    ///
    /// # Errors
    /// - Token failures: [`AuthError::Expired`], [`AuthError::InvalidSignature`],
    ///   [`AuthError::Malformed`], [`AuthError::TypeMismatch`].
    /// - [`AuthError::AlreadyUsed`] on any redemption after the first.
    /// - [`AuthError::UnknownAccount`] if the account no longer exists.
    #[instrument(skip_all)]
    pub async fn redeem(&self, token: &str) -> Result<String, AuthError> {
        let now = now_unix();
        let claims = self.codec.validate_at(token, TokenKind::Verify, now)?;
        let user = self
            .users
            .get_user_by_email(&claims.sub)
            .await?
            .ok_or(AuthError::UnknownAccount)?;

        if !self.users.set_verified(user.id).await? {
            return Err(AuthError::UnknownAccount);
        }
        self.claim_single_use("verify", &claims, now, MARKER_USED).await?;
        info!(user_id = %user.id, "email verified");
        Ok(claims.sub)
    }

    /// Re-send the verification email, at most once per cooldown per address.
    ///
    /// # Errors
    /// [`AuthError::DependencyUnavailable`] if a store is down.
    #[instrument(skip(self))]
    pub async fn resend_verification(&self, email: &str) -> Result<ResendOutcome, AuthError> {
        let email = normalize_email(email);
        if !valid_email(&email) {
            return Ok(ResendOutcome::Noop);
        }
        match self.users.get_user_by_email(&email).await? {
            Some(user) if !user.verified => {}
            _ => return Ok(ResendOutcome::Noop),
        }
        if !self.start_cooldown("verify", &email).await? {
            return Ok(ResendOutcome::Cooldown);
        }
        self.issue_verification(&email)?;
        Ok(ResendOutcome::Queued)
    }

    /// Mail a password reset link to an existing account.
    ///
    /// # Errors
    /// [`AuthError::DependencyUnavailable`] if a store is down.
    #[instrument(skip(self))]
    pub async fn request_password_reset(&self, email: &str) -> Result<ResendOutcome, AuthError> {
        let email = normalize_email(email);
        if !valid_email(&email) || self.users.get_user_by_email(&email).await?.is_none() {
            return Ok(ResendOutcome::Noop);
        }
        if !self.start_cooldown("reset", &email).await? {
            return Ok(ResendOutcome::Cooldown);
        }

        let claims = Claims::new(TokenKind::Reset, email.clone(), self.reset_token_ttl, now_unix());
        let token = self.codec.issue(&claims)?;
        let link = build_link(&self.frontend_base_url, "reset-password", &token);
        self.mailer.dispatch(EmailMessage {
            to_email: email,
            template: TEMPLATE_PASSWORD_RESET.to_string(),
            payload: serde_json::json!({ "reset_url": link }),
        });
        Ok(ResendOutcome::Queued)
    }

    /// Consume a reset token and store a new password hash.
    ///
    /// # Errors
    /// - [`AuthError::Validation`] if the new password violates the length rules.
    /// - Token failures and [`AuthError::AlreadyUsed`] as for [`VerificationFlow::redeem`].
    #[instrument(skip_all)]
    pub async fn reset_password(&self, token: &str, new_password: &str) -> Result<(), AuthError> {
        validate_password(new_password).map_err(AuthError::Validation)?;
        let now = now_unix();
        let claims = self.codec.validate_at(token, TokenKind::Reset, now)?;
        let user = self
            .users
            .get_user_by_email(&claims.sub)
            .await?
            .ok_or(AuthError::UnknownAccount)?;

        let digest = self.hasher.hash_blocking(new_password.to_string()).await?;
        let marker = self
            .claim_single_use("reset", &claims, now, MARKER_PENDING)
            .await?;
        let updated = self.users.update_password(user.id, &digest).await;
        self.settle(&marker, matches!(updated, Ok(true))).await;
        if !updated? {
            return Err(AuthError::UnknownAccount);
        }
        info!(user_id = %user.id, "password reset");
        Ok(())
    }

    /// Claim the marker for `claims.jti` with `value`, either fresh or after a
    /// failed attempt released it.
    async fn claim_single_use(
        &self,
        scope: &str,
        claims: &Claims,
        now: i64,
        value: &str,
    ) -> Result<Marker, AuthError> {
        let marker = Marker {
            key: format!("{scope}:used:{}", claims.jti),
            ttl: (claims.remaining(now) + self.codec.leeway()).max(Duration::from_secs(1)),
        };
        if self
            .store
            .set_if_absent(&marker.key, value, marker.ttl)
            .await?
            || self
                .store
                .compare_and_swap(&marker.key, MARKER_RELEASED, value, marker.ttl)
                .await?
        {
            Ok(marker)
        } else {
            debug!(marker = %marker.key, "token already redeemed");
            Err(AuthError::AlreadyUsed)
        }
    }

    /// Finish a `pending` claim: `used` on success, `released` otherwise.
    async fn settle(&self, marker: &Marker, succeeded: bool) {
        let next = if succeeded { MARKER_USED } else { MARKER_RELEASED };
        match self
            .store
            .compare_and_swap(&marker.key, MARKER_PENDING, next, marker.ttl)
            .await
        {
            Ok(true) => {}
            Ok(false) => warn!(marker = %marker.key, "single-use marker changed while pending"),
            Err(err) => warn!(marker = %marker.key, "failed to settle single-use marker: {err}"),
        }
    }

    async fn start_cooldown(&self, scope: &str, email: &str) -> Result<bool, AuthError> {
        if self.resend_cooldown.is_zero() {
            return Ok(true);
        }
        let key = format!("{scope}:cooldown:{email}");
        Ok(self
            .store
            .set_if_absent(&key, "1", self.resend_cooldown)
            .await?)
    }
}
