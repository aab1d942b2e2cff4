//! Login, refresh-token rotation and logout.
//!
//! ## Session lineages
//!
//! Each successful login starts a lineage identified by a ULID `sid`. The fast
//! store keeps exactly one record per lineage, `session:{sid}`, holding the
//! rotation id (`jti`) of the only refresh token that may still be used, or
//! the tombstone `revoked`. After a rotation the record also remembers the
//! predecessor and when it was rotated: `{current}|{previous}|{rotated_at}`.
//!
//! ```text
//! Anonymous --login--> Authenticated --refresh--> Rotated --refresh--> Rotated ...
//!                            |                       |
//!                            +------logout / reuse---+--> Revoked
//! ```
//!
//! Rotation is a single `compare_and_swap` of that record, so among concurrent
//! refreshes presenting the same token exactly one wins. The losers fail with
//! `InvalidSession` and leave the lineage alone: their token is the winner's
//! predecessor and it was rotated less than the rotation grace ago. Any other
//! stale token is a replay, and with reuse detection enabled the lineage is
//! revoked so a stolen token cannot outlive its legitimate holder.
//!
//! Access tokens are stateless and stay valid until they expire.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};
use ulid::Ulid;
use utoipa::ToSchema;
use uuid::Uuid;

use super::error::AuthError;
use super::password::CredentialHasher;
use super::state::AuthConfig;
use super::token::{Claims, TokenCodec, TokenKind, now_unix};
use super::utils::normalize_email;
use crate::store::FastStore;
use crate::users::{User, UserStore};

pub const REVOKED: &str = "revoked";
pub const EMAIL_CLAIM: &str = "email";
const LOGOUT_SESSION_ATTEMPTS: usize = 3;

#[must_use]
pub fn session_key(sid: &str) -> String {
    format!("session:{sid}")
}

/// Parsed `session:{sid}` record.
#[derive(Debug, PartialEq, Eq)]
struct Rotation<'a> {
    current: &'a str,
    previous: Option<(&'a str, i64)>,
}

impl<'a> Rotation<'a> {
    fn parse(record: &'a str) -> Self {
        let mut fields = record.splitn(3, '|');
        let current = fields.next().unwrap_or_default();
        let previous = match (fields.next(), fields.next()) {
            (Some(previous), Some(at)) => at.parse().ok().map(|at| (previous, at)),
            _ => None,
        };
        Self { current, previous }
    }

    fn record(current: &str, previous: &str, rotated_at: i64) -> String {
        format!("{current}|{previous}|{rotated_at}")
    }

    /// `jti` was replaced by the current token less than `grace` seconds ago.
    fn just_superseded(&self, jti: &str, now: i64, grace: i64) -> bool {
        self.previous
            .is_some_and(|(previous, at)| previous == jti && now.saturating_sub(at) < grace)
    }
}

#[derive(ToSchema, Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    /// Always `bearer`.
    pub token_type: String,
    /// Access token lifetime in seconds.
    pub expires_in: u64,
}

pub struct SessionManager {
    codec: TokenCodec,
    hasher: CredentialHasher,
    users: Arc<dyn UserStore>,
    store: Arc<dyn FastStore>,
    access_ttl: Duration,
    refresh_ttl: Duration,
    rotation_grace: i64,
    revoke_on_reuse: bool,
}

impl SessionManager {
    #[must_use]
    pub fn new(
        config: &AuthConfig,
        codec: TokenCodec,
        hasher: CredentialHasher,
        users: Arc<dyn UserStore>,
        store: Arc<dyn FastStore>,
    ) -> Self {
        Self {
            codec,
            hasher,
            users,
            store,
            access_ttl: config.access_ttl(),
            refresh_ttl: config.refresh_ttl(),
            rotation_grace: i64::try_from(config.rotation_grace().as_secs()).unwrap_or(i64::MAX),
            revoke_on_reuse: config.revoke_on_reuse(),
        }
    }

    /// Verify credentials and start a new session lineage.
    ///
    /// # Errors
    /// - [`AuthError::InvalidCredentials`] for an unknown email or wrong password.
    /// - [`AuthError::EmailNotVerified`] when the password is right but the email is not verified.
    /// - [`AuthError::DependencyUnavailable`] if a store is down.
    #[instrument(skip(self, password))]
    pub async fn login(&self, email: &str, password: &str) -> Result<TokenPair, AuthError> {
        let email = normalize_email(email);
        let user = self.users.get_user_by_email(&email).await?;
        // Same number of store round trips whether or not the account exists.
        let lookup = user.as_ref().map_or_else(Uuid::nil, |user| user.id);
        let digest = self
            .users
            .get_password_hash(lookup)
            .await?
            .filter(|_| user.is_some());

        // Unknown accounts still pay for a full Argon2 verification.
        let verified = self
            .hasher
            .verify_blocking(password.to_string(), digest)
            .await;
        let Some(user) = user.filter(|_| verified) else {
            debug!("login rejected");
            return Err(AuthError::InvalidCredentials);
        };
        if !user.verified {
            return Err(AuthError::EmailNotVerified);
        }

        let sid = Ulid::new().to_string();
        let rid = Ulid::new().to_string();
        if !self
            .store
            .set_if_absent(&session_key(&sid), &rid, self.refresh_ttl)
            .await?
        {
            return Err(AuthError::Internal(format!("session id collision: {sid}")));
        }

        info!(user_id = %user.id, sid, "session started");
        self.issue_pair(&user, &sid, &rid)
    }

    /// Exchange a refresh token for a new pair, invalidating the presented one.
    ///
    /// # Errors
    /// - [`AuthError::InvalidSession`] for any invalid, expired, rotated or revoked
    ///   token, and for tokens whose account no longer exists.
    /// - [`AuthError::DependencyUnavailable`] if a store is down; no tokens are issued.
    #[instrument(skip_all)]
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, AuthError> {
        let claims = self.validate_refresh(refresh_token)?;
        let sid = claims.sid.as_deref().ok_or(AuthError::InvalidSession)?;
        let email = claims.ext(EMAIL_CLAIM).ok_or(AuthError::InvalidSession)?;

        let user = self
            .users
            .get_user_by_email(email)
            .await?
            .filter(|user| user.id.to_string() == claims.sub)
            .ok_or_else(|| {
                debug!(sid, "refresh for unknown account");
                AuthError::InvalidSession
            })?;

        let key = session_key(sid);
        let record = match self.store.get(&key).await? {
            Some(record) if record != REVOKED => record,
            _ => return Err(AuthError::InvalidSession),
        };
        let rotation = Rotation::parse(&record);
        let now = now_unix();

        if rotation.current == claims.jti {
            let rid = Ulid::new().to_string();
            let next = Rotation::record(&rid, &claims.jti, now);
            if self
                .store
                .compare_and_swap(&key, &record, &next, self.refresh_ttl)
                .await?
            {
                debug!(sid, "refresh token rotated");
                return self.issue_pair(&user, sid, &rid);
            }
            debug!(sid, "lost concurrent refresh");
            return Err(AuthError::InvalidSession);
        }

        if rotation.just_superseded(&claims.jti, now, self.rotation_grace) {
            debug!(sid, "lost concurrent refresh");
        } else if self.revoke_on_reuse {
            self.revoke_after_reuse(&key, sid).await;
        }
        Err(AuthError::InvalidSession)
    }

    /// End the lineage the refresh token belongs to.
    ///
    /// # Errors
    /// [`AuthError::InvalidSession`] if the token is invalid or no longer current.
    #[instrument(skip_all)]
    pub async fn logout(&self, refresh_token: &str) -> Result<(), AuthError> {
        let claims = self.validate_refresh(refresh_token)?;
        let sid = claims.sid.as_deref().ok_or(AuthError::InvalidSession)?;
        let key = session_key(sid);
        let record = match self.store.get(&key).await? {
            Some(record) if Rotation::parse(&record).current == claims.jti => record,
            _ => return Err(AuthError::InvalidSession),
        };
        if self
            .store
            .compare_and_swap(&key, &record, REVOKED, self.refresh_ttl)
            .await?
        {
            info!(sid, "session ended");
            Ok(())
        } else {
            Err(AuthError::InvalidSession)
        }
    }

    /// Revoke a lineage by id without holding its refresh token.
    /// Returns `false` if no live lineage has that id.
    ///
    /// # Errors
    /// [`AuthError::DependencyUnavailable`] if the store is down or the record
    /// keeps changing under contention.
    #[instrument(skip(self))]
    pub async fn logout_session(&self, sid: &str) -> Result<bool, AuthError> {
        let key = session_key(sid);
        for _ in 0..LOGOUT_SESSION_ATTEMPTS {
            let Some(current) = self.store.get(&key).await? else {
                return Ok(false);
            };
            if current == REVOKED {
                return Ok(true);
            }
            if self
                .store
                .compare_and_swap(&key, &current, REVOKED, self.refresh_ttl)
                .await?
            {
                info!(sid, "session revoked");
                return Ok(true);
            }
        }
        Err(AuthError::DependencyUnavailable(format!(
            "session {sid} kept rotating during revocation"
        )))
    }

    fn validate_refresh(&self, refresh_token: &str) -> Result<Claims, AuthError> {
        self.codec
            .validate(refresh_token, TokenKind::Refresh)
            .map_err(|err| {
                debug!("refresh token rejected: {err}");
                AuthError::InvalidSession
            })
    }

    async fn revoke_after_reuse(&self, key: &str, sid: &str) {
        let current = match self.store.get(key).await {
            Ok(Some(current)) if current != REVOKED => current,
            Ok(_) => return,
            Err(err) => {
                warn!(sid, "failed to read session during reuse detection: {err}");
                return;
            }
        };
        match self
            .store
            .compare_and_swap(key, &current, REVOKED, self.refresh_ttl)
            .await
        {
            Ok(true) => warn!(sid, "refresh token reuse detected, session revoked"),
            Ok(false) => debug!(sid, "session changed during reuse revocation"),
            Err(err) => warn!(sid, "failed to revoke session after reuse: {err}"),
        }
    }

    fn issue_pair(&self, user: &User, sid: &str, rid: &str) -> Result<TokenPair, AuthError> {
        let now = now_unix();
        let subject = user.id.to_string();
        let access = Claims::new(TokenKind::Access, subject.clone(), self.access_ttl, now)
            .with_role(user.role)
            .with_ext(EMAIL_CLAIM, user.email.clone());
        let refresh = Claims::new(TokenKind::Refresh, subject, self.refresh_ttl, now)
            .with_jti(rid)
            .with_session(sid)
            .with_ext(EMAIL_CLAIM, user.email.clone());
        Ok(TokenPair {
            access_token: self.codec.issue(&access)?,
            refresh_token: self.codec.issue(&refresh)?,
            token_type: "bearer".to_string(),
            expires_in: self.access_ttl.as_secs(),
        })
    }
}

/// Session lineage id carried by a refresh token, without validating rotation state.
///
/// # Errors
/// Any token validation failure maps to [`AuthError::InvalidSession`].
pub fn session_id(codec: &TokenCodec, refresh_token: &str) -> Result<String, AuthError> {
    codec
        .validate(refresh_token, TokenKind::Refresh)
        .ok()
        .and_then(|claims| claims.sid)
        .ok_or(AuthError::InvalidSession)
}

/// Parse the `sub` claim of an access token into a user id.
pub(crate) fn user_id(claims: &Claims) -> Result<Uuid, AuthError> {
    Uuid::parse_str(&claims.sub).map_err(|_| AuthError::Malformed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::test_support::{TestEnv, PASSWORD};
    use crate::store::StoreError;
    use crate::users::{MemoryUserStore, NewUser, Role, User};
    use anyhow::{Context, Result};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Counts digest lookups on top of the memory store.
    struct CountingUsers {
        inner: Arc<MemoryUserStore>,
        digest_reads: AtomicUsize,
    }

    #[async_trait]
    impl UserStore for CountingUsers {
        async fn get_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
            self.inner.get_user_by_email(email).await
        }

        async fn create_user(&self, user: NewUser) -> Result<User, StoreError> {
            self.inner.create_user(user).await
        }

        async fn set_verified(&self, user_id: Uuid) -> Result<bool, StoreError> {
            self.inner.set_verified(user_id).await
        }

        async fn get_password_hash(&self, user_id: Uuid) -> Result<Option<String>, StoreError> {
            self.digest_reads.fetch_add(1, Ordering::SeqCst);
            self.inner.get_password_hash(user_id).await
        }

        async fn update_password(
            &self,
            user_id: Uuid,
            password_hash: &str,
        ) -> Result<bool, StoreError> {
            self.inner.update_password(user_id, password_hash).await
        }

        async fn ping(&self) -> Result<(), StoreError> {
            self.inner.ping().await
        }
    }

    #[tokio::test]
    async fn login_issues_pair() -> Result<()> {
        let env = TestEnv::new();
        let user = env.seed_user("alice@example.com", true, Role::Moderator).await?;

        let pair = env.sessions.login(" Alice@Example.com ", PASSWORD).await?;
        assert_eq!(pair.token_type, "bearer");
        assert_eq!(pair.expires_in, 900);

        let access = env.codec.validate(&pair.access_token, TokenKind::Access)?;
        assert_eq!(access.sub, user.id.to_string());
        assert_eq!(access.role, Some(Role::Moderator));
        assert_eq!(access.ext(EMAIL_CLAIM), Some("alice@example.com"));

        let refresh = env.codec.validate(&pair.refresh_token, TokenKind::Refresh)?;
        let sid = refresh.sid.context("refresh token carries a session id")?;
        assert_eq!(
            env.store.get(&session_key(&sid)).await?,
            Some(refresh.jti.clone())
        );
        Ok(())
    }

    #[tokio::test]
    async fn wrong_password_and_unknown_user_look_the_same() -> Result<()> {
        let env = TestEnv::new();
        env.seed_user("alice@example.com", true, Role::User).await?;

        let wrong = env.sessions.login("alice@example.com", "wrong-pass").await;
        let unknown = env.sessions.login("nobody@example.com", PASSWORD).await;
        assert!(matches!(wrong, Err(AuthError::InvalidCredentials)));
        assert!(matches!(unknown, Err(AuthError::InvalidCredentials)));
        Ok(())
    }

    #[tokio::test]
    async fn unverified_email_is_rejected_after_password_check() -> Result<()> {
        let env = TestEnv::new();
        env.seed_user("bob@example.com", false, Role::User).await?;

        assert!(matches!(
            env.sessions.login("bob@example.com", PASSWORD).await,
            Err(AuthError::EmailNotVerified)
        ));
        assert!(matches!(
            env.sessions.login("bob@example.com", "not-it").await,
            Err(AuthError::InvalidCredentials)
        ));
        Ok(())
    }

    #[tokio::test]
    async fn refresh_rotates_and_old_token_fails() -> Result<()> {
        let env = TestEnv::new();
        env.seed_user("alice@example.com", true, Role::User).await?;
        let first = env.sessions.login("alice@example.com", PASSWORD).await?;

        let second = env.sessions.refresh(&first.refresh_token).await?;
        assert_ne!(second.refresh_token, first.refresh_token);
        assert_eq!(
            session_id(&env.codec, &first.refresh_token)?,
            session_id(&env.codec, &second.refresh_token)?
        );

        assert!(matches!(
            env.sessions.refresh(&first.refresh_token).await,
            Err(AuthError::InvalidSession)
        ));
        Ok(())
    }

    #[tokio::test]
    async fn reuse_revokes_lineage() -> Result<()> {
        let env = TestEnv::with_config(TestEnv::config().with_rotation_grace_seconds(0));
        env.seed_user("alice@example.com", true, Role::User).await?;
        let first = env.sessions.login("alice@example.com", PASSWORD).await?;
        let second = env.sessions.refresh(&first.refresh_token).await?;

        // Replaying the rotated token burns the current one too.
        assert!(env.sessions.refresh(&first.refresh_token).await.is_err());
        assert!(matches!(
            env.sessions.refresh(&second.refresh_token).await,
            Err(AuthError::InvalidSession)
        ));
        let sid = session_id(&env.codec, &second.refresh_token)?;
        assert_eq!(
            env.store.get(&session_key(&sid)).await?.as_deref(),
            Some(REVOKED)
        );
        Ok(())
    }

    #[tokio::test]
    async fn predecessor_within_grace_is_rejected_without_revoking() -> Result<()> {
        let env = TestEnv::new();
        env.seed_user("alice@example.com", true, Role::User).await?;
        let first = env.sessions.login("alice@example.com", PASSWORD).await?;
        let second = env.sessions.refresh(&first.refresh_token).await?;

        assert!(matches!(
            env.sessions.refresh(&first.refresh_token).await,
            Err(AuthError::InvalidSession)
        ));
        env.sessions.refresh(&second.refresh_token).await?;
        Ok(())
    }

    #[tokio::test]
    async fn older_replay_revokes_even_within_grace() -> Result<()> {
        let env = TestEnv::new();
        env.seed_user("alice@example.com", true, Role::User).await?;
        let first = env.sessions.login("alice@example.com", PASSWORD).await?;
        let second = env.sessions.refresh(&first.refresh_token).await?;
        let third = env.sessions.refresh(&second.refresh_token).await?;

        assert!(env.sessions.refresh(&first.refresh_token).await.is_err());
        assert!(matches!(
            env.sessions.refresh(&third.refresh_token).await,
            Err(AuthError::InvalidSession)
        ));
        Ok(())
    }

    #[tokio::test]
    async fn reuse_detection_can_be_disabled() -> Result<()> {
        let env = TestEnv::with_config(
            TestEnv::config()
                .with_revoke_on_reuse(false)
                .with_rotation_grace_seconds(0),
        );
        env.seed_user("alice@example.com", true, Role::User).await?;
        let first = env.sessions.login("alice@example.com", PASSWORD).await?;
        let second = env.sessions.refresh(&first.refresh_token).await?;

        assert!(env.sessions.refresh(&first.refresh_token).await.is_err());
        assert!(env.sessions.refresh(&second.refresh_token).await.is_ok());
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_refreshes_have_one_winner() -> Result<()> {
        let env = Arc::new(TestEnv::new());
        env.seed_user("alice@example.com", true, Role::User).await?;
        let pair = env.sessions.login("alice@example.com", PASSWORD).await?;

        let mut handles = Vec::new();
        for _ in 0..2 {
            let env = env.clone();
            let token = pair.refresh_token.clone();
            handles.push(tokio::spawn(async move { env.sessions.refresh(&token).await }));
        }
        let mut winners = Vec::new();
        let mut losses = 0;
        for handle in handles {
            match handle.await? {
                Ok(pair) => winners.push(pair),
                Err(AuthError::InvalidSession) => losses += 1,
                Err(err) => anyhow::bail!("unexpected error: {err}"),
            }
        }
        assert_eq!((winners.len(), losses), (1, 1));

        // The loser must not have revoked the winner's lineage.
        let winner = winners.pop().context("one winner")?;
        env.sessions.refresh(&winner.refresh_token).await?;
        Ok(())
    }

    #[tokio::test]
    async fn logout_revokes_refresh() -> Result<()> {
        let env = TestEnv::new();
        env.seed_user("alice@example.com", true, Role::User).await?;
        let pair = env.sessions.login("alice@example.com", PASSWORD).await?;

        env.sessions.logout(&pair.refresh_token).await?;
        assert!(matches!(
            env.sessions.refresh(&pair.refresh_token).await,
            Err(AuthError::InvalidSession)
        ));
        assert!(matches!(
            env.sessions.logout(&pair.refresh_token).await,
            Err(AuthError::InvalidSession)
        ));
        Ok(())
    }

    #[tokio::test]
    async fn logout_session_by_id() -> Result<()> {
        let env = TestEnv::new();
        env.seed_user("alice@example.com", true, Role::User).await?;
        let pair = env.sessions.login("alice@example.com", PASSWORD).await?;
        let sid = session_id(&env.codec, &pair.refresh_token)?;

        assert!(env.sessions.logout_session(&sid).await?);
        assert!(env.sessions.logout_session(&sid).await?);
        assert!(!env.sessions.logout_session("01UNKNOWNSESSION").await?);
        assert!(env.sessions.refresh(&pair.refresh_token).await.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn garbage_refresh_tokens_are_invalid_sessions() -> Result<()> {
        let env = TestEnv::new();
        env.seed_user("alice@example.com", true, Role::User).await?;
        let pair = env.sessions.login("alice@example.com", PASSWORD).await?;

        for token in ["", "a.b.c", pair.access_token.as_str()] {
            assert!(matches!(
                env.sessions.refresh(token).await,
                Err(AuthError::InvalidSession)
            ));
        }
        Ok(())
    }

    #[tokio::test]
    async fn deleted_account_cannot_refresh() -> Result<()> {
        let env = TestEnv::new();
        env.seed_user("alice@example.com", true, Role::User).await?;
        let pair = env.sessions.login("alice@example.com", PASSWORD).await?;

        // A token for another subject with the same email claim.
        let mut claims = env.codec.validate(&pair.refresh_token, TokenKind::Refresh)?;
        claims.sub = Uuid::new_v4().to_string();
        let forged = env.codec.issue(&claims)?;
        assert!(matches!(
            env.sessions.refresh(&forged).await,
            Err(AuthError::InvalidSession)
        ));
        Ok(())
    }

    #[test]
    fn rotation_record_parsing() {
        assert_eq!(
            Rotation::parse("01A"),
            Rotation {
                current: "01A",
                previous: None
            }
        );
        let record = Rotation::record("01B", "01A", 1_700_000_000);
        let rotation = Rotation::parse(&record);
        assert_eq!(rotation.current, "01B");
        assert_eq!(rotation.previous, Some(("01A", 1_700_000_000)));

        assert!(rotation.just_superseded("01A", 1_700_000_001, 2));
        assert!(!rotation.just_superseded("01A", 1_700_000_002, 2));
        assert!(!rotation.just_superseded("01A", 1_700_000_000, 0));
        assert!(!rotation.just_superseded("01Z", 1_700_000_000, 2));
    }

    #[tokio::test]
    async fn login_reads_one_digest_for_known_and_unknown_accounts() -> Result<()> {
        let env = TestEnv::new();
        env.seed_user("alice@example.com", true, Role::User).await?;
        let users = Arc::new(CountingUsers {
            inner: env.users.clone(),
            digest_reads: AtomicUsize::new(0),
        });
        let sessions = SessionManager::new(
            &TestEnv::config(),
            env.codec.clone(),
            env.hasher.clone(),
            users.clone(),
            env.store.clone(),
        );

        sessions.login("alice@example.com", PASSWORD).await?;
        assert_eq!(users.digest_reads.load(Ordering::SeqCst), 1);

        assert!(matches!(
            sessions.login("nobody@example.com", PASSWORD).await,
            Err(AuthError::InvalidCredentials)
        ));
        assert_eq!(users.digest_reads.load(Ordering::SeqCst), 2);
        Ok(())
    }
}
