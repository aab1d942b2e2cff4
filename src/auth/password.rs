//! Password hashing with Argon2id and an optional server-side pepper.

use argon2::{
    Argon2, Params, PasswordHash, PasswordHasher, PasswordVerifier, password_hash::SaltString,
};
use rand::rngs::OsRng;
use secrecy::{ExposeSecret, SecretString};
use std::sync::{Arc, OnceLock};
use tracing::debug;

use super::error::AuthError;

const DUMMY_PASSWORD: &str = "warden-dummy-password";

#[derive(Clone, Debug)]
pub struct CredentialHasher {
    pepper: Option<SecretString>,
    params: Params,
    // Hash verified for unknown accounts so login timing stays comparable.
    dummy: Arc<OnceLock<Option<String>>>,
}

impl Default for CredentialHasher {
    fn default() -> Self {
        Self::new(None)
    }
}

impl CredentialHasher {
    #[must_use]
    pub fn new(pepper: Option<SecretString>) -> Self {
        Self {
            pepper,
            params: Params::default(),
            dummy: Arc::new(OnceLock::new()),
        }
    }

    /// Override the Argon2 cost parameters.
    #[must_use]
    pub fn with_params(mut self, params: Params) -> Self {
        self.params = params;
        self.dummy = Arc::new(OnceLock::new());
        self
    }

    fn argon2(&self) -> Result<Argon2<'_>, AuthError> {
        match &self.pepper {
            Some(pepper) => Argon2::new_with_secret(
                pepper.expose_secret().as_bytes(),
                argon2::Algorithm::Argon2id,
                argon2::Version::V0x13,
                self.params.clone(),
            )
            .map_err(|err| AuthError::Internal(format!("failed to initialize Argon2id: {err}"))),
            None => Ok(Argon2::new(
                argon2::Algorithm::Argon2id,
                argon2::Version::V0x13,
                self.params.clone(),
            )),
        }
    }

    /// Hash `password` into a PHC string with an embedded random salt.
    ///
    /// # Errors
    /// Returns [`AuthError::Internal`] if Argon2 rejects its inputs.
    pub fn hash(&self, password: &str) -> Result<String, AuthError> {
        let salt = SaltString::generate(&mut OsRng);
        Ok(self
            .argon2()?
            .hash_password(password.as_bytes(), &salt)
            .map_err(|err| AuthError::Internal(format!("failed to hash password: {err}")))?
            .to_string())
    }

    /// Constant-time check of `password` against a stored digest.
    /// Malformed digests never match.
    #[must_use]
    pub fn verify(&self, password: &str, digest: &str) -> bool {
        let parsed = match PasswordHash::new(digest) {
            Ok(parsed) => parsed,
            Err(err) => {
                debug!("stored password digest is malformed: {err}");
                return false;
            }
        };
        match self.argon2() {
            Ok(argon2) => argon2.verify_password(password.as_bytes(), &parsed).is_ok(),
            Err(err) => {
                debug!("password verification unavailable: {err}");
                false
            }
        }
    }

    /// Spend the same work as a real verification and fail.
    pub fn verify_dummy(&self, password: &str) -> bool {
        let dummy = self
            .dummy
            .get_or_init(|| self.hash(DUMMY_PASSWORD).ok());
        if let Some(digest) = dummy {
            let _ = self.verify(password, digest);
        }
        false
    }

    /// [`CredentialHasher::hash`] on the blocking thread pool.
    ///
    /// # Errors
    /// Returns [`AuthError::Internal`] if hashing fails or the task panics.
    pub async fn hash_blocking(&self, password: String) -> Result<String, AuthError> {
        let hasher = self.clone();
        tokio::task::spawn_blocking(move || hasher.hash(&password))
            .await
            .map_err(|err| AuthError::Internal(format!("password hashing task failed: {err}")))?
    }

    /// Verify on the blocking thread pool. A missing digest runs the dummy check.
    pub async fn verify_blocking(&self, password: String, digest: Option<String>) -> bool {
        let hasher = self.clone();
        tokio::task::spawn_blocking(move || match digest {
            Some(digest) => hasher.verify(&password, &digest),
            None => hasher.verify_dummy(&password),
        })
        .await
        .unwrap_or(false)
    }
}
