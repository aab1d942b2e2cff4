//! Shared fixtures for auth unit tests.

use anyhow::Result;
use argon2::Params;
use async_trait::async_trait;
use secrecy::SecretString;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::password::CredentialHasher;
use super::session::SessionManager;
use super::state::AuthConfig;
use super::token::{Algorithm, TokenCodec};
use super::verification::VerificationFlow;
use crate::mail::{EmailMessage, EmailSender, Mailer, RetryConfig};
use crate::store::MemoryStore;
use crate::users::{MemoryUserStore, NewUser, Role, User, UserStore};

pub(crate) const PASSWORD: &str = "correct-horse";
pub(crate) const FRONTEND: &str = "https://warden.test";

#[derive(Default)]
pub(crate) struct RecordingSender {
    sent: Mutex<Vec<EmailMessage>>,
}

impl RecordingSender {
    pub(crate) fn sent(&self) -> Vec<EmailMessage> {
        self.sent
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    /// Wait for spawned dispatch tasks to deliver at least `count` messages.
    pub(crate) async fn wait_for(&self, count: usize) -> Vec<EmailMessage> {
        for _ in 0..200 {
            let sent = self.sent();
            if sent.len() >= count {
                return sent;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        self.sent()
    }
}

#[async_trait]
impl EmailSender for RecordingSender {
    async fn send(&self, message: &EmailMessage) -> Result<()> {
        self.sent
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(message.clone());
        Ok(())
    }
}

pub(crate) struct TestEnv {
    pub codec: TokenCodec,
    pub hasher: CredentialHasher,
    pub users: Arc<MemoryUserStore>,
    pub store: Arc<MemoryStore>,
    pub outbox: Arc<RecordingSender>,
    pub sessions: SessionManager,
    pub verification: VerificationFlow,
}

impl TestEnv {
    pub(crate) fn config() -> AuthConfig {
        AuthConfig::new(FRONTEND.to_string())
    }

    pub(crate) fn new() -> Self {
        Self::with_config(Self::config())
    }

    pub(crate) fn with_config(config: AuthConfig) -> Self {
        let codec = TokenCodec::new(
            SecretString::from("unit-test-secret".to_string()),
            Algorithm::HS256,
        );
        let hasher = CredentialHasher::new(Some(SecretString::from("pepper".to_string())))
            .with_params(Params::new(1024, 1, 1, None).unwrap_or_default());
        let users = Arc::new(MemoryUserStore::new());
        let store = Arc::new(MemoryStore::new());
        let outbox = Arc::new(RecordingSender::default());
        let mailer = Mailer::new(outbox.clone(), RetryConfig::new().with_max_attempts(1));

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
            codec,
            hasher,
            users,
            store,
            outbox,
            sessions,
            verification,
        }
    }

    pub(crate) async fn seed_user(&self, email: &str, verified: bool, role: Role) -> Result<User> {
        let user = self
            .users
            .create_user(NewUser {
                username: "tester".to_string(),
                email: email.to_string(),
                password_hash: self.hasher.hash(PASSWORD)?,
                role,
            })
            .await?;
        if verified {
            self.users.set_verified(user.id).await?;
        }
        Ok(User { verified, ..user })
    }
}
