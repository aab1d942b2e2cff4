//! Outbound email collaborator.
//!
//! Auth flows never wait on mail delivery. [`Mailer::dispatch`] hands the
//! message to a spawned task that calls the configured [`EmailSender`] and
//! retries failures with exponential backoff and jitter. Nothing about the
//! outcome flows back into the request that triggered it.
//!
//! Two senders ship with the crate:
//! - [`LogEmailSender`]: logs the message (local development default).
//! - [`HttpEmailSender`]: posts the message as JSON to a delivery webhook.

use anyhow::{Context, Result};
use async_trait::async_trait;
use rand::Rng;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{Instrument, debug, error, info, info_span, warn};
use url::Url;

pub const TEMPLATE_VERIFY_EMAIL: &str = "verify-email";
pub const TEMPLATE_PASSWORD_RESET: &str = "password-reset";

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct EmailMessage {
    pub to_email: String,
    pub template: String,
    pub payload: serde_json::Value,
}

#[async_trait]
pub trait EmailSender: Send + Sync {
    /// Deliver a message or return an error so the dispatcher retries it.
    async fn send(&self, message: &EmailMessage) -> Result<()>;
}

/// Local dev sender that logs the payload instead of sending real email.
#[derive(Clone, Debug)]
pub struct LogEmailSender;

#[async_trait]
impl EmailSender for LogEmailSender {
    async fn send(&self, message: &EmailMessage) -> Result<()> {
        info!(
            to_email = %message.to_email,
            template = %message.template,
            payload = %message.payload,
            "email send stub"
        );
        Ok(())
    }
}

/// Posts each message as JSON to a mail delivery webhook.
#[derive(Clone, Debug)]
pub struct HttpEmailSender {
    client: reqwest::Client,
    url: Url,
}

impl HttpEmailSender {
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(url: Url, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(crate::APP_USER_AGENT)
            .timeout(timeout)
            .build()
            .context("Failed to build mail webhook client")?;
        Ok(Self { client, url })
    }
}

#[async_trait]
impl EmailSender for HttpEmailSender {
    async fn send(&self, message: &EmailMessage) -> Result<()> {
        let span = info_span!(
            "mail.webhook",
            http.method = "POST",
            url = %self.url,
            template = %message.template
        );
        self.client
            .post(self.url.clone())
            .json(message)
            .send()
            .instrument(span)
            .await
            .context("mail webhook request failed")?
            .error_for_status()
            .context("mail webhook rejected message")?;
        Ok(())
    }
}

#[derive(Clone, Copy, Debug)]
pub struct RetryConfig {
    max_attempts: u32,
    backoff_base: Duration,
    backoff_max: Duration,
}

impl RetryConfig {
    /// Default: 5 attempts, 1s->60s exponential backoff with jitter.
    #[must_use]
    pub fn new() -> Self {
        Self {
            max_attempts: 5,
            backoff_base: Duration::from_secs(1),
            backoff_max: Duration::from_secs(60),
        }
    }

    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    #[must_use]
    pub fn with_backoff_base(mut self, base: Duration) -> Self {
        self.backoff_base = base;
        self
    }

    #[must_use]
    pub fn with_backoff_max(mut self, max: Duration) -> Self {
        self.backoff_max = max;
        self
    }

    #[must_use]
    pub fn normalize(self) -> Self {
        let backoff_base = if self.backoff_base.is_zero() {
            Duration::from_millis(100)
        } else {
            self.backoff_base
        };
        Self {
            max_attempts: self.max_attempts.max(1),
            backoff_base,
            backoff_max: self.backoff_max.max(backoff_base),
        }
    }

    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone)]
pub struct Mailer {
    sender: Arc<dyn EmailSender>,
    retry: RetryConfig,
}

impl Mailer {
    #[must_use]
    pub fn new(sender: Arc<dyn EmailSender>, retry: RetryConfig) -> Self {
        Self {
            sender,
            retry: retry.normalize(),
        }
    }

    /// Send `message` on a spawned task. The returned handle is only useful to tests.
    pub fn dispatch(&self, message: EmailMessage) -> tokio::task::JoinHandle<()> {
        let sender = self.sender.clone();
        let retry = self.retry;
        tokio::spawn(async move {
            let mut attempt = 1;
            loop {
                match sender.send(&message).await {
                    Ok(()) => {
                        debug!(template = %message.template, attempt, "email delivered");
                        return;
                    }
                    Err(err) if attempt >= retry.max_attempts => {
                        error!(
                            template = %message.template,
                            attempt,
                            "giving up on email delivery: {err:#}"
                        );
                        return;
                    }
                    Err(err) => {
                        let delay = backoff_delay(attempt, retry.backoff_base, retry.backoff_max);
                        warn!(
                            template = %message.template,
                            attempt,
                            retry_in_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                            "email delivery failed: {err:#}"
                        );
                        sleep(delay).await;
                        attempt += 1;
                    }
                }
            }
        })
    }
}

impl Default for Mailer {
    fn default() -> Self {
        Self::new(Arc::new(LogEmailSender), RetryConfig::new())
    }
}

fn backoff_delay(attempt: u32, base: Duration, max: Duration) -> Duration {
    let shift = attempt.saturating_sub(1).min(31);
    let factor = 1u32 << shift;
    let delay = base.checked_mul(factor).unwrap_or(max);
    let capped = if delay > max { max } else { delay };
    jitter_delay(capped)
}

fn jitter_delay(delay: Duration) -> Duration {
    let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
    if delay_ms < 2 {
        return delay;
    }
    let half = delay_ms / 2;
    let jitter = rand::thread_rng().gen_range(0..=half);
    Duration::from_millis(half + jitter)
}
