use anyhow::{Context, Result};
use clap::{Arg, Command};
use std::time::Duration;
use url::Url;

use crate::mail::RetryConfig;

pub const ARG_MAIL_WEBHOOK_URL: &str = "mail-webhook-url";
pub const ARG_MAIL_TIMEOUT_SECONDS: &str = "mail-timeout-seconds";
pub const ARG_MAIL_MAX_ATTEMPTS: &str = "mail-max-attempts";
pub const ARG_MAIL_BACKOFF_BASE_SECONDS: &str = "mail-backoff-base-seconds";
pub const ARG_MAIL_BACKOFF_MAX_SECONDS: &str = "mail-backoff-max-seconds";

#[derive(Debug)]
pub struct Options {
    /// Mail is only logged when no webhook is configured.
    pub webhook_url: Option<Url>,
    pub timeout: Duration,
    pub retry: RetryConfig,
}

impl Options {
    /// # Errors
    /// Returns an error if the webhook URL cannot be parsed.
    pub fn parse(matches: &clap::ArgMatches) -> Result<Self> {
        let webhook_url = matches
            .get_one::<String>(ARG_MAIL_WEBHOOK_URL)
            .map(|url| Url::parse(url).with_context(|| format!("invalid --mail-webhook-url: {url}")))
            .transpose()?;
        let seconds = |id: &str| Duration::from_secs(matches.get_one::<u64>(id).copied().unwrap_or_default());

        let retry = RetryConfig::new()
            .with_max_attempts(
                matches
                    .get_one::<u32>(ARG_MAIL_MAX_ATTEMPTS)
                    .copied()
                    .unwrap_or(5),
            )
            .with_backoff_base(seconds(ARG_MAIL_BACKOFF_BASE_SECONDS))
            .with_backoff_max(seconds(ARG_MAIL_BACKOFF_MAX_SECONDS))
            .normalize();

        Ok(Self {
            webhook_url,
            timeout: seconds(ARG_MAIL_TIMEOUT_SECONDS),
            retry,
        })
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_MAIL_WEBHOOK_URL)
                .long("mail-webhook-url")
                .help("Webhook that receives outbound mail as JSON; mail is only logged when unset")
                .env("WARDEN_MAIL_WEBHOOK_URL"),
        )
        .arg(
            Arg::new(ARG_MAIL_TIMEOUT_SECONDS)
                .long("mail-timeout-seconds")
                .help("Timeout for each webhook delivery attempt")
                .env("WARDEN_MAIL_TIMEOUT_SECONDS")
                .default_value("10")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new(ARG_MAIL_MAX_ATTEMPTS)
                .long("mail-max-attempts")
                .help("Max delivery attempts per message")
                .env("WARDEN_MAIL_MAX_ATTEMPTS")
                .default_value("5")
                .value_parser(clap::value_parser!(u32)),
        )
        .arg(
            Arg::new(ARG_MAIL_BACKOFF_BASE_SECONDS)
                .long("mail-backoff-base-seconds")
                .help("Base delay for delivery retry backoff")
                .env("WARDEN_MAIL_BACKOFF_BASE_SECONDS")
                .default_value("1")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_MAIL_BACKOFF_MAX_SECONDS)
                .long("mail-backoff-max-seconds")
                .help("Max delay for delivery retry backoff")
                .env("WARDEN_MAIL_BACKOFF_MAX_SECONDS")
                .default_value("60")
                .value_parser(clap::value_parser!(u64)),
        )
}
