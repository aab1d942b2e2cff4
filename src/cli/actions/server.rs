use crate::{
    api::{self, RequestGate},
    auth::{
        Algorithm, AuthConfig, AuthState, CredentialHasher, NoopRateLimiter, RateLimitConfig,
        RateLimiter, StoreRateLimiter, TokenCodec,
    },
    mail::{EmailSender, HttpEmailSender, LogEmailSender, Mailer, RetryConfig},
    store::{FastStore, MemoryStore, PgStore, spawn_purge_task},
    users::{MemoryUserStore, PgUserStore, UserStore},
};
use anyhow::{Context, Result};
use secrecy::{ExposeSecret, SecretString};
use sqlx::postgres::PgPoolOptions;
use std::{sync::Arc, time::Duration};
use tracing::{info, warn};
use url::Url;

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: Option<SecretString>,
    pub purge_interval: Duration,
    pub jwt_secret: SecretString,
    pub jwt_algorithm: Algorithm,
    pub password_pepper: Option<SecretString>,
    pub frontend_base_url: String,
    pub access_ttl_seconds: u64,
    pub refresh_ttl_seconds: u64,
    pub email_token_ttl_seconds: u64,
    pub reset_token_ttl_seconds: u64,
    pub resend_cooldown_seconds: u64,
    pub clock_skew_seconds: u64,
    pub revoke_on_reuse: bool,
    pub rotation_grace_seconds: u64,
    pub trust_proxy_headers: bool,
    pub gate: RequestGate,
    pub rate_limit_disabled: bool,
    pub rate_limit: RateLimitConfig,
    pub mail_webhook_url: Option<Url>,
    pub mail_timeout: Duration,
    pub mail_retry: RetryConfig,
}

/// Execute the server action.
/// # Errors
/// Returns an error if the database is unreachable, the schema cannot be
/// applied, or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    log_startup_args(&args);

    let (users, store): (Arc<dyn UserStore>, Arc<dyn FastStore>) = match &args.dsn {
        Some(dsn) => {
            let pool = PgPoolOptions::new()
                .min_connections(1)
                .max_connections(10)
                .max_lifetime(Duration::from_secs(60 * 2))
                .test_before_acquire(true)
                .connect(dsn.expose_secret())
                .await
                .context("Failed to connect to database")?;

            let store = PgStore::new(pool.clone());
            store
                .ensure_schema()
                .await
                .context("Failed to apply database schema")?;
            (Arc::new(PgUserStore::new(pool)), Arc::new(store))
        }
        None => {
            warn!("No DSN configured: using in-memory stores, state is lost on restart");
            (Arc::new(MemoryUserStore::new()), Arc::new(MemoryStore::new()))
        }
    };

    spawn_purge_task(store.clone(), args.purge_interval);

    let rate_limiter: Arc<dyn RateLimiter> = if args.rate_limit_disabled {
        warn!("Rate limiting is disabled");
        Arc::new(NoopRateLimiter)
    } else {
        Arc::new(StoreRateLimiter::new(store.clone(), args.rate_limit))
    };

    let sender: Arc<dyn EmailSender> = match args.mail_webhook_url {
        Some(url) => Arc::new(HttpEmailSender::new(url, args.mail_timeout)?),
        None => Arc::new(LogEmailSender),
    };
    let mailer = Mailer::new(sender, args.mail_retry);

    let codec = TokenCodec::new(args.jwt_secret, args.jwt_algorithm)
        .with_leeway(Duration::from_secs(args.clock_skew_seconds));
    let hasher = CredentialHasher::new(args.password_pepper);

    let auth_config = AuthConfig::new(args.frontend_base_url)
        .with_access_ttl_seconds(args.access_ttl_seconds)
        .with_refresh_ttl_seconds(args.refresh_ttl_seconds)
        .with_email_token_ttl_seconds(args.email_token_ttl_seconds)
        .with_reset_token_ttl_seconds(args.reset_token_ttl_seconds)
        .with_resend_cooldown_seconds(args.resend_cooldown_seconds)
        .with_revoke_on_reuse(args.revoke_on_reuse)
        .with_rotation_grace_seconds(args.rotation_grace_seconds)
        .with_trust_proxy_headers(args.trust_proxy_headers);

    let auth_state = Arc::new(AuthState::new(
        auth_config,
        codec,
        hasher,
        users,
        store,
        rate_limiter,
        mailer,
    ));

    api::new(args.port, auth_state, args.gate).await
}

fn log_startup_args(args: &Args) {
    let entries = [
        ("listen", format!("tcp:{}", args.port)),
        (
            "dsn",
            args.dsn
                .as_ref()
                .map_or_else(|| "none (in-memory)".to_string(), |dsn| {
                    redact_dsn(dsn.expose_secret())
                }),
        ),
        ("jwt_algorithm", args.jwt_algorithm.to_string()),
        ("password_pepper_set", args.password_pepper.is_some().to_string()),
        ("frontend_base_url", args.frontend_base_url.clone()),
        ("access_ttl_seconds", args.access_ttl_seconds.to_string()),
        ("refresh_ttl_seconds", args.refresh_ttl_seconds.to_string()),
        ("clock_skew_seconds", args.clock_skew_seconds.to_string()),
        ("revoke_on_reuse", args.revoke_on_reuse.to_string()),
        ("rotation_grace_seconds", args.rotation_grace_seconds.to_string()),
        ("trust_proxy_headers", args.trust_proxy_headers.to_string()),
        ("request_gate_enabled", (!args.gate.is_empty()).to_string()),
        ("rate_limit_enabled", (!args.rate_limit_disabled).to_string()),
        ("rate_limit_fail_open", args.rate_limit.fail_open().to_string()),
        (
            "mail_webhook",
            args.mail_webhook_url
                .as_ref()
                .map_or_else(|| "none (log only)".to_string(), ToString::to_string),
        ),
    ];
    log_entries("Startup configuration", &entries);
}

fn redact_dsn(dsn: &str) -> String {
    match Url::parse(dsn) {
        Ok(mut parsed) => {
            if parsed.password().is_some() {
                let _ = parsed.set_password(Some("REDACTED"));
            }
            parsed.to_string()
        }
        Err(_) => "invalid-dsn".to_string(),
    }
}

fn log_entries(title: &str, entries: &[(&str, String)]) {
    let max_key_len = entries.iter().map(|(key, _)| key.len()).max().unwrap_or(0);
    let mut message = format!(
        "{} {} - {}\n\n{title}:",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
        short_commit(crate::GIT_COMMIT_HASH)
    );
    for (key, value) in entries {
        let padding = " ".repeat(max_key_len.saturating_sub(key.len()));
        let _ =
            std::fmt::Write::write_fmt(&mut message, format_args!("\n  {key}:{padding} {value}"));
    }
    info!("{message}");
}

fn short_commit(hash: &str) -> String {
    let trimmed = hash.trim();
    if trimmed.len() > 7 {
        trimmed[..7].to_string()
    } else {
        trimmed.to_string()
    }
}
