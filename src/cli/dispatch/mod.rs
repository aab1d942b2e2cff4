//! Command-line argument dispatch.
//!
//! Maps validated CLI matches to the action the binary executes, such as
//! starting the API server with its full configuration.

use crate::cli::actions::{Action, server::Args};
use crate::cli::commands::{
    ARG_DSN, ARG_PORT, ARG_PURGE_INTERVAL_SECONDS, auth, gate, mail, rate_limit,
};
use anyhow::Result;
use secrecy::SecretString;
use std::time::Duration;

/// Map validated CLI matches to a server action.
///
/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>(ARG_PORT).copied().unwrap_or(8080);
    let dsn = matches
        .get_one::<String>(ARG_DSN)
        .filter(|dsn| !dsn.is_empty())
        .map(|dsn| SecretString::from(dsn.clone()));
    let purge_interval = Duration::from_secs(
        matches
            .get_one::<u64>(ARG_PURGE_INTERVAL_SECONDS)
            .copied()
            .unwrap_or(60),
    );

    let auth_opts = auth::Options::parse(matches)?;
    let rate_limit_opts = rate_limit::Options::parse(matches)?;
    let mail_opts = mail::Options::parse(matches)?;
    let gate_opts = gate::Options::parse(matches)?;

    Ok(Action::Server(Args {
        port,
        dsn,
        purge_interval,
        jwt_secret: auth_opts.jwt_secret,
        jwt_algorithm: auth_opts.jwt_algorithm,
        password_pepper: auth_opts.password_pepper,
        frontend_base_url: auth_opts.frontend_base_url,
        access_ttl_seconds: auth_opts.access_ttl_seconds,
        refresh_ttl_seconds: auth_opts.refresh_ttl_seconds,
        email_token_ttl_seconds: auth_opts.email_token_ttl_seconds,
        reset_token_ttl_seconds: auth_opts.reset_token_ttl_seconds,
        resend_cooldown_seconds: auth_opts.resend_cooldown_seconds,
        clock_skew_seconds: auth_opts.clock_skew_seconds,
        revoke_on_reuse: auth_opts.revoke_on_reuse,
        rotation_grace_seconds: auth_opts.rotation_grace_seconds,
        trust_proxy_headers: gate_opts.trust_proxy_headers,
        gate: gate_opts.gate,
        rate_limit_disabled: rate_limit_opts.disabled,
        rate_limit: rate_limit_opts.config,
        mail_webhook_url: mail_opts.webhook_url,
        mail_timeout: mail_opts.timeout,
        mail_retry: mail_opts.retry,
    }))
}
