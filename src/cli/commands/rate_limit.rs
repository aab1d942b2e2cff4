//! Per-route-class rate limit arguments.
//!
//! Each class takes a `LIMIT/WINDOW_SECONDS` policy, e.g. `--rate-limit-login 5/60`.
//! Classes left unset keep the built-in defaults.

use anyhow::Result;
use clap::{Arg, ArgAction, Command, builder::ValueParser};
use std::time::Duration;

use crate::auth::{RateLimitConfig, RateLimitPolicy, RouteClass};

pub const ARG_RATE_LIMIT_DISABLED: &str = "rate-limit-disabled";
pub const ARG_RATE_LIMIT_FAIL_CLOSED: &str = "rate-limit-fail-closed";

const CLASS_ARGS: [(RouteClass, &str, &str); 7] = [
    (RouteClass::Login, "rate-limit-login", "WARDEN_RATE_LIMIT_LOGIN"),
    (RouteClass::Signup, "rate-limit-signup", "WARDEN_RATE_LIMIT_SIGNUP"),
    (RouteClass::Refresh, "rate-limit-refresh", "WARDEN_RATE_LIMIT_REFRESH"),
    (
        RouteClass::VerifyEmail,
        "rate-limit-verify-email",
        "WARDEN_RATE_LIMIT_VERIFY_EMAIL",
    ),
    (
        RouteClass::ResendVerification,
        "rate-limit-resend-verification",
        "WARDEN_RATE_LIMIT_RESEND_VERIFICATION",
    ),
    (
        RouteClass::PasswordReset,
        "rate-limit-password-reset",
        "WARDEN_RATE_LIMIT_PASSWORD_RESET",
    ),
    (RouteClass::Api, "rate-limit-api", "WARDEN_RATE_LIMIT_API"),
];

#[derive(Debug)]
pub struct Options {
    pub disabled: bool,
    pub config: RateLimitConfig,
}

impl Options {
    /// # Errors
    /// Never in practice; policies are validated by clap.
    pub fn parse(matches: &clap::ArgMatches) -> Result<Self> {
        let config = CLASS_ARGS.iter().fold(
            RateLimitConfig::new().with_fail_open(!matches.get_flag(ARG_RATE_LIMIT_FAIL_CLOSED)),
            |config, (class, id, _)| match matches.get_one::<RateLimitPolicy>(id) {
                Some(policy) => config.with_policy(*class, *policy),
                None => config,
            },
        );
        Ok(Self {
            disabled: matches.get_flag(ARG_RATE_LIMIT_DISABLED),
            config,
        })
    }
}

#[must_use]
pub fn validator_policy() -> ValueParser {
    ValueParser::from(move |value: &str| -> std::result::Result<RateLimitPolicy, String> {
        let (limit, window) = value
            .split_once('/')
            .ok_or_else(|| "expected LIMIT/WINDOW_SECONDS, e.g. 5/60".to_string())?;
        let limit = limit
            .trim()
            .parse::<u64>()
            .map_err(|err| format!("invalid limit: {err}"))?;
        let window = window
            .trim()
            .parse::<u64>()
            .map_err(|err| format!("invalid window: {err}"))?;
        if limit == 0 || window == 0 {
            return Err("limit and window must be greater than zero".to_string());
        }
        Ok(RateLimitPolicy::new(limit, Duration::from_secs(window)))
    })
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    let command = command
        .arg(
            Arg::new(ARG_RATE_LIMIT_DISABLED)
                .long("rate-limit-disabled")
                .help("Disable rate limiting entirely (development only)")
                .env("WARDEN_RATE_LIMIT_DISABLED")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new(ARG_RATE_LIMIT_FAIL_CLOSED)
                .long("rate-limit-fail-closed")
                .help("Reject requests when the session store cannot be reached for rate limiting")
                .env("WARDEN_RATE_LIMIT_FAIL_CLOSED")
                .action(ArgAction::SetTrue),
        );

    CLASS_ARGS.iter().fold(command, |command, (_, id, env)| {
        command.arg(
            Arg::new(*id)
                .long(*id)
                .help("Rate limit policy as LIMIT/WINDOW_SECONDS")
                .env(*env)
                .value_parser(validator_policy()),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Options> {
        let matches = with_args(Command::new("warden")).try_get_matches_from(args)?;
        Options::parse(&matches)
    }

    #[test]
    fn defaults_keep_builtin_policies() -> Result<()> {
        temp_env::with_vars_unset(
            [
                "WARDEN_RATE_LIMIT_DISABLED",
                "WARDEN_RATE_LIMIT_FAIL_CLOSED",
                "WARDEN_RATE_LIMIT_LOGIN",
                "WARDEN_RATE_LIMIT_REFRESH",
            ],
            || {
                let options = parse(&["warden"])?;
                assert!(!options.disabled);
                assert!(options.config.fail_open());
                assert_eq!(
                    options.config.policy(RouteClass::Login),
                    RateLimitConfig::new().policy(RouteClass::Login)
                );
                assert_eq!(
                    options.config.policy(RouteClass::Refresh),
                    RateLimitPolicy::new(2, Duration::from_secs(10))
                );
                Ok(())
            },
        )
    }

    #[test]
    fn overrides_from_args_and_env() -> Result<()> {
        temp_env::with_vars(
            [
                ("WARDEN_RATE_LIMIT_API", Some("1000/60")),
                ("WARDEN_RATE_LIMIT_FAIL_CLOSED", Some("true")),
            ],
            || {
                let options = parse(&["warden", "--rate-limit-login", "10/30"])?;
                assert!(!options.config.fail_open());
                assert_eq!(
                    options.config.policy(RouteClass::Login),
                    RateLimitPolicy::new(10, Duration::from_secs(30))
                );
                assert_eq!(
                    options.config.policy(RouteClass::Api),
                    RateLimitPolicy::new(1000, Duration::from_secs(60))
                );
                Ok(())
            },
        )
    }

    #[test]
    fn rejects_malformed_policies() {
        temp_env::with_vars_unset(["WARDEN_RATE_LIMIT_LOGIN"], || {
            for bad in ["5", "0/60", "5/0", "five/60", "5/-1"] {
                assert!(
                    parse(&["warden", "--rate-limit-login", bad]).is_err(),
                    "accepted {bad}"
                );
            }
        });
    }
}
