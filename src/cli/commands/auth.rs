//! Token, credential and session lifetime arguments.

use anyhow::{Context, Result, anyhow};
use clap::{Arg, ArgAction, Command, builder::PossibleValuesParser};
use secrecy::SecretString;

use crate::auth::Algorithm;

pub const ARG_JWT_SECRET: &str = "jwt-secret";
pub const ARG_JWT_ALGORITHM: &str = "jwt-algorithm";
pub const ARG_PASSWORD_PEPPER: &str = "password-pepper";
pub const ARG_FRONTEND_BASE_URL: &str = "frontend-base-url";
pub const ARG_ACCESS_TTL_SECONDS: &str = "access-ttl-seconds";
pub const ARG_REFRESH_TTL_SECONDS: &str = "refresh-ttl-seconds";
pub const ARG_EMAIL_TOKEN_TTL_SECONDS: &str = "email-token-ttl-seconds";
pub const ARG_RESET_TOKEN_TTL_SECONDS: &str = "reset-token-ttl-seconds";
pub const ARG_RESEND_COOLDOWN_SECONDS: &str = "resend-cooldown-seconds";
pub const ARG_CLOCK_SKEW_SECONDS: &str = "clock-skew-seconds";
pub const ARG_KEEP_SESSION_ON_REUSE: &str = "keep-session-on-reuse";
pub const ARG_ROTATION_GRACE_SECONDS: &str = "rotation-grace-seconds";

/// HMAC keys shorter than this are rejected at startup.
const MIN_SECRET_LEN: usize = 32;

#[derive(Debug)]
pub struct Options {
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
}

impl Options {
    /// # Errors
    /// Returns an error if the secret is missing or too short, or the algorithm is unknown.
    pub fn parse(matches: &clap::ArgMatches) -> Result<Self> {
        let jwt_secret = matches
            .get_one::<String>(ARG_JWT_SECRET)
            .cloned()
            .context("missing required argument: --jwt-secret")?;
        if jwt_secret.len() < MIN_SECRET_LEN {
            return Err(anyhow!(
                "--jwt-secret must be at least {MIN_SECRET_LEN} bytes"
            ));
        }

        let jwt_algorithm = matches
            .get_one::<String>(ARG_JWT_ALGORITHM)
            .map_or(Ok(Algorithm::default()), |value| value.parse::<Algorithm>())
            .map_err(|err| anyhow!("invalid --jwt-algorithm: {err}"))?;

        let seconds = |id: &str| matches.get_one::<u64>(id).copied().unwrap_or_default();

        Ok(Self {
            jwt_secret: SecretString::from(jwt_secret),
            jwt_algorithm,
            password_pepper: matches
                .get_one::<String>(ARG_PASSWORD_PEPPER)
                .filter(|pepper| !pepper.is_empty())
                .map(|pepper| SecretString::from(pepper.clone())),
            frontend_base_url: matches
                .get_one::<String>(ARG_FRONTEND_BASE_URL)
                .cloned()
                .context("missing required argument: --frontend-base-url")?,
            access_ttl_seconds: seconds(ARG_ACCESS_TTL_SECONDS),
            refresh_ttl_seconds: seconds(ARG_REFRESH_TTL_SECONDS),
            email_token_ttl_seconds: seconds(ARG_EMAIL_TOKEN_TTL_SECONDS),
            reset_token_ttl_seconds: seconds(ARG_RESET_TOKEN_TTL_SECONDS),
            resend_cooldown_seconds: seconds(ARG_RESEND_COOLDOWN_SECONDS),
            clock_skew_seconds: seconds(ARG_CLOCK_SKEW_SECONDS),
            revoke_on_reuse: !matches.get_flag(ARG_KEEP_SESSION_ON_REUSE),
            rotation_grace_seconds: seconds(ARG_ROTATION_GRACE_SECONDS),
        })
    }
}

pub fn with_args(command: Command) -> Command {
    let command = with_token_args(command);
    let command = with_ttl_args(command);
    with_link_args(command)
}

fn with_token_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_JWT_SECRET)
                .long("jwt-secret")
                .help("Shared HMAC secret used to sign and verify tokens")
                .env("WARDEN_JWT_SECRET")
                .hide_env_values(true)
                .required(true),
        )
        .arg(
            Arg::new(ARG_JWT_ALGORITHM)
                .long("jwt-algorithm")
                .help("Token signing algorithm")
                .env("WARDEN_JWT_ALGORITHM")
                .default_value("HS256")
                .ignore_case(true)
                .value_parser(PossibleValuesParser::new(["HS256", "HS512"])),
        )
        .arg(
            Arg::new(ARG_PASSWORD_PEPPER)
                .long("password-pepper")
                .help("Optional server-side secret mixed into password hashes")
                .env("WARDEN_PASSWORD_PEPPER")
                .hide_env_values(true),
        )
        .arg(
            Arg::new(ARG_CLOCK_SKEW_SECONDS)
                .long("clock-skew-seconds")
                .help("Leeway applied to token expiry checks")
                .env("WARDEN_CLOCK_SKEW_SECONDS")
                .default_value("5")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_KEEP_SESSION_ON_REUSE)
                .long("keep-session-on-reuse")
                .help("Do not revoke the session when an already rotated refresh token is replayed")
                .env("WARDEN_KEEP_SESSION_ON_REUSE")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new(ARG_ROTATION_GRACE_SECONDS)
                .long("rotation-grace-seconds")
                .help("Window in which the just-rotated refresh token is rejected without revoking the session")
                .long_help(
                    "Concurrent refreshes with the same token have one winner. Within this window the losers get 401 and the session survives; any older token, or the previous one after the window, counts as a replay.",
                )
                .env("WARDEN_ROTATION_GRACE_SECONDS")
                .default_value("2")
                .value_parser(clap::value_parser!(u64)),
        )
}

fn with_ttl_args(command: Command) -> Command {
    let ttl = |id: &'static str, help: &'static str, env: &'static str, default: &'static str| {
        Arg::new(id)
            .long(id)
            .help(help)
            .env(env)
            .default_value(default)
            .value_parser(clap::value_parser!(u64).range(1..))
    };
    command
        .arg(ttl(
            ARG_ACCESS_TTL_SECONDS,
            "Access token TTL in seconds",
            "WARDEN_ACCESS_TTL_SECONDS",
            "900",
        ))
        .arg(ttl(
            ARG_REFRESH_TTL_SECONDS,
            "Refresh token and session TTL in seconds",
            "WARDEN_REFRESH_TTL_SECONDS",
            "604800",
        ))
        .arg(ttl(
            ARG_EMAIL_TOKEN_TTL_SECONDS,
            "Email verification token TTL in seconds",
            "WARDEN_EMAIL_TOKEN_TTL_SECONDS",
            "86400",
        ))
        .arg(ttl(
            ARG_RESET_TOKEN_TTL_SECONDS,
            "Password reset token TTL in seconds",
            "WARDEN_RESET_TOKEN_TTL_SECONDS",
            "3600",
        ))
        .arg(ttl(
            ARG_RESEND_COOLDOWN_SECONDS,
            "Cooldown before resending verification or reset emails",
            "WARDEN_RESEND_COOLDOWN_SECONDS",
            "60",
        ))
}

fn with_link_args(command: Command) -> Command {
    command.arg(
        Arg::new(ARG_FRONTEND_BASE_URL)
            .long("frontend-base-url")
            .help("Frontend base URL used for verification and reset links, and as the CORS origin")
            .env("WARDEN_FRONTEND_BASE_URL")
            .default_value("https://warden.dev"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    const SECRET: &str = "0123456789abcdef0123456789abcdef";

    fn parse(args: &[&str]) -> Result<Options> {
        let matches = with_args(Command::new("warden")).try_get_matches_from(args)?;
        Options::parse(&matches)
    }

    #[test]
    fn defaults() -> Result<()> {
        temp_env::with_vars_unset(
            [
                "WARDEN_JWT_ALGORITHM",
                "WARDEN_PASSWORD_PEPPER",
                "WARDEN_ACCESS_TTL_SECONDS",
                "WARDEN_KEEP_SESSION_ON_REUSE",
                "WARDEN_ROTATION_GRACE_SECONDS",
                "WARDEN_FRONTEND_BASE_URL",
            ],
            || {
                let options = parse(&["warden", "--jwt-secret", SECRET])?;
                assert_eq!(options.jwt_secret.expose_secret(), SECRET);
                assert_eq!(options.jwt_algorithm, Algorithm::HS256);
                assert!(options.password_pepper.is_none());
                assert_eq!(options.access_ttl_seconds, 900);
                assert_eq!(options.refresh_ttl_seconds, 604_800);
                assert_eq!(options.clock_skew_seconds, 5);
                assert!(options.revoke_on_reuse);
                assert_eq!(options.rotation_grace_seconds, 2);
                assert_eq!(options.frontend_base_url, "https://warden.dev");
                Ok(())
            },
        )
    }

    #[test]
    fn env_overrides() -> Result<()> {
        temp_env::with_vars(
            [
                ("WARDEN_JWT_SECRET", Some(SECRET)),
                ("WARDEN_JWT_ALGORITHM", Some("HS512")),
                ("WARDEN_PASSWORD_PEPPER", Some("pepper")),
                ("WARDEN_ACCESS_TTL_SECONDS", Some("60")),
                ("WARDEN_KEEP_SESSION_ON_REUSE", Some("true")),
                ("WARDEN_ROTATION_GRACE_SECONDS", Some("0")),
            ],
            || {
                let options = parse(&["warden"])?;
                assert_eq!(options.jwt_algorithm, Algorithm::HS512);
                assert!(options.password_pepper.is_some());
                assert_eq!(options.access_ttl_seconds, 60);
                assert!(!options.revoke_on_reuse);
                assert_eq!(options.rotation_grace_seconds, 0);
                Ok(())
            },
        )
    }

    #[test]
    fn rejects_short_secret_and_unknown_algorithm() {
        temp_env::with_vars_unset(["WARDEN_JWT_SECRET", "WARDEN_JWT_ALGORITHM"], || {
            let err = parse(&["warden", "--jwt-secret", "short"]);
            assert!(err.is_err());

            let err = parse(&["warden", "--jwt-secret", SECRET, "--jwt-algorithm", "RS256"]);
            assert!(err.is_err());
        });
    }

    #[test]
    fn rejects_zero_ttl() {
        temp_env::with_vars_unset(["WARDEN_ACCESS_TTL_SECONDS"], || {
            let err = parse(&["warden", "--jwt-secret", SECRET, "--access-ttl-seconds", "0"]);
            assert!(err.is_err());
        });
    }
}
