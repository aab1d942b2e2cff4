//! Client addressing and deny-list arguments.

use anyhow::Result;
use clap::{Arg, ArgAction, Command};
use std::net::IpAddr;

use crate::api::RequestGate;

pub const ARG_DENY_USER_AGENT: &str = "deny-user-agent";
pub const ARG_DENY_IP: &str = "deny-ip";
pub const ARG_TRUST_PROXY_HEADERS: &str = "trust-proxy-headers";

#[derive(Debug)]
pub struct Options {
    pub gate: RequestGate,
    pub trust_proxy_headers: bool,
}

impl Options {
    /// # Errors
    /// Returns an error if a user-agent pattern is not a valid regex.
    pub fn parse(matches: &clap::ArgMatches) -> Result<Self> {
        let user_agents: Vec<&String> = matches
            .get_many::<String>(ARG_DENY_USER_AGENT)
            .map(Iterator::collect)
            .unwrap_or_default();
        let ips = matches
            .get_many::<IpAddr>(ARG_DENY_IP)
            .map(|ips| ips.copied().collect())
            .unwrap_or_default();

        Ok(Self {
            gate: RequestGate::new(&user_agents, ips)?,
            trust_proxy_headers: matches.get_flag(ARG_TRUST_PROXY_HEADERS),
        })
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_DENY_USER_AGENT)
                .long("deny-user-agent")
                .help("Regex; requests whose User-Agent matches get 403 (repeatable)")
                .env("WARDEN_DENY_USER_AGENTS")
                .action(ArgAction::Append)
                .value_delimiter(','),
        )
        .arg(
            Arg::new(ARG_DENY_IP)
                .long("deny-ip")
                .help("Client address that gets 403 (repeatable)")
                .env("WARDEN_DENY_IPS")
                .action(ArgAction::Append)
                .value_delimiter(',')
                .value_parser(clap::value_parser!(IpAddr)),
        )
        .arg(
            Arg::new(ARG_TRUST_PROXY_HEADERS)
                .long("trust-proxy-headers")
                .help("Take the client address from X-Forwarded-For / X-Real-IP")
                .long_help(
                    "Only enable behind a reverse proxy that sets these headers. Without it the socket peer address identifies the client for rate limiting and the deny list.",
                )
                .env("WARDEN_TRUST_PROXY_HEADERS")
                .action(ArgAction::SetTrue),
        )
}
