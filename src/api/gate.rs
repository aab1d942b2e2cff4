//! Deny list in front of every route.
//!
//! Requests whose `User-Agent` matches a configured pattern, or whose client
//! address is listed, are answered with 403 before any handler or rate limit
//! runs. The client address is resolved the same way as for rate limiting.

use anyhow::{Context, Result};
use axum::{
    Json,
    extract::{Request, State},
    http::{StatusCode, header::USER_AGENT},
    middleware::Next,
    response::{IntoResponse, Response},
};
use regex::Regex;
use std::net::IpAddr;
use std::sync::Arc;
use tracing::info;

use crate::auth::{ErrorBody, guard::request_ip};

/// Banned user-agent patterns and client addresses. Empty by default.
#[derive(Clone, Debug, Default)]
pub struct RequestGate {
    user_agents: Vec<Regex>,
    ips: Vec<IpAddr>,
}

impl RequestGate {
    /// # Errors
    /// Returns an error if a user-agent pattern is not a valid regex.
    pub fn new<S: AsRef<str>>(user_agents: &[S], ips: Vec<IpAddr>) -> Result<Self> {
        let user_agents = user_agents
            .iter()
            .map(|pattern| {
                Regex::new(pattern.as_ref())
                    .with_context(|| format!("Invalid user-agent pattern: {}", pattern.as_ref()))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { user_agents, ips })
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.user_agents.is_empty() && self.ips.is_empty()
    }

    /// Patterns are searched anywhere in the header, unanchored.
    #[must_use]
    pub fn bans_user_agent(&self, user_agent: Option<&str>) -> bool {
        user_agent.is_some_and(|agent| self.user_agents.iter().any(|re| re.is_match(agent)))
    }

    #[must_use]
    pub fn bans_ip(&self, ip: Option<IpAddr>) -> bool {
        ip.is_some_and(|ip| self.ips.contains(&ip))
    }
}

/// `axum::middleware::from_fn_with_state` layer enforcing a [`RequestGate`].
pub async fn deny_banned(
    State(gate): State<Arc<RequestGate>>,
    request: Request,
    next: Next,
) -> Response {
    if gate.is_empty() {
        return next.run(request).await;
    }

    let user_agent = request
        .headers()
        .get(USER_AGENT)
        .and_then(|value| value.to_str().ok());
    let ip = request_ip(request.headers(), request.extensions());
    if gate.bans_user_agent(user_agent) || gate.bans_ip(ip) {
        info!(?ip, user_agent, "request denied by gate");
        return banned();
    }
    next.run(request).await
}

fn banned() -> Response {
    (
        StatusCode::FORBIDDEN,
        Json(ErrorBody {
            error: "banned".to_string(),
            message: Some("You are banned".to_string()),
        }),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_agent_patterns_match_anywhere() -> Result<()> {
        let gate = RequestGate::new(&["Python-urllib"], Vec::new())?;
        assert!(gate.bans_user_agent(Some("Python-urllib/3.12")));
        assert!(gate.bans_user_agent(Some("bot Python-urllib")));
        assert!(!gate.bans_user_agent(Some("curl/8.5.0")));
        assert!(!gate.bans_user_agent(None));
        Ok(())
    }

    #[test]
    fn listed_ips_are_banned() -> Result<()> {
        let banned: IpAddr = [192, 168, 1, 1].into();
        let gate = RequestGate::new::<&str>(&[], vec![banned])?;
        assert!(gate.bans_ip(Some(banned)));
        assert!(!gate.bans_ip(Some([192, 168, 1, 2].into())));
        assert!(!gate.bans_ip(None));
        Ok(())
    }

    #[test]
    fn invalid_pattern_is_rejected() {
        assert!(RequestGate::new(&["("], Vec::new()).is_err());
    }

    #[test]
    fn default_gate_is_empty() {
        assert!(RequestGate::default().is_empty());
    }
}
