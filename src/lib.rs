//! # Warden (Authentication & Session Core)
//!
//! `warden` issues and validates signed tokens for a web backend. It hashes
//! credentials with Argon2id, runs login and refresh-token rotation with reuse
//! detection, redeems single-use email verification and password reset links,
//! and rate-limits every auth route.
//!
//! ## Sessions
//!
//! A login starts a session lineage (`sid`). Each refresh token carries the
//! lineage id and a rotation id (`jti`); the shared store holds the one live
//! rotation id per lineage. Refreshing swaps it atomically, so replaying an
//! already rotated token fails and revokes the lineage.
//!
//! ## Shared State
//!
//! Rate-limit counters, rotation records and single-use markers live in a
//! [`store::FastStore`]. The `PostgreSQL` backend lets several instances behind
//! a load balancer share limits and revocations; the in-memory backend is for
//! development and tests.
//!
//! ## Collaborators
//!
//! - [`users::UserStore`]: user records and password hashes.
//! - [`mail::EmailSender`]: outbound mail, dispatched on spawned tasks.

pub mod api;
pub mod auth;
pub mod cli;
pub mod mail;
pub mod store;
pub mod users;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_git_commit_hash_format() {
        if GIT_COMMIT_HASH == "unknown" {
            // Acceptable in non-git build environments
            return;
        }
        assert!(
            GIT_COMMIT_HASH.chars().all(|c| c.is_ascii_hexdigit()),
            "GIT_COMMIT_HASH should be a hex string, got: {GIT_COMMIT_HASH}"
        );
        assert!(
            GIT_COMMIT_HASH.len() >= 7,
            "GIT_COMMIT_HASH should be at least 7 characters long, got: {GIT_COMMIT_HASH}"
        );
    }

    #[test]
    fn test_app_user_agent_format() {
        assert!(APP_USER_AGENT.starts_with(env!("CARGO_PKG_NAME")));
        assert!(APP_USER_AGENT.contains(env!("CARGO_PKG_VERSION")));
    }
}
