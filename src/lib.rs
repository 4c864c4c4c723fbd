//! # Quire (identity and session lifecycle)
//!
//! `quire` authenticates users of the Quire publishing backend and keeps their
//! sessions honest.
//!
//! ## Sessions
//!
//! A login yields a short-lived signed access token and a long-lived opaque
//! refresh token. The refresh token is stored only as a SHA-256 hash, at most
//! one per user, and records the user's token version at issuance.
//!
//! ## Token versions
//!
//! Every user carries a monotonically increasing token version. Bumping it
//! (global sign-out, provider login) invalidates every outstanding access and
//! refresh token at once, without tracking them individually.
//!
//! ## Provider accounts
//!
//! An external identity resolves to a local user by its provider link, then
//! by verified email for password-less accounts, and otherwise provisions a new
//! user with a collision-free username. Password-protected accounts are never
//! silently linked.
//!
//! The [`identity`] module is transport-agnostic; [`api`] exposes it over HTTP
//! and [`cli`] wires configuration and telemetry for the `quire` binary.

pub mod api;
pub mod cli;
pub mod identity;

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
        assert!(GIT_COMMIT_HASH.len() >= 7);
    }

    #[test]
    fn test_app_user_agent_format() {
        assert!(APP_USER_AGENT.starts_with(env!("CARGO_PKG_NAME")));
        assert!(APP_USER_AGENT.contains(env!("CARGO_PKG_VERSION")));
    }
}
