//! Collision-free usernames and slugs.
//!
//! Both call sites share one retry shape: attempt 0 is the base as-is, later
//! attempts add a suffix, and once attempts run out a random fallback is used
//! unconditionally. Existence checks are a pre-filter only; the storage unique
//! constraint stays authoritative.

use rand::{distributions::Alphanumeric, Rng};
use regex::Regex;
use std::future::Future;
use unicode_normalization::UnicodeNormalization;
use uuid::Uuid;

pub const MAX_ATTEMPTS: usize = 100;

pub const USERNAME_MAX_LEN: usize = 50;
const USERNAME_BASE_MAX_LEN: usize = 45;
const USERNAME_FALLBACK_BASE: &str = "oauthuser";

pub const SLUG_MAX_LEN: usize = 240;
const SLUG_FALLBACK_BASE: &str = "article";

/// How candidates after attempt 0 are built.
pub trait SuffixStrategy {
    fn candidate(&self, base: &str, attempt: usize) -> String;

    /// Used once every attempt collided.
    fn fallback(&self, base: &str) -> String;
}

/// `base-1`, `base-2`, ... then `base-<8 random hex>`.
#[derive(Clone, Copy, Debug)]
pub struct NumericSuffix {
    pub max_len: usize,
}

impl SuffixStrategy for NumericSuffix {
    fn candidate(&self, base: &str, attempt: usize) -> String {
        with_suffix(base, &format!("-{attempt}"), self.max_len)
    }

    fn fallback(&self, base: &str) -> String {
        let fragment: String = Uuid::new_v4().simple().to_string().chars().take(8).collect();
        with_suffix(base, &format!("-{fragment}"), self.max_len)
    }
}

/// `base_xyz` (3 chars for the first attempts, 5 after), then `user_<uuid hex>`.
#[derive(Clone, Copy, Debug)]
pub struct RandomSuffix {
    pub max_len: usize,
}

impl SuffixStrategy for RandomSuffix {
    fn candidate(&self, base: &str, attempt: usize) -> String {
        let len = if attempt < 10 { 3 } else { 5 };
        let suffix: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(len)
            .map(|byte| char::from(byte).to_ascii_lowercase())
            .collect();
        with_suffix(base, &format!("_{suffix}"), self.max_len)
    }

    fn fallback(&self, _base: &str) -> String {
        let fallback = format!("user_{}", Uuid::new_v4().simple());
        fallback.chars().take(self.max_len).collect()
    }
}

/// Truncate `base` so `base + suffix` fits `max_len` characters.
fn with_suffix(base: &str, suffix: &str, max_len: usize) -> String {
    let allowed = max_len.saturating_sub(suffix.chars().count());
    let base_part: String = base.chars().take(allowed).collect();
    format!("{base_part}{suffix}")
}

/// Find the first candidate for which `exists` answers `false`.
///
/// # Errors
/// Whatever `exists` returns.
pub async fn generate<S, F, Fut, E>(
    base: &str,
    strategy: &S,
    max_attempts: usize,
    mut exists: F,
) -> Result<String, E>
where
    S: SuffixStrategy + ?Sized,
    F: FnMut(String) -> Fut,
    Fut: Future<Output = Result<bool, E>>,
{
    for attempt in 0..max_attempts {
        let candidate = if attempt == 0 {
            base.to_string()
        } else {
            strategy.candidate(base, attempt)
        };
        if !exists(candidate.clone()).await? {
            return Ok(candidate);
        }
    }
    Ok(strategy.fallback(base))
}

/// Derive a username base from provider attributes.
///
/// Prefers the email local part, then the display name, then the provider
/// user id.
#[must_use]
pub fn username_base(email: Option<&str>, name: Option<&str>, provider_user_id: &str) -> String {
    let from_email = email
        .and_then(|email| email.split('@').next())
        .map(|local| keep_matching(local, |c| c.is_ascii_alphanumeric() || "_.-".contains(c)))
        .filter(|base| !base.is_empty());

    let from_name = || {
        name.map(|name| {
            let underscored = Regex::new(r"\s+")
                .map(|ws| ws.replace_all(name.trim(), "_").to_lowercase())
                .unwrap_or_default();
            keep_matching(&underscored, |c| c.is_ascii_alphanumeric() || c == '_')
        })
        .filter(|base| !base.is_empty())
    };

    let from_provider = || {
        let prefix: String = provider_user_id.chars().take(10).collect();
        let base = keep_matching(&format!("user_{prefix}"), |c| {
            c.is_ascii_alphanumeric() || c == '_'
        });
        Some(base).filter(|base| base != "user_")
    };

    let base = from_email
        .or_else(from_name)
        .or_else(from_provider)
        .unwrap_or_else(|| USERNAME_FALLBACK_BASE.to_string());
    base.chars().take(USERNAME_BASE_MAX_LEN).collect()
}

fn keep_matching(input: &str, keep: impl Fn(char) -> bool) -> String {
    input.chars().filter(|c| keep(*c)).collect()
}

/// Turn a title into a URL-safe slug (`[a-z0-9_-]`, at most 240 chars).
#[must_use]
pub fn slugify(title: &str) -> String {
    let mut slug = String::new();
    let mut prev_dash = false;
    for ch in title.trim().nfd() {
        let ch = if ch.is_whitespace() { '-' } else { ch };
        if ch == '-' {
            if !prev_dash {
                slug.push('-');
            }
            prev_dash = true;
        } else if ch.is_ascii_alphanumeric() || ch == '_' {
            slug.push(ch.to_ascii_lowercase());
            prev_dash = false;
        }
    }
    let truncated: String = slug.trim_matches('-').chars().take(SLUG_MAX_LEN).collect();
    let normalized = truncated.trim_end_matches('-');
    if normalized.is_empty() {
        SLUG_FALLBACK_BASE.to_string()
    } else {
        normalized.to_string()
    }
}

/// Unique slug for `title`, deferring existence to `exists`.
///
/// # Errors
/// Whatever `exists` returns.
pub async fn unique_slug<F, Fut, E>(title: &str, exists: F) -> Result<String, E>
where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = Result<bool, E>>,
{
    let strategy = NumericSuffix {
        max_len: SLUG_MAX_LEN,
    };
    generate(&slugify(title), &strategy, MAX_ATTEMPTS, exists).await
}
