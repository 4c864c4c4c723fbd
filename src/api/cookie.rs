//! The `HttpOnly` cookie carrying the refresh token.

use axum::http::{
    header::{InvalidHeaderValue, COOKIE},
    HeaderMap, HeaderValue,
};
use chrono::Duration;
use std::{fmt, str::FromStr};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SameSite {
    Strict,
    Lax,
    None,
}

impl SameSite {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Strict => "Strict",
            Self::Lax => "Lax",
            Self::None => "None",
        }
    }
}

impl fmt::Display for SameSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SameSite {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "strict" => Ok(Self::Strict),
            "lax" => Ok(Self::Lax),
            "none" => Ok(Self::None),
            other => Err(format!("unknown SameSite value: {other}")),
        }
    }
}

#[derive(Clone, Debug)]
pub struct CookieConfig {
    name: String,
    path: String,
    same_site: SameSite,
    secure: bool,
    max_age: Duration,
}

impl CookieConfig {
    #[must_use]
    pub fn new(name: String) -> Self {
        Self {
            name,
            path: "/v1/auth".to_string(),
            same_site: SameSite::Strict,
            secure: true,
            max_age: Duration::days(7),
        }
    }

    #[must_use]
    pub fn with_path(mut self, path: String) -> Self {
        self.path = path;
        self
    }

    #[must_use]
    pub fn with_same_site(mut self, same_site: SameSite) -> Self {
        self.same_site = same_site;
        self
    }

    #[must_use]
    pub fn with_secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    #[must_use]
    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// `Set-Cookie` value carrying `token`.
    ///
    /// # Errors
    /// Returns an error if the token contains characters not allowed in a header.
    pub fn refresh_cookie(&self, token: &str) -> Result<HeaderValue, InvalidHeaderValue> {
        self.build(token, self.max_age.num_seconds())
    }

    /// `Set-Cookie` value that makes the browser drop the cookie.
    ///
    /// # Errors
    /// Returns an error if the configured name or path is not a valid header.
    pub fn clear_cookie(&self) -> Result<HeaderValue, InvalidHeaderValue> {
        self.build("", 0)
    }

    fn build(&self, value: &str, max_age: i64) -> Result<HeaderValue, InvalidHeaderValue> {
        let mut cookie = format!(
            "{}={value}; Path={}; HttpOnly; SameSite={}; Max-Age={max_age}",
            self.name, self.path, self.same_site
        );
        // Browsers reject SameSite=None without Secure.
        if self.secure || self.same_site == SameSite::None {
            cookie.push_str("; Secure");
        }
        HeaderValue::from_str(&cookie)
    }

    /// Refresh token from the request cookies, if present and non-empty.
    #[must_use]
    pub fn extract(&self, headers: &HeaderMap) -> Option<String> {
        headers
            .get_all(COOKIE)
            .iter()
            .filter_map(|header| header.to_str().ok())
            .flat_map(|value| value.split(';'))
            .find_map(|pair| {
                let (key, val) = pair.trim().split_once('=')?;
                (key.trim() == self.name).then(|| val.trim().to_string())
            })
            .filter(|token| !token.is_empty())
    }
}
