//! Typed failures for the identity and session core.

use thiserror::Error;

/// Unique constraint that rejected a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Constraint {
    Username,
    Email,
    ProviderLink,
    RefreshToken,
}

impl Constraint {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Username => "username",
            Self::Email => "email",
            Self::ProviderLink => "provider_link",
            Self::RefreshToken => "refresh_token",
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("unique constraint violated: {}", .0.as_str())]
    Conflict(Constraint),
    #[error("storage failure")]
    Backend(#[source] anyhow::Error),
}

impl StoreError {
    pub fn backend<E>(err: E) -> Self
    where
        E: Into<anyhow::Error>,
    {
        Self::Backend(err.into())
    }
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid username/email or password")]
    InvalidCredentials,
    #[error("refresh token is invalid")]
    InvalidRefreshToken,
    #[error("refresh token has expired")]
    RefreshTokenExpired,
    #[error("session is no longer valid, please log in again")]
    SessionInvalidated,
    #[error("user no longer exists")]
    UserNotFound,
    #[error("access token has expired")]
    TokenExpired,
    #[error("access token is invalid")]
    InvalidToken,
    #[error("access token is malformed")]
    MalformedToken,
    #[error(
        "an account already exists with this email address and is password-protected, \
         log in with your password instead"
    )]
    AccountLinkConflict,
    #[error("username or email already in use")]
    UserAlreadyExists,
    #[error("failed to create token")]
    TokenCreation(#[source] anyhow::Error),
    #[error("failed to hash password")]
    PasswordHashing(#[source] anyhow::Error),
    #[error("provider did not return a user identifier")]
    ProviderIdentityMissing,
    #[error("{0}")]
    InvalidInput(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl AuthError {
    /// Stable machine-readable code surfaced to clients.
    ///
    /// `RefreshTokenExpired` shares `INVALID_REFRESH_TOKEN` and `UserNotFound`
    /// shares `SESSION_INVALIDATED`, so clients only branch on what they can act on.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidCredentials => "INVALID_CREDENTIALS",
            Self::InvalidRefreshToken | Self::RefreshTokenExpired => "INVALID_REFRESH_TOKEN",
            Self::SessionInvalidated | Self::UserNotFound => "SESSION_INVALIDATED",
            Self::TokenExpired => "TOKEN_EXPIRED",
            Self::InvalidToken => "INVALID_TOKEN",
            Self::MalformedToken => "MALFORMED_TOKEN",
            Self::AccountLinkConflict => "ACCOUNT_LINK_CONFLICT",
            Self::UserAlreadyExists => "USER_ALREADY_EXISTS",
            Self::ProviderIdentityMissing | Self::InvalidInput(_) => "INPUT_FORMAT_ERROR",
            Self::TokenCreation(_) | Self::PasswordHashing(_) | Self::Store(_) => {
                "INTERNAL_SERVER_ERROR"
            }
        }
    }

    /// Message safe to show a client; internal failures are not described.
    #[must_use]
    pub fn client_message(&self) -> String {
        match self {
            Self::RefreshTokenExpired => Self::InvalidRefreshToken.to_string(),
            Self::UserNotFound => Self::SessionInvalidated.to_string(),
            Self::TokenCreation(_) | Self::PasswordHashing(_) | Self::Store(_) => {
                "internal server error".to_string()
            }
            other => other.to_string(),
        }
    }

    /// Failures after which a client-held refresh credential is useless.
    #[must_use]
    pub const fn clears_refresh_credential(&self) -> bool {
        matches!(
            self,
            Self::InvalidRefreshToken
                | Self::RefreshTokenExpired
                | Self::SessionInvalidated
                | Self::UserNotFound
        )
    }
}
