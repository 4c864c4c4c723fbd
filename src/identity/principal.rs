//! Authenticated principal attached to a request or a fresh login.

use serde_json::{Map, Value};
use uuid::Uuid;

use super::error::AuthError;
use super::model::User;

/// Capabilities every principal exposes, whatever authenticated it.
pub trait Identity {
    fn user(&self) -> &User;

    fn user_id(&self) -> Uuid {
        self.user().id
    }

    fn username(&self) -> &str {
        &self.user().username
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Principal {
    /// Password login or a verified access token.
    Local { user: User },
    /// Provider login, carrying what the provider asserted.
    OAuth {
        user: User,
        provider: String,
        claims: Map<String, Value>,
        id_token: Option<String>,
    },
}

impl Principal {
    #[must_use]
    pub fn into_user(self) -> User {
        match self {
            Self::Local { user } | Self::OAuth { user, .. } => user,
        }
    }

    #[must_use]
    pub fn provider(&self) -> Option<&str> {
        match self {
            Self::Local { .. } => None,
            Self::OAuth { provider, .. } => Some(provider),
        }
    }
}

impl Identity for Principal {
    fn user(&self) -> &User {
        match self {
            Self::Local { user } | Self::OAuth { user, .. } => user,
        }
    }
}

/// Why a presented access token was not accepted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TokenRejection {
    Expired,
    Invalid,
    Malformed,
}

impl TokenRejection {
    /// The rejection carried by a token decoding error, if it is one.
    #[must_use]
    pub fn from_error(err: &AuthError) -> Option<Self> {
        match err {
            AuthError::TokenExpired => Some(Self::Expired),
            AuthError::InvalidToken => Some(Self::Invalid),
            AuthError::MalformedToken => Some(Self::Malformed),
            _ => None,
        }
    }
}

impl From<TokenRejection> for AuthError {
    fn from(rejection: TokenRejection) -> Self {
        match rejection {
            TokenRejection::Expired => Self::TokenExpired,
            TokenRejection::Invalid => Self::InvalidToken,
            TokenRejection::Malformed => Self::MalformedToken,
        }
    }
}

/// Outcome of resolving request credentials.
///
/// A token that fails to decode leaves the request anonymous; `Rejected`
/// keeps the reason for routes that require a principal.
#[derive(Clone, Debug, PartialEq)]
pub enum RequestIdentity {
    Authenticated(Principal),
    Anonymous,
    Rejected(TokenRejection),
}

impl RequestIdentity {
    #[must_use]
    pub fn principal(&self) -> Option<&Principal> {
        match self {
            Self::Authenticated(principal) => Some(principal),
            Self::Anonymous | Self::Rejected(_) => None,
        }
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        matches!(self, Self::Authenticated(_))
    }
}
