//! Records persisted by the identity core.
//!
//! Refresh tokens and provider links reference their owner by id only; the
//! user is always re-read through [`super::store::UserRepository`].

use chrono::{DateTime, Utc};
use uuid::Uuid;

#[derive(Clone, PartialEq, Eq)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub email: Option<String>,
    /// `None` marks an OAuth-only account with no local credential.
    pub password_hash: Option<String>,
    pub name: String,
    pub token_version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    #[must_use]
    pub fn has_password(&self) -> bool {
        self.password_hash.is_some()
    }
}

impl std::fmt::Debug for User {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("User")
            .field("id", &self.id)
            .field("username", &self.username)
            .field("email", &self.email)
            .field("password_hash", &self.password_hash.as_ref().map(|_| "***"))
            .field("name", &self.name)
            .field("token_version", &self.token_version)
            .finish_non_exhaustive()
    }
}

/// Insert payload for a user; ids and timestamps are assigned on insert.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewUser {
    pub username: String,
    pub email: Option<String>,
    pub password_hash: Option<String>,
    pub name: String,
}

/// Fields a provider login may overwrite on an existing user.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProfileUpdate {
    pub name: Option<String>,
    pub email: Option<String>,
}

impl ProfileUpdate {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.email.is_none()
    }

    #[must_use]
    pub fn without_email(self) -> Self {
        Self {
            name: self.name,
            email: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RefreshToken {
    pub id: Uuid,
    pub user_id: Uuid,
    /// SHA-256 of the opaque string handed to the client.
    pub token_hash: Vec<u8>,
    /// The owner's token version when this token was issued.
    pub user_version: i64,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl RefreshToken {
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProviderAccountLink {
    pub id: Uuid,
    pub provider: String,
    pub provider_user_id: String,
    pub user_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Verified contents of an access token. Never persisted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecodedAccessClaims {
    pub user_id: Uuid,
    pub token_version: i64,
    pub username: String,
    pub email: Option<String>,
    pub expires_at: DateTime<Utc>,
}
