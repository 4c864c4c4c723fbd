//! Long-lived opaque session credentials, one live token per user.

use chrono::Duration;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use super::error::AuthError;
use super::model::{RefreshToken, User};
use super::store::{Clock, RefreshTokenRepository};
use super::utils::{generate_refresh_token, hash_refresh_token};

/// A freshly issued token; `token` is the only copy of the raw value.
#[derive(Clone, PartialEq, Eq)]
pub struct IssuedRefreshToken {
    pub token: String,
    pub record: RefreshToken,
}

impl std::fmt::Debug for IssuedRefreshToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IssuedRefreshToken")
            .field("token", &"***")
            .field("record", &self.record)
            .finish()
    }
}

#[derive(Clone)]
pub struct RefreshTokenStore {
    repository: Arc<dyn RefreshTokenRepository>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl RefreshTokenStore {
    pub fn new(repository: Arc<dyn RefreshTokenRepository>, ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            repository,
            ttl,
            clock,
        }
    }

    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Replace every token of `user` with a new one.
    ///
    /// # Errors
    /// `TokenCreation` if randomness is unavailable, or a storage failure.
    pub async fn issue(&self, user: &User) -> Result<IssuedRefreshToken, AuthError> {
        let token = generate_refresh_token()?;
        let now = self.clock.now();
        let record = RefreshToken {
            id: Uuid::now_v7(),
            user_id: user.id,
            token_hash: hash_refresh_token(&token),
            user_version: user.token_version,
            expires_at: now + self.ttl,
            created_at: now,
        };

        self.repository.replace_for_user(&record).await?;
        info!(user_id = %user.id, "issued refresh token");

        Ok(IssuedRefreshToken { token, record })
    }

    /// # Errors
    /// Storage failure only; an unknown token is `Ok(None)`.
    pub async fn find(&self, token: &str) -> Result<Option<RefreshToken>, AuthError> {
        let token = token.trim();
        if token.is_empty() {
            return Ok(None);
        }
        Ok(self
            .repository
            .find_by_hash(&hash_refresh_token(token))
            .await?)
    }

    /// Pass through a live token; an expired one is deleted.
    ///
    /// # Errors
    /// `RefreshTokenExpired`, or a storage failure while deleting.
    pub async fn verify(&self, token: RefreshToken) -> Result<RefreshToken, AuthError> {
        if token.is_expired_at(self.clock.now()) {
            self.repository.delete_by_hash(&token.token_hash).await?;
            debug!(user_id = %token.user_id, "deleted expired refresh token");
            return Err(AuthError::RefreshTokenExpired);
        }
        Ok(token)
    }

    /// Idempotent delete of the presented token.
    ///
    /// # Errors
    /// Storage failure only.
    pub async fn revoke(&self, token: &str) -> Result<(), AuthError> {
        let token = token.trim();
        if token.is_empty() {
            return Ok(());
        }
        let removed = self
            .repository
            .delete_by_hash(&hash_refresh_token(token))
            .await?;
        debug!(removed, "revoked refresh token");
        Ok(())
    }

    /// Delete every token belonging to `user_id`.
    ///
    /// # Errors
    /// Storage failure only.
    pub async fn revoke_all(&self, user_id: Uuid) -> Result<u64, AuthError> {
        Ok(self.repository.delete_for_user(user_id).await?)
    }
}
