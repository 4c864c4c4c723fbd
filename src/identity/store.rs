//! Repository seams between the identity core and its storage engine.
//!
//! Implementations must enforce the same unique constraints as
//! `db/sql/01_quire.sql` and report violations as [`StoreError::Conflict`];
//! the core relies on them as the final authority under concurrency.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use super::error::StoreError;
use super::model::{NewUser, ProfileUpdate, ProviderAccountLink, RefreshToken, User};

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<User>>;

    async fn find_by_username(&self, username: &str) -> StoreResult<Option<User>>;

    async fn find_by_email(&self, email: &str) -> StoreResult<Option<User>>;

    /// A user whose email equals `email`, else one whose username equals `username`.
    async fn find_by_email_or_username(
        &self,
        email: &str,
        username: &str,
    ) -> StoreResult<Option<User>>;

    async fn insert(&self, user: NewUser) -> StoreResult<User>;

    /// Apply a profile change; returns `None` when the user is gone.
    async fn update_profile(&self, id: Uuid, update: &ProfileUpdate)
        -> StoreResult<Option<User>>;

    /// Atomically increment the token version, returning the new value.
    async fn increment_token_version(&self, id: Uuid) -> StoreResult<Option<i64>>;
}

/// Persistence for refresh tokens, keyed by the token hash.
#[async_trait]
pub trait RefreshTokenRepository: Send + Sync {
    /// Delete every token of `token.user_id` and insert `token` as one unit.
    ///
    /// Concurrent calls for the same user must serialize so exactly one
    /// token survives.
    async fn replace_for_user(&self, token: &RefreshToken) -> StoreResult<()>;

    async fn find_by_hash(&self, token_hash: &[u8]) -> StoreResult<Option<RefreshToken>>;

    /// Idempotent; returns whether a row was removed.
    async fn delete_by_hash(&self, token_hash: &[u8]) -> StoreResult<bool>;

    async fn delete_for_user(&self, user_id: Uuid) -> StoreResult<u64>;
}

#[async_trait]
pub trait AccountLinkRepository: Send + Sync {
    async fn find_link(
        &self,
        provider: &str,
        provider_user_id: &str,
    ) -> StoreResult<Option<ProviderAccountLink>>;

    /// Insert a link to an existing user and apply `update` in one transaction.
    async fn link_existing_user(
        &self,
        user_id: Uuid,
        provider: &str,
        provider_user_id: &str,
        update: &ProfileUpdate,
    ) -> StoreResult<User>;

    /// Insert a new user and its first link in one transaction.
    async fn create_user_with_link(
        &self,
        user: NewUser,
        provider: &str,
        provider_user_id: &str,
    ) -> StoreResult<User>;
}

/// Liveness check used by the health endpoint.
#[async_trait]
pub trait StoreHealth: Send + Sync {
    async fn ping(&self) -> StoreResult<()>;
}

/// Handles to every repository the core needs.
#[derive(Clone)]
pub struct Stores {
    pub users: Arc<dyn UserRepository>,
    pub refresh_tokens: Arc<dyn RefreshTokenRepository>,
    pub links: Arc<dyn AccountLinkRepository>,
    pub health: Arc<dyn StoreHealth>,
}

impl Stores {
    /// Use one backend for every repository.
    pub fn shared<T>(backend: Arc<T>) -> Self
    where
        T: UserRepository + RefreshTokenRepository + AccountLinkRepository + StoreHealth + 'static,
    {
        Self {
            users: backend.clone(),
            refresh_tokens: backend.clone(),
            links: backend.clone(),
            health: backend,
        }
    }
}

/// Source of "now" for expiry math.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually advanced clock for tests and simulations.
#[derive(Debug)]
pub struct FixedClock {
    now: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    #[must_use]
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut now = self.now.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        *now += by;
    }

    pub fn set(&self, to: DateTime<Utc>) {
        let mut now = self.now.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        *now = to;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}
