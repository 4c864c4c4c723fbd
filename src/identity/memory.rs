//! In-process store with the same unique constraints as the SQL schema.
//!
//! Each operation takes the single state lock, so multi-record writes are
//! atomic the way a database transaction would make them.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::error::{Constraint, StoreError};
use super::model::{NewUser, ProfileUpdate, ProviderAccountLink, RefreshToken, User};
use super::store::{
    AccountLinkRepository, RefreshTokenRepository, StoreHealth, StoreResult, UserRepository,
};

#[derive(Default)]
struct State {
    users: HashMap<Uuid, User>,
    refresh_tokens: HashMap<Vec<u8>, RefreshToken>,
    links: HashMap<(String, String), ProviderAccountLink>,
}

impl State {
    fn check_unique(&self, id: Option<Uuid>, username: &str, email: Option<&str>) -> StoreResult<()> {
        let others = || self.users.values().filter(move |user| Some(user.id) != id);
        if others().any(|user| user.username == username) {
            return Err(StoreError::Conflict(Constraint::Username));
        }
        if let Some(email) = email {
            if others().any(|user| user.email.as_deref() == Some(email)) {
                return Err(StoreError::Conflict(Constraint::Email));
            }
        }
        Ok(())
    }

    fn insert_user(&mut self, new: NewUser) -> StoreResult<User> {
        self.check_unique(None, &new.username, new.email.as_deref())?;
        let now = Utc::now();
        let user = User {
            id: Uuid::now_v7(),
            username: new.username,
            email: new.email,
            password_hash: new.password_hash,
            name: new.name,
            token_version: 0,
            created_at: now,
            updated_at: now,
        };
        self.users.insert(user.id, user.clone());
        Ok(user)
    }

    fn apply_update(&mut self, id: Uuid, update: &ProfileUpdate) -> StoreResult<Option<User>> {
        let Some(current) = self.users.get(&id) else {
            return Ok(None);
        };
        let email = update.email.as_deref().or(current.email.as_deref());
        self.check_unique(Some(id), &current.username, email)?;

        let Some(user) = self.users.get_mut(&id) else {
            return Ok(None);
        };
        if let Some(name) = &update.name {
            user.name.clone_from(name);
        }
        if let Some(email) = &update.email {
            user.email = Some(email.clone());
        }
        user.updated_at = Utc::now();
        Ok(Some(user.clone()))
    }

    fn insert_link(&mut self, user_id: Uuid, provider: &str, provider_user_id: &str) -> StoreResult<()> {
        let key = (provider.to_string(), provider_user_id.to_string());
        if self.links.contains_key(&key) {
            return Err(StoreError::Conflict(Constraint::ProviderLink));
        }
        let now = Utc::now();
        self.links.insert(
            key,
            ProviderAccountLink {
                id: Uuid::now_v7(),
                provider: provider.to_string(),
                provider_user_id: provider_user_id.to_string(),
                user_id,
                created_at: now,
                updated_at: now,
            },
        );
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn user_count(&self) -> usize {
        self.state.lock().await.users.len()
    }

    pub async fn link_count(&self) -> usize {
        self.state.lock().await.links.len()
    }

    pub async fn refresh_token_count(&self) -> usize {
        self.state.lock().await.refresh_tokens.len()
    }
}

#[async_trait]
impl UserRepository for MemoryStore {
    async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<User>> {
        Ok(self.state.lock().await.users.get(&id).cloned())
    }

    async fn find_by_username(&self, username: &str) -> StoreResult<Option<User>> {
        let state = self.state.lock().await;
        Ok(state
            .users
            .values()
            .find(|user| user.username == username)
            .cloned())
    }

    async fn find_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        let state = self.state.lock().await;
        Ok(state
            .users
            .values()
            .find(|user| user.email.as_deref() == Some(email))
            .cloned())
    }

    async fn find_by_email_or_username(
        &self,
        email: &str,
        username: &str,
    ) -> StoreResult<Option<User>> {
        let state = self.state.lock().await;
        let by_email = state
            .users
            .values()
            .find(|user| user.email.as_deref() == Some(email));
        Ok(by_email
            .or_else(|| state.users.values().find(|user| user.username == username))
            .cloned())
    }

    async fn insert(&self, user: NewUser) -> StoreResult<User> {
        self.state.lock().await.insert_user(user)
    }

    async fn update_profile(
        &self,
        id: Uuid,
        update: &ProfileUpdate,
    ) -> StoreResult<Option<User>> {
        self.state.lock().await.apply_update(id, update)
    }

    async fn increment_token_version(&self, id: Uuid) -> StoreResult<Option<i64>> {
        let mut state = self.state.lock().await;
        Ok(state.users.get_mut(&id).map(|user| {
            user.token_version += 1;
            user.updated_at = Utc::now();
            user.token_version
        }))
    }
}

#[async_trait]
impl RefreshTokenRepository for MemoryStore {
    async fn replace_for_user(&self, token: &RefreshToken) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        if !state.users.contains_key(&token.user_id) {
            return Err(StoreError::backend(anyhow::anyhow!(
                "refresh token owner {} does not exist",
                token.user_id
            )));
        }
        if state.refresh_tokens.contains_key(&token.token_hash) {
            return Err(StoreError::Conflict(Constraint::RefreshToken));
        }
        state
            .refresh_tokens
            .retain(|_, existing| existing.user_id != token.user_id);
        state
            .refresh_tokens
            .insert(token.token_hash.clone(), token.clone());
        Ok(())
    }

    async fn find_by_hash(&self, token_hash: &[u8]) -> StoreResult<Option<RefreshToken>> {
        Ok(self.state.lock().await.refresh_tokens.get(token_hash).cloned())
    }

    async fn delete_by_hash(&self, token_hash: &[u8]) -> StoreResult<bool> {
        Ok(self
            .state
            .lock()
            .await
            .refresh_tokens
            .remove(token_hash)
            .is_some())
    }

    async fn delete_for_user(&self, user_id: Uuid) -> StoreResult<u64> {
        let mut state = self.state.lock().await;
        let before = state.refresh_tokens.len();
        state
            .refresh_tokens
            .retain(|_, existing| existing.user_id != user_id);
        Ok((before - state.refresh_tokens.len()) as u64)
    }
}

#[async_trait]
impl AccountLinkRepository for MemoryStore {
    async fn find_link(
        &self,
        provider: &str,
        provider_user_id: &str,
    ) -> StoreResult<Option<ProviderAccountLink>> {
        let key = (provider.to_string(), provider_user_id.to_string());
        Ok(self.state.lock().await.links.get(&key).cloned())
    }

    async fn link_existing_user(
        &self,
        user_id: Uuid,
        provider: &str,
        provider_user_id: &str,
        update: &ProfileUpdate,
    ) -> StoreResult<User> {
        let mut state = self.state.lock().await;
        if !state.users.contains_key(&user_id) {
            return Err(StoreError::backend(anyhow::anyhow!(
                "link owner {user_id} does not exist"
            )));
        }
        // Validate everything before mutating so a failure leaves no trace.
        let key = (provider.to_string(), provider_user_id.to_string());
        if state.links.contains_key(&key) {
            return Err(StoreError::Conflict(Constraint::ProviderLink));
        }
        let user = state
            .apply_update(user_id, update)?
            .ok_or_else(|| StoreError::backend(anyhow::anyhow!("link owner vanished")))?;
        state.insert_link(user_id, provider, provider_user_id)?;
        Ok(user)
    }

    async fn create_user_with_link(
        &self,
        user: NewUser,
        provider: &str,
        provider_user_id: &str,
    ) -> StoreResult<User> {
        let mut state = self.state.lock().await;
        let key = (provider.to_string(), provider_user_id.to_string());
        state.check_unique(None, &user.username, user.email.as_deref())?;
        if state.links.contains_key(&key) {
            return Err(StoreError::Conflict(Constraint::ProviderLink));
        }
        let user = state.insert_user(user)?;
        state.insert_link(user.id, provider, provider_user_id)?;
        Ok(user)
    }
}

#[async_trait]
impl StoreHealth for MemoryStore {
    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }
}
