//! Per-user generation counter for bulk token revocation.

use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use super::error::AuthError;
use super::model::User;
use super::store::UserRepository;

#[derive(Clone)]
pub struct TokenVersionGuard {
    users: Arc<dyn UserRepository>,
}

impl TokenVersionGuard {
    pub fn new(users: Arc<dyn UserRepository>) -> Self {
        Self { users }
    }

    /// Compare the live version of `current` with the one a credential carried.
    ///
    /// `current` must be freshly read from the store. No side effects.
    ///
    /// # Errors
    /// `SessionInvalidated` on mismatch.
    pub fn check(&self, current: &User, claimed_version: i64) -> Result<(), AuthError> {
        if current.token_version == claimed_version {
            Ok(())
        } else {
            warn!(
                user_id = %current.id,
                live_version = current.token_version,
                claimed_version,
                "token version mismatch"
            );
            Err(AuthError::SessionInvalidated)
        }
    }

    /// Re-read `user_id` and check it against `claimed_version`.
    ///
    /// # Errors
    /// `UserNotFound`, `SessionInvalidated`, or a storage failure.
    pub async fn check_current(
        &self,
        user_id: Uuid,
        claimed_version: i64,
    ) -> Result<User, AuthError> {
        let user = self
            .users
            .find_by_id(user_id)
            .await?
            .ok_or(AuthError::UserNotFound)?;
        self.check(&user, claimed_version)?;
        Ok(user)
    }

    /// Increment the version, invalidating every token issued before.
    ///
    /// # Errors
    /// `UserNotFound` or a storage failure.
    pub async fn bump(&self, user_id: Uuid) -> Result<i64, AuthError> {
        let version = self
            .users
            .increment_token_version(user_id)
            .await?
            .ok_or(AuthError::UserNotFound)?;
        info!(user_id = %user_id, version, "token version bumped");
        Ok(version)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::identity::memory::MemoryStore;
    use crate::identity::model::NewUser;

    async fn setup() -> (TokenVersionGuard, User) {
        let store = Arc::new(MemoryStore::new());
        let user = store
            .insert(NewUser {
                username: "alice".to_string(),
                email: None,
                password_hash: None,
                name: "Alice".to_string(),
            })
            .await
            .unwrap();
        (TokenVersionGuard::new(store), user)
    }

    #[tokio::test]
    async fn new_users_start_at_zero() {
        let (guard, user) = setup().await;
        assert_eq!(user.token_version, 0);
        assert!(guard.check(&user, 0).is_ok());
    }

    #[tokio::test]
    async fn bump_invalidates_older_versions() {
        let (guard, user) = setup().await;
        assert_eq!(guard.bump(user.id).await.unwrap(), 1);
        assert_eq!(guard.bump(user.id).await.unwrap(), 2);

        let result = guard.check_current(user.id, 0).await;
        assert!(matches!(result, Err(AuthError::SessionInvalidated)));
        let current = guard.check_current(user.id, 2).await.unwrap();
        assert_eq!(current.token_version, 2);
    }

    #[tokio::test]
    async fn unknown_user() {
        let (guard, _) = setup().await;
        let missing = Uuid::now_v7();
        assert!(matches!(
            guard.bump(missing).await,
            Err(AuthError::UserNotFound)
        ));
        assert!(matches!(
            guard.check_current(missing, 0).await,
            Err(AuthError::UserNotFound)
        ));
    }
}
