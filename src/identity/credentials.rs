use once_cell::sync::OnceCell;
use std::sync::Arc;
use tracing::debug;

use super::error::AuthError;
use super::model::User;
use super::password::PasswordHasher;
use super::utils::normalize_email;
use super::store::UserRepository;

const DUMMY_SECRET: &str = "quire-unknown-account";

/// Checks a login identifier and secret against the stored hash.
#[derive(Clone)]
pub struct CredentialVerifier {
    users: Arc<dyn UserRepository>,
    hasher: Arc<dyn PasswordHasher>,
    // Hashed with the live parameters on first use; `None` if hashing failed.
    dummy_hash: Arc<OnceCell<Option<String>>>,
}

impl CredentialVerifier {
    pub fn new(users: Arc<dyn UserRepository>, hasher: Arc<dyn PasswordHasher>) -> Self {
        Self {
            users,
            hasher,
            dummy_hash: Arc::new(OnceCell::new()),
        }
    }

    /// Run one hash verification whose result is discarded, so a rejected
    /// login costs the same whether or not the account has a password.
    fn verify_dummy(&self, secret: &str) {
        let dummy = self
            .dummy_hash
            .get_or_init(|| self.hasher.hash(DUMMY_SECRET).ok());
        if let Some(hash) = dummy.as_deref() {
            let _ = self.hasher.verify(secret, hash);
        }
    }

    /// Resolve `identifier` as a username or email and check `secret`.
    ///
    /// Unknown identifiers, OAuth-only accounts and wrong secrets all fail
    /// with the same `InvalidCredentials`.
    ///
    /// # Errors
    /// `InvalidCredentials` or a storage failure.
    pub async fn verify(&self, identifier: &str, secret: &str) -> Result<User, AuthError> {
        let identifier = identifier.trim();
        if identifier.is_empty() || secret.is_empty() {
            return Err(AuthError::InvalidCredentials);
        }

        // Email first: usernames never contain '@', so at most one user matches.
        let user = match self.users.find_by_email(&normalize_email(identifier)).await? {
            Some(user) => Some(user),
            None => self.users.find_by_username(identifier).await?,
        };

        let Some(user) = user else {
            self.verify_dummy(secret);
            debug!("login rejected: unknown identifier");
            return Err(AuthError::InvalidCredentials);
        };

        let Some(hash) = user.password_hash.as_deref() else {
            self.verify_dummy(secret);
            debug!(user_id = %user.id, "login rejected: account has no local password");
            return Err(AuthError::InvalidCredentials);
        };

        if self.hasher.verify(secret, hash) {
            Ok(user)
        } else {
            debug!(user_id = %user.id, "login rejected: password mismatch");
            Err(AuthError::InvalidCredentials)
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::identity::memory::MemoryStore;
    use crate::identity::model::NewUser;
    use crate::identity::password::Argon2Hasher;

    async fn setup(password: Option<&str>) -> (CredentialVerifier, User) {
        let store = Arc::new(MemoryStore::new());
        let hasher = Arc::new(Argon2Hasher::new(
            argon2::Params::new(1024, 1, 1, None).unwrap(),
        ));
        let password_hash = password.map(|p| hasher.hash(p).unwrap());
        let user = store
            .insert(NewUser {
                username: "alice".to_string(),
                email: Some("alice@x.com".to_string()),
                password_hash,
                name: "Alice".to_string(),
            })
            .await
            .unwrap();
        (CredentialVerifier::new(store, hasher), user)
    }

    #[tokio::test]
    async fn accepts_username_or_email() {
        let (verifier, user) = setup(Some("secret")).await;
        let by_name = verifier.verify("alice", "secret").await.unwrap();
        assert_eq!(by_name.id, user.id);
        let by_email = verifier.verify(" Alice@X.com ", "secret").await.unwrap();
        assert_eq!(by_email.id, user.id);
    }

    #[tokio::test]
    async fn email_match_wins_over_username_match() {
        for _ in 0..10 {
            let (verifier, alice) = setup(Some("secret")).await;
            // Written straight to the store; registration refuses such usernames.
            verifier
                .users
                .insert(NewUser {
                    username: "alice@x.com".to_string(),
                    email: Some("mallory@x.com".to_string()),
                    password_hash: Some(verifier.hasher.hash("mallory").unwrap()),
                    name: "Mallory".to_string(),
                })
                .await
                .unwrap();

            let user = verifier.verify("alice@x.com", "secret").await.unwrap();
            assert_eq!(user.id, alice.id);
            assert!(matches!(
                verifier.verify("alice@x.com", "mallory").await,
                Err(AuthError::InvalidCredentials)
            ));
        }
    }

    #[tokio::test]
    async fn same_error_for_unknown_user_and_wrong_secret() {
        let (verifier, _) = setup(Some("secret")).await;
        let unknown = verifier.verify("bob", "secret").await;
        let wrong = verifier.verify("alice", "nope").await;
        assert!(matches!(unknown, Err(AuthError::InvalidCredentials)));
        assert!(matches!(wrong, Err(AuthError::InvalidCredentials)));
    }

    #[tokio::test]
    async fn oauth_only_account_cannot_log_in_locally() {
        let (verifier, _) = setup(None).await;
        let result = verifier.verify("alice", "").await;
        assert!(matches!(result, Err(AuthError::InvalidCredentials)));
        let result = verifier.verify("alice", "anything").await;
        assert!(matches!(result, Err(AuthError::InvalidCredentials)));
    }

    struct CountingHasher {
        inner: Argon2Hasher,
        verifications: std::sync::atomic::AtomicUsize,
    }

    impl PasswordHasher for CountingHasher {
        fn hash(&self, secret: &str) -> Result<String, AuthError> {
            self.inner.hash(secret)
        }

        fn verify(&self, secret: &str, hash: &str) -> bool {
            self.verifications
                .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            self.inner.verify(secret, hash)
        }
    }

    #[tokio::test]
    async fn every_rejection_pays_for_a_hash_check() {
        let store = Arc::new(MemoryStore::new());
        let hasher = Arc::new(CountingHasher {
            inner: Argon2Hasher::new(argon2::Params::new(1024, 1, 1, None).unwrap()),
            verifications: std::sync::atomic::AtomicUsize::new(0),
        });
        store
            .insert(NewUser {
                username: "olive".to_string(),
                email: Some("olive@x.com".to_string()),
                password_hash: None,
                name: "Olive".to_string(),
            })
            .await
            .unwrap();
        store
            .insert(NewUser {
                username: "alice".to_string(),
                email: Some("alice@x.com".to_string()),
                password_hash: Some(hasher.hash("secret").unwrap()),
                name: "Alice".to_string(),
            })
            .await
            .unwrap();
        let verifier = CredentialVerifier::new(store, hasher.clone());
        let count = || hasher.verifications.load(std::sync::atomic::Ordering::SeqCst);

        for (identifier, secret) in [("nobody", "guess"), ("olive", "guess"), ("alice", "guess")] {
            let before = count();
            assert!(matches!(
                verifier.verify(identifier, secret).await,
                Err(AuthError::InvalidCredentials)
            ));
            assert_eq!(count() - before, 1, "{identifier} skipped the hash check");
        }
        // The dummy hash never verifies a caller's secret.
        assert!(matches!(
            verifier.verify("nobody", DUMMY_SECRET).await,
            Err(AuthError::InvalidCredentials)
        ));
    }
}
