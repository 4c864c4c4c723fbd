//! Session orchestration: the entry point transports call into.
//!
//! Sessions use two credentials. The access token is stateless and short-lived.
//! The refresh token is opaque and persisted, with one per user. Ordering of
//! checks and side effects in [`SessionService::refresh`] matters: the user is
//! always re-read, and a version mismatch revokes the presented refresh token
//! before failing.

use chrono::Duration;
use secrecy::SecretString;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::access_token::AccessTokenCodec;
use super::credentials::CredentialVerifier;
use super::error::{AuthError, Constraint, StoreError};
use super::linker::{IdentityLinker, ProviderIdentity};
use super::model::{NewUser, User};
use super::password::PasswordHasher;
use super::principal::{Principal, RequestIdentity, TokenRejection};
use super::refresh_token::RefreshTokenStore;
use super::store::{Clock, Stores, UserRepository};
use super::unique_name::USERNAME_MAX_LEN;
use super::utils::{non_blank, normalize_email, valid_email};
use super::version::TokenVersionGuard;

const DEFAULT_ISSUER: &str = "quire";
const DEFAULT_ACCESS_TTL_MINUTES: i64 = 15;
const DEFAULT_REFRESH_TTL_DAYS: i64 = 7;

#[derive(Clone, Debug)]
pub struct SessionConfig {
    signing_secret: SecretString,
    issuer: String,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl SessionConfig {
    #[must_use]
    pub fn new(signing_secret: SecretString) -> Self {
        Self {
            signing_secret,
            issuer: DEFAULT_ISSUER.to_string(),
            access_ttl: Duration::minutes(DEFAULT_ACCESS_TTL_MINUTES),
            refresh_ttl: Duration::days(DEFAULT_REFRESH_TTL_DAYS),
        }
    }

    #[must_use]
    pub fn with_issuer(mut self, issuer: String) -> Self {
        self.issuer = issuer;
        self
    }

    #[must_use]
    pub fn with_access_ttl(mut self, ttl: Duration) -> Self {
        self.access_ttl = ttl;
        self
    }

    #[must_use]
    pub fn with_refresh_ttl(mut self, ttl: Duration) -> Self {
        self.refresh_ttl = ttl;
        self
    }

    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    #[must_use]
    pub fn access_ttl(&self) -> Duration {
        self.access_ttl
    }

    #[must_use]
    pub fn refresh_ttl(&self) -> Duration {
        self.refresh_ttl
    }
}

/// Result of a password or provider login.
#[derive(Clone, PartialEq)]
pub struct LoginOutcome {
    pub access_token: String,
    pub refresh_token: String,
    pub principal: Principal,
}

impl LoginOutcome {
    #[must_use]
    pub fn user(&self) -> &User {
        super::principal::Identity::user(&self.principal)
    }
}

impl std::fmt::Debug for LoginOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoginOutcome")
            .field("access_token", &"***")
            .field("refresh_token", &"***")
            .field("principal", &self.principal)
            .finish()
    }
}

#[derive(Clone, PartialEq)]
pub struct RefreshOutcome {
    pub access_token: String,
    pub user: User,
}

impl std::fmt::Debug for RefreshOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshOutcome")
            .field("access_token", &"***")
            .field("user", &self.user)
            .finish()
    }
}

/// Registration input, validated by [`SessionService::register`].
#[derive(Clone)]
pub struct Registration {
    pub username: String,
    pub email: String,
    pub password: String,
    pub name: String,
}

impl std::fmt::Debug for Registration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registration")
            .field("username", &self.username)
            .field("email", &self.email)
            .field("password", &"***")
            .field("name", &self.name)
            .finish()
    }
}

#[derive(Clone)]
pub struct SessionService {
    users: Arc<dyn UserRepository>,
    hasher: Arc<dyn PasswordHasher>,
    credentials: CredentialVerifier,
    access: AccessTokenCodec,
    refresh: RefreshTokenStore,
    versions: TokenVersionGuard,
    linker: IdentityLinker,
}

impl SessionService {
    pub fn new(
        stores: Stores,
        hasher: Arc<dyn PasswordHasher>,
        config: SessionConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            credentials: CredentialVerifier::new(stores.users.clone(), hasher.clone()),
            access: AccessTokenCodec::new(
                config.signing_secret,
                config.issuer,
                config.access_ttl,
                clock.clone(),
            ),
            refresh: RefreshTokenStore::new(stores.refresh_tokens, config.refresh_ttl, clock),
            versions: TokenVersionGuard::new(stores.users.clone()),
            linker: IdentityLinker::new(stores.users.clone(), stores.links),
            users: stores.users,
            hasher,
        }
    }

    #[must_use]
    pub fn access_tokens(&self) -> &AccessTokenCodec {
        &self.access
    }

    #[must_use]
    pub fn refresh_tokens(&self) -> &RefreshTokenStore {
        &self.refresh
    }

    #[must_use]
    pub fn versions(&self) -> &TokenVersionGuard {
        &self.versions
    }

    /// Verify a password login and start a new session.
    ///
    /// Any previous refresh token of the user stops working.
    ///
    /// # Errors
    /// `InvalidCredentials`, `TokenCreation`, or a storage failure.
    #[instrument(skip(self, identifier, secret))]
    pub async fn login(&self, identifier: &str, secret: &str) -> Result<LoginOutcome, AuthError> {
        let user = self.credentials.verify(identifier, secret).await?;
        let outcome = self.start_session(Principal::Local { user }).await?;
        info!(user_id = %outcome.user().id, "login succeeded");
        Ok(outcome)
    }

    /// Mint a new access token from a refresh token. The refresh token is not rotated.
    ///
    /// # Errors
    /// - `InvalidRefreshToken` for unknown tokens,
    /// - `RefreshTokenExpired` (token deleted),
    /// - `UserNotFound` or `SessionInvalidated` (token revoked),
    /// - `TokenCreation` or a storage failure.
    #[instrument(skip(self, presented))]
    pub async fn refresh(&self, presented: &str) -> Result<RefreshOutcome, AuthError> {
        let token = self
            .refresh
            .find(presented)
            .await?
            .ok_or(AuthError::InvalidRefreshToken)?;
        let token = self.refresh.verify(token).await?;

        let current = match self.users.find_by_id(token.user_id).await? {
            Some(user) => user,
            None => {
                warn!(user_id = %token.user_id, "refresh token owner no longer exists");
                self.refresh.revoke(presented).await?;
                return Err(AuthError::UserNotFound);
            }
        };

        if let Err(err) = self.versions.check(&current, token.user_version) {
            self.refresh.revoke(presented).await?;
            return Err(err);
        }

        let access_token = self.access.issue(&current)?;
        debug!(user_id = %current.id, "access token refreshed");
        Ok(RefreshOutcome {
            access_token,
            user: current,
        })
    }

    /// End the session tied to `presented`, if any. Never fails for a missing token.
    ///
    /// # Errors
    /// Storage failure only.
    #[instrument(skip(self, presented))]
    pub async fn logout(&self, presented: Option<&str>) -> Result<(), AuthError> {
        if let Some(token) = presented {
            self.refresh.revoke(token).await?;
        }
        Ok(())
    }

    /// Invalidate every access and refresh token of `user_id`.
    ///
    /// # Errors
    /// `UserNotFound` or a storage failure.
    #[instrument(skip(self))]
    pub async fn sign_out_everywhere(&self, user_id: Uuid) -> Result<i64, AuthError> {
        let version = self.versions.bump(user_id).await?;
        let removed = self.refresh.revoke_all(user_id).await?;
        info!(user_id = %user_id, version, removed, "signed out everywhere");
        Ok(version)
    }

    /// Create a local account.
    ///
    /// # Errors
    /// `InvalidInput` for blank or malformed fields, `UserAlreadyExists` when
    /// the username or email is taken, `PasswordHashing` if hashing fails.
    #[instrument(skip(self, registration), fields(username = %registration.username))]
    pub async fn register(&self, registration: Registration) -> Result<User, AuthError> {
        let username = required("username", &registration.username)?;
        let email = normalize_email(&required("email", &registration.email)?);
        let name = required("name", &registration.name)?;
        if registration.password.trim().is_empty() {
            return Err(AuthError::InvalidInput("password is required".to_string()));
        }
        if !valid_email(&email) {
            return Err(AuthError::InvalidInput("email is not valid".to_string()));
        }
        if username.contains('@') {
            return Err(AuthError::InvalidInput(
                "username must not contain '@'".to_string(),
            ));
        }
        if username.chars().count() > USERNAME_MAX_LEN {
            return Err(AuthError::InvalidInput(format!(
                "username must be at most {USERNAME_MAX_LEN} characters"
            )));
        }

        if self
            .users
            .find_by_email_or_username(&email, &username)
            .await?
            .is_some()
        {
            return Err(AuthError::UserAlreadyExists);
        }

        let password_hash = self.hasher.hash(&registration.password)?;
        let user = self
            .users
            .insert(NewUser {
                username,
                email: Some(email),
                password_hash: Some(password_hash),
                name,
            })
            .await
            .map_err(|err| match err {
                StoreError::Conflict(Constraint::Username | Constraint::Email) => {
                    AuthError::UserAlreadyExists
                }
                other => other.into(),
            })?;

        info!(user_id = %user.id, "user registered");
        Ok(user)
    }

    /// Resolve a provider login to a local user without issuing tokens.
    ///
    /// # Errors
    /// See [`IdentityLinker::resolve`].
    pub async fn resolve_oauth(&self, identity: &ProviderIdentity) -> Result<User, AuthError> {
        self.linker.resolve(identity).await
    }

    /// Resolve a provider login and start a session for it.
    ///
    /// Earlier sessions of the user are invalidated first.
    ///
    /// # Errors
    /// See [`IdentityLinker::resolve`], plus `TokenCreation` or a storage failure.
    #[instrument(skip(self, identity), fields(provider = %identity.provider))]
    pub async fn oauth_login(&self, identity: &ProviderIdentity) -> Result<LoginOutcome, AuthError> {
        let mut user = self.linker.resolve(identity).await?;
        user.token_version = self.versions.bump(user.id).await?;

        let outcome = self
            .start_session(Principal::OAuth {
                user,
                provider: identity.provider.clone(),
                claims: identity.attributes.clone(),
                id_token: identity.id_token.clone(),
            })
            .await?;
        info!(user_id = %outcome.user().id, "provider login succeeded");
        Ok(outcome)
    }

    /// Resolve an optional bearer token into a request identity.
    ///
    /// A missing token is anonymous. A token that fails to decode is
    /// `Rejected` with the reason. A valid token whose user is gone or whose
    /// version is stale is anonymous.
    ///
    /// # Errors
    /// Only storage failures.
    pub async fn authenticate(&self, bearer: Option<&str>) -> Result<RequestIdentity, AuthError> {
        let Some(token) = bearer.and_then(|token| non_blank(Some(token))) else {
            return Ok(RequestIdentity::Anonymous);
        };

        let claims = match self.access.decode(&token) {
            Ok(claims) => claims,
            Err(err) => {
                let Some(rejection) = TokenRejection::from_error(&err) else {
                    return Err(err);
                };
                warn!(reason = err.code(), "access token rejected");
                return Ok(RequestIdentity::Rejected(rejection));
            }
        };
        match self
            .versions
            .check_current(claims.user_id, claims.token_version)
            .await
        {
            Ok(user) => Ok(RequestIdentity::Authenticated(Principal::Local { user })),
            Err(AuthError::UserNotFound | AuthError::SessionInvalidated) => {
                debug!(user_id = %claims.user_id, "access token no longer attributable");
                Ok(RequestIdentity::Anonymous)
            }
            Err(err) => Err(err),
        }
    }

    /// Tokens are minted before anything is persisted, so a failed signature
    /// never leaves a dangling refresh token.
    async fn start_session(&self, principal: Principal) -> Result<LoginOutcome, AuthError> {
        let user = super::principal::Identity::user(&principal);
        let access_token = self.access.issue(user)?;
        let issued = self.refresh.issue(user).await?;
        Ok(LoginOutcome {
            access_token,
            refresh_token: issued.token,
            principal,
        })
    }
}

fn required(field: &str, value: &str) -> Result<String, AuthError> {
    non_blank(Some(value)).ok_or_else(|| AuthError::InvalidInput(format!("{field} is required")))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::identity::memory::MemoryStore;
    use crate::identity::password::Argon2Hasher;
    use crate::identity::principal::Identity;
    use crate::identity::store::FixedClock;
    use chrono::Utc;

    struct Harness {
        service: SessionService,
        store: Arc<MemoryStore>,
        clock: Arc<FixedClock>,
    }

    fn harness() -> Harness {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let hasher = Arc::new(Argon2Hasher::new(
            argon2::Params::new(1024, 1, 1, None).unwrap(),
        ));
        let config = SessionConfig::new(SecretString::from("0123456789abcdef0123456789abcdef"));
        let service = SessionService::new(Stores::shared(store.clone()), hasher, config, clock.clone());
        Harness {
            service,
            store,
            clock,
        }
    }

    fn alice() -> Registration {
        Registration {
            username: "alice".to_string(),
            email: "alice@x.com".to_string(),
            password: "secret".to_string(),
            name: "Alice".to_string(),
        }
    }

    #[tokio::test]
    async fn login_then_refresh_keeps_subject() {
        let h = harness();
        let user = h.service.register(alice()).await.unwrap();
        let login = h.service.login("alice", "secret").await.unwrap();
        assert_eq!(login.user().username, "alice");

        let refreshed = h.service.refresh(&login.refresh_token).await.unwrap();
        let claims = h.service.access_tokens().decode(&refreshed.access_token).unwrap();
        assert_eq!(claims.user_id, user.id);
        assert_eq!(claims.token_version, 0);
    }

    #[tokio::test]
    async fn second_login_invalidates_first_refresh_token() {
        let h = harness();
        h.service.register(alice()).await.unwrap();
        let first = h.service.login("alice", "secret").await.unwrap();
        let second = h.service.login("alice@x.com", "secret").await.unwrap();

        assert!(matches!(
            h.service.refresh(&first.refresh_token).await,
            Err(AuthError::InvalidRefreshToken)
        ));
        assert!(h.service.refresh(&second.refresh_token).await.is_ok());
    }

    #[tokio::test]
    async fn version_bump_invalidates_then_revokes() {
        let h = harness();
        let user = h.service.register(alice()).await.unwrap();
        let login = h.service.login("alice", "secret").await.unwrap();

        h.service.versions().bump(user.id).await.unwrap();
        assert!(matches!(
            h.service.refresh(&login.refresh_token).await,
            Err(AuthError::SessionInvalidated)
        ));
        assert!(matches!(
            h.service.refresh(&login.refresh_token).await,
            Err(AuthError::InvalidRefreshToken)
        ));
    }

    #[tokio::test]
    async fn expired_refresh_token_is_deleted() {
        let h = harness();
        h.service.register(alice()).await.unwrap();
        let login = h.service.login("alice", "secret").await.unwrap();

        h.clock.advance(Duration::days(8));
        assert!(matches!(
            h.service.refresh(&login.refresh_token).await,
            Err(AuthError::RefreshTokenExpired)
        ));
        assert!(h
            .service
            .refresh_tokens()
            .find(&login.refresh_token)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn bad_credentials_issue_nothing() {
        let h = harness();
        h.service.register(alice()).await.unwrap();
        assert!(matches!(
            h.service.login("alice", "wrong").await,
            Err(AuthError::InvalidCredentials)
        ));
        assert_eq!(h.store.refresh_token_count().await, 0);
    }

    #[tokio::test]
    async fn logout_is_idempotent() {
        let h = harness();
        h.service.register(alice()).await.unwrap();
        let login = h.service.login("alice", "secret").await.unwrap();

        h.service.logout(Some(&login.refresh_token)).await.unwrap();
        h.service.logout(Some(&login.refresh_token)).await.unwrap();
        h.service.logout(None).await.unwrap();
        assert!(matches!(
            h.service.refresh(&login.refresh_token).await,
            Err(AuthError::InvalidRefreshToken)
        ));
    }

    #[tokio::test]
    async fn duplicate_email_or_username_is_rejected() {
        let h = harness();
        h.service.register(alice()).await.unwrap();

        let same_email = Registration {
            username: "alice2".to_string(),
            email: "ALICE@x.com".to_string(),
            ..alice()
        };
        assert!(matches!(
            h.service.register(same_email).await,
            Err(AuthError::UserAlreadyExists)
        ));

        let same_username = Registration {
            email: "other@x.com".to_string(),
            ..alice()
        };
        assert!(matches!(
            h.service.register(same_username).await,
            Err(AuthError::UserAlreadyExists)
        ));
    }

    #[tokio::test]
    async fn username_shaped_like_an_email_is_rejected() {
        let h = harness();
        h.service.register(alice()).await.unwrap();

        let squatter = Registration {
            username: "alice@x.com".to_string(),
            email: "mallory@x.com".to_string(),
            password: "mallory-pw".to_string(),
            name: "Mallory".to_string(),
        };
        assert!(matches!(
            h.service.register(squatter).await,
            Err(AuthError::InvalidInput(_))
        ));
        assert_eq!(h.store.user_count().await, 1);

        for _ in 0..10 {
            let login = h.service.login("alice@x.com", "secret").await.unwrap();
            assert_eq!(login.user().username, "alice");
        }
    }

    #[tokio::test]
    async fn registration_validates_fields() {
        let h = harness();
        for registration in [
            Registration {
                username: " ".to_string(),
                ..alice()
            },
            Registration {
                email: "not-an-email".to_string(),
                ..alice()
            },
            Registration {
                password: String::new(),
                ..alice()
            },
            Registration {
                name: String::new(),
                ..alice()
            },
            Registration {
                username: "a".repeat(51),
                ..alice()
            },
        ] {
            assert!(matches!(
                h.service.register(registration).await,
                Err(AuthError::InvalidInput(_))
            ));
        }
        assert_eq!(h.store.user_count().await, 0);
    }

    #[tokio::test]
    async fn sign_out_everywhere_kills_all_credentials() {
        let h = harness();
        let user = h.service.register(alice()).await.unwrap();
        let login = h.service.login("alice", "secret").await.unwrap();

        assert_eq!(h.service.sign_out_everywhere(user.id).await.unwrap(), 1);
        assert!(matches!(
            h.service.refresh(&login.refresh_token).await,
            Err(AuthError::InvalidRefreshToken)
        ));
        let identity = h.service.authenticate(Some(&login.access_token)).await.unwrap();
        assert_eq!(identity, RequestIdentity::Anonymous);
    }

    #[tokio::test]
    async fn authenticate_resolves_bearer_tokens() {
        let h = harness();
        let user = h.service.register(alice()).await.unwrap();
        let login = h.service.login("alice", "secret").await.unwrap();

        let identity = h.service.authenticate(Some(&login.access_token)).await.unwrap();
        assert_eq!(identity.principal().map(Identity::user_id), Some(user.id));

        assert_eq!(
            h.service.authenticate(None).await.unwrap(),
            RequestIdentity::Anonymous
        );
        assert_eq!(
            h.service.authenticate(Some("garbage")).await.unwrap(),
            RequestIdentity::Rejected(TokenRejection::Malformed)
        );

        h.clock.advance(Duration::minutes(16));
        assert_eq!(
            h.service.authenticate(Some(&login.access_token)).await.unwrap(),
            RequestIdentity::Rejected(TokenRejection::Expired)
        );
    }

    #[tokio::test]
    async fn oauth_login_bumps_version_and_issues_tokens() {
        let h = harness();
        let identity = ProviderIdentity::new("google", "g-1")
            .with_email(Some("olivia@x.com"))
            .with_name(Some("Olivia"))
            .with_id_token(Some("provider-id-token".to_string()));

        let first = h.service.oauth_login(&identity).await.unwrap();
        assert_eq!(first.user().token_version, 1);
        assert_eq!(first.principal.provider(), Some("google"));
        assert!(matches!(
            &first.principal,
            Principal::OAuth { id_token: Some(token), .. } if token == "provider-id-token"
        ));

        let second = h.service.oauth_login(&identity).await.unwrap();
        assert_eq!(second.user().id, first.user().id);
        assert_eq!(second.user().token_version, 2);

        assert!(matches!(
            h.service.refresh(&first.refresh_token).await,
            Err(AuthError::InvalidRefreshToken)
        ));
        let refreshed = h.service.refresh(&second.refresh_token).await.unwrap();
        let claims = h.service.access_tokens().decode(&refreshed.access_token).unwrap();
        assert_eq!(claims.token_version, 2);
        assert_eq!(claims.email.as_deref(), Some("olivia@x.com"));
    }

    #[tokio::test]
    async fn oauth_conflict_with_password_account() {
        let h = harness();
        h.service.register(alice()).await.unwrap();
        let identity = ProviderIdentity::new("google", "g-9").with_email(Some("alice@x.com"));
        assert!(matches!(
            h.service.oauth_login(&identity).await,
            Err(AuthError::AccountLinkConflict)
        ));
        assert_eq!(h.store.user_count().await, 1);
        assert_eq!(h.store.link_count().await, 0);
        assert_eq!(h.store.refresh_token_count().await, 0);
    }

    #[tokio::test]
    async fn debug_output_hides_tokens() {
        let h = harness();
        h.service.register(alice()).await.unwrap();
        let login = h.service.login("alice", "secret").await.unwrap();
        let rendered = format!("{login:?}");
        assert!(!rendered.contains(&login.access_token));
        assert!(!rendered.contains(&login.refresh_token));
        assert!(!format!("{:?}", alice()).contains("secret"));
    }
}
