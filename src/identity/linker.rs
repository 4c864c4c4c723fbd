//! Reconcile external-provider logins with local users.
//!
//! Flow Overview:
//! 1. A known `(provider, provider_user_id)` link resolves to its user, whose
//!    name/email are synced from the provider.
//! 2. Otherwise an email match links the provider identity to that user,
//!    unless the user has a local password.
//! 3. Otherwise a new passwordless user is provisioned with the link.
//!
//! Every write for one callback happens in a single store transaction. Unique
//! violations from a concurrent callback send the flow back to step 1.

use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::error::{AuthError, Constraint, StoreError};
use super::model::{NewUser, ProfileUpdate, User};
use super::store::{AccountLinkRepository, UserRepository};
use super::unique_name::{self, RandomSuffix, MAX_ATTEMPTS, USERNAME_MAX_LEN};
use super::utils::{non_blank, normalize_email};

/// Resolution passes allowed when concurrent callbacks keep colliding.
const MAX_RESOLVE_ATTEMPTS: usize = 3;

/// Identity asserted by an external provider after its own verification.
#[derive(Clone, Debug, PartialEq)]
pub struct ProviderIdentity {
    pub provider: String,
    pub provider_user_id: String,
    pub email: Option<String>,
    pub name: Option<String>,
    /// Raw provider attributes, kept for the request principal.
    pub attributes: Map<String, Value>,
    pub id_token: Option<String>,
}

impl ProviderIdentity {
    #[must_use]
    pub fn new(provider: &str, provider_user_id: &str) -> Self {
        Self {
            provider: provider.trim().to_lowercase(),
            provider_user_id: provider_user_id.trim().to_string(),
            email: None,
            name: None,
            attributes: Map::new(),
            id_token: None,
        }
    }

    #[must_use]
    pub fn with_email(mut self, email: Option<&str>) -> Self {
        self.email = non_blank(email).map(|email| normalize_email(&email));
        self
    }

    #[must_use]
    pub fn with_name(mut self, name: Option<&str>) -> Self {
        self.name = non_blank(name);
        self
    }

    #[must_use]
    pub fn with_id_token(mut self, id_token: Option<String>) -> Self {
        self.id_token = id_token;
        self
    }

    /// Build from a provider's user-info attributes.
    ///
    /// Google identifies users by `sub`, GitHub and Facebook by `id`; any
    /// other provider by `sub`, then `id`.
    ///
    /// # Errors
    /// `ProviderIdentityMissing` when no usable identifier is present.
    pub fn from_attributes(provider: &str, attributes: Map<String, Value>) -> Result<Self, AuthError> {
        let provider_user_id = provider_id_keys(provider)
            .iter()
            .find_map(|key| attribute_string(&attributes, key))
            .ok_or(AuthError::ProviderIdentityMissing)?;

        let email = attribute_string(&attributes, "email");
        let name = attribute_string(&attributes, "name");

        let mut identity = Self::new(provider, &provider_user_id)
            .with_email(email.as_deref())
            .with_name(name.as_deref());
        if identity.provider.is_empty() {
            return Err(AuthError::InvalidInput("provider name is required".to_string()));
        }
        identity.attributes = attributes;
        Ok(identity)
    }
}

fn provider_id_keys(provider: &str) -> &'static [&'static str] {
    match provider.trim().to_lowercase().as_str() {
        "google" => &["sub"],
        "github" | "facebook" => &["id"],
        _ => &["sub", "id"],
    }
}

/// Non-blank string (or number, for numeric provider ids) attribute.
fn attribute_string(attributes: &Map<String, Value>, key: &str) -> Option<String> {
    match attributes.get(key)? {
        Value::String(value) => non_blank(Some(value)),
        Value::Number(value) => Some(value.to_string()),
        _ => None,
    }
}

#[derive(Clone)]
pub struct IdentityLinker {
    users: Arc<dyn UserRepository>,
    links: Arc<dyn AccountLinkRepository>,
}

enum Step {
    Resolved(User),
    Retry,
}

impl IdentityLinker {
    pub fn new(users: Arc<dyn UserRepository>, links: Arc<dyn AccountLinkRepository>) -> Self {
        Self { users, links }
    }

    /// Resolve a provider login to a local user, provisioning one if needed.
    ///
    /// # Errors
    /// - `AccountLinkConflict` when the email belongs to a password-protected account,
    /// - `ProviderIdentityMissing` for an empty provider user id,
    /// - storage failures, including conflicts that persist past the retry budget.
    #[instrument(skip(self, identity), fields(provider = %identity.provider))]
    pub async fn resolve(&self, identity: &ProviderIdentity) -> Result<User, AuthError> {
        if identity.provider_user_id.is_empty() {
            return Err(AuthError::ProviderIdentityMissing);
        }
        if identity.provider.is_empty() {
            return Err(AuthError::InvalidInput("provider name is required".to_string()));
        }

        let mut last_conflict = Constraint::ProviderLink;
        for attempt in 0..MAX_RESOLVE_ATTEMPTS {
            match self.resolve_once(identity).await {
                Ok(Step::Resolved(user)) => return Ok(user),
                Ok(Step::Retry) => {}
                Err(AuthError::Store(StoreError::Conflict(constraint))) => {
                    last_conflict = constraint;
                }
                Err(err) => return Err(err),
            }
            warn!(attempt, "concurrent provider login detected, retrying lookup");
        }
        Err(StoreError::Conflict(last_conflict).into())
    }

    async fn resolve_once(&self, identity: &ProviderIdentity) -> Result<Step, AuthError> {
        // 1. Known provider identity.
        if let Some(link) = self
            .links
            .find_link(&identity.provider, &identity.provider_user_id)
            .await?
        {
            let Some(user) = self.users.find_by_id(link.user_id).await? else {
                // Link without owner; only possible mid-delete.
                return Ok(Step::Retry);
            };
            return self.sync_attributes(user, identity).await.map(Step::Resolved);
        }

        // 2. Soft match on email.
        if let Some(email) = identity.email.as_deref() {
            if let Some(existing) = self.users.find_by_email(email).await? {
                if existing.has_password() {
                    warn!(user_id = %existing.id, "provider email matches a password-protected account");
                    return Err(AuthError::AccountLinkConflict);
                }
                let update = self.profile_update(&existing, identity).await?;
                let user = self
                    .links
                    .link_existing_user(
                        existing.id,
                        &identity.provider,
                        &identity.provider_user_id,
                        &update,
                    )
                    .await?;
                info!(user_id = %user.id, "linked provider identity to existing account");
                return Ok(Step::Resolved(user));
            }
        }

        // 3. Provision.
        self.provision(identity).await.map(Step::Resolved)
    }

    async fn provision(&self, identity: &ProviderIdentity) -> Result<User, AuthError> {
        let base = unique_name::username_base(
            identity.email.as_deref(),
            identity.name.as_deref(),
            &identity.provider_user_id,
        );
        let strategy = RandomSuffix {
            max_len: USERNAME_MAX_LEN,
        };

        for _ in 0..MAX_RESOLVE_ATTEMPTS {
            let username = unique_name::generate(&base, &strategy, MAX_ATTEMPTS, |candidate| async move {
                self.users
                    .find_by_username(&candidate)
                    .await
                    .map(|user| user.is_some())
            })
            .await?;

            let new_user = NewUser {
                username,
                email: identity.email.clone(),
                password_hash: None,
                name: identity.name.clone().unwrap_or_default(),
            };

            match self
                .links
                .create_user_with_link(new_user, &identity.provider, &identity.provider_user_id)
                .await
            {
                Ok(user) => {
                    info!(user_id = %user.id, username = %user.username, "provisioned user from provider login");
                    return Ok(user);
                }
                // Lost the username race; the check above is only a pre-filter.
                Err(StoreError::Conflict(Constraint::Username)) => {
                    warn!("generated username taken concurrently, regenerating");
                }
                Err(err) => return Err(err.into()),
            }
        }
        Err(StoreError::Conflict(Constraint::Username).into())
    }

    /// Changes the provider asserts that can be applied to `user`.
    ///
    /// An email already owned by another user is never reassigned.
    async fn profile_update(
        &self,
        user: &User,
        identity: &ProviderIdentity,
    ) -> Result<ProfileUpdate, AuthError> {
        let name = identity
            .name
            .clone()
            .filter(|name| *name != user.name);

        let email = match identity.email.as_deref() {
            Some(email) if user.email.as_deref() != Some(email) => {
                match self.users.find_by_email(email).await? {
                    Some(owner) if owner.id != user.id => {
                        warn!(
                            user_id = %user.id,
                            owner_id = %owner.id,
                            "provider email belongs to another account, keeping current email"
                        );
                        None
                    }
                    _ => Some(email.to_string()),
                }
            }
            _ => None,
        };

        Ok(ProfileUpdate { name, email })
    }

    async fn sync_attributes(
        &self,
        user: User,
        identity: &ProviderIdentity,
    ) -> Result<User, AuthError> {
        let update = self.profile_update(&user, identity).await?;
        if update.is_empty() {
            return Ok(user);
        }

        match self.users.update_profile(user.id, &update).await {
            Ok(Some(updated)) => Ok(updated),
            Ok(None) => Err(AuthError::UserNotFound),
            Err(StoreError::Conflict(Constraint::Email)) => {
                warn!(user_id = %user.id, "provider email claimed concurrently, keeping current email");
                self.apply_without_email(user, update).await
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn apply_without_email(&self, user: User, update: ProfileUpdate) -> Result<User, AuthError> {
        let update = update.without_email();
        if update.is_empty() {
            return Ok(user);
        }
        Ok(self
            .users
            .update_profile(user.id, &update)
            .await?
            .ok_or(AuthError::UserNotFound)?)
    }

    /// Owner of a provider identity, if linked.
    ///
    /// # Errors
    /// Storage failure only.
    pub async fn linked_user_id(
        &self,
        provider: &str,
        provider_user_id: &str,
    ) -> Result<Option<Uuid>, AuthError> {
        Ok(self
            .links
            .find_link(provider, provider_user_id)
            .await?
            .map(|link| link.user_id))
    }
}
