//! Postgres-backed repositories.
//!
//! Expects the schema in `db/sql/01_quire.sql`. Unique violations are mapped
//! to [`StoreError::Conflict`] by constraint name.

use anyhow::anyhow;
use async_trait::async_trait;
use sqlx::{postgres::PgRow, PgPool, Row};
use tracing::Instrument;
use uuid::Uuid;

use super::error::{Constraint, StoreError};
use super::model::{NewUser, ProfileUpdate, ProviderAccountLink, RefreshToken, User};
use super::store::{
    AccountLinkRepository, RefreshTokenRepository, StoreHealth, StoreResult, UserRepository,
};

const USER_COLUMNS: &str =
    "id, username, email, password_hash, name, token_version, created_at, updated_at";

fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().is_some_and(|code| code.as_ref() == "23505"),
        _ => false,
    }
}

fn constraint_for(name: &str) -> Option<Constraint> {
    match name {
        "users_username_key" => Some(Constraint::Username),
        "users_email_key" => Some(Constraint::Email),
        "provider_account_links_provider_key" => Some(Constraint::ProviderLink),
        "refresh_tokens_token_hash_key" => Some(Constraint::RefreshToken),
        _ => None,
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        if is_unique_violation(&err) {
            if let sqlx::Error::Database(db_err) = &err {
                if let Some(constraint) = db_err.constraint().and_then(constraint_for) {
                    return Self::Conflict(constraint);
                }
            }
        }
        Self::backend(err)
    }
}

macro_rules! db_span {
    ($operation:expr, $query:expr) => {
        tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = $operation,
            db.statement = $query
        )
    };
}

fn user_from_row(row: &PgRow) -> Result<User, sqlx::Error> {
    Ok(User {
        id: row.try_get("id")?,
        username: row.try_get("username")?,
        email: row.try_get("email")?,
        password_hash: row.try_get("password_hash")?,
        name: row.try_get("name")?,
        token_version: row.try_get("token_version")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn refresh_token_from_row(row: &PgRow) -> Result<RefreshToken, sqlx::Error> {
    Ok(RefreshToken {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        token_hash: row.try_get("token_hash")?,
        user_version: row.try_get("user_version")?,
        expires_at: row.try_get("expires_at")?,
        created_at: row.try_get("created_at")?,
    })
}

fn link_from_row(row: &PgRow) -> Result<ProviderAccountLink, sqlx::Error> {
    Ok(ProviderAccountLink {
        id: row.try_get("id")?,
        provider: row.try_get("provider")?,
        provider_user_id: row.try_get("provider_user_id")?,
        user_id: row.try_get("user_id")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[derive(Clone, Debug)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn find_user_where(&self, clause: &str, binds: &[&str]) -> StoreResult<Option<User>> {
        let query = format!("SELECT {USER_COLUMNS} FROM users WHERE {clause}");
        let span = db_span!("SELECT", query.as_str());
        let mut statement = sqlx::query(&query);
        for bind in binds {
            statement = statement.bind(*bind);
        }
        let row = statement
            .fetch_optional(&self.pool)
            .instrument(span)
            .await?;
        Ok(row.as_ref().map(user_from_row).transpose()?)
    }
}

async fn insert_user<'e, E>(executor: E, user: NewUser) -> StoreResult<User>
where
    E: sqlx::Executor<'e, Database = sqlx::Postgres>,
{
    let query = format!(
        "INSERT INTO users (id, username, email, password_hash, name) \
         VALUES ($1, $2, $3, $4, $5) RETURNING {USER_COLUMNS}"
    );
    let span = db_span!("INSERT", query.as_str());
    let row = sqlx::query(&query)
        .bind(Uuid::now_v7())
        .bind(user.username)
        .bind(user.email)
        .bind(user.password_hash)
        .bind(user.name)
        .fetch_one(executor)
        .instrument(span)
        .await?;
    Ok(user_from_row(&row)?)
}

async fn insert_link<'e, E>(
    executor: E,
    user_id: Uuid,
    provider: &str,
    provider_user_id: &str,
) -> StoreResult<()>
where
    E: sqlx::Executor<'e, Database = sqlx::Postgres>,
{
    let query = "INSERT INTO provider_account_links (id, provider, provider_user_id, user_id) \
                 VALUES ($1, $2, $3, $4)";
    let span = db_span!("INSERT", query);
    sqlx::query(query)
        .bind(Uuid::now_v7())
        .bind(provider)
        .bind(provider_user_id)
        .bind(user_id)
        .execute(executor)
        .instrument(span)
        .await?;
    Ok(())
}

#[async_trait]
impl UserRepository for PgStore {
    async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<User>> {
        let query = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        let span = db_span!("SELECT", query.as_str());
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await?;
        Ok(row.as_ref().map(user_from_row).transpose()?)
    }

    async fn find_by_username(&self, username: &str) -> StoreResult<Option<User>> {
        self.find_user_where("username = $1", &[username]).await
    }

    async fn find_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        self.find_user_where("email = $1", &[email]).await
    }

    async fn find_by_email_or_username(
        &self,
        email: &str,
        username: &str,
    ) -> StoreResult<Option<User>> {
        self.find_user_where(
            "email = $1 OR username = $2 \
             ORDER BY CASE WHEN email = $1 THEN 0 ELSE 1 END LIMIT 1",
            &[email, username],
        )
        .await
    }

    async fn insert(&self, user: NewUser) -> StoreResult<User> {
        insert_user(&self.pool, user).await
    }

    async fn update_profile(
        &self,
        id: Uuid,
        update: &ProfileUpdate,
    ) -> StoreResult<Option<User>> {
        let query = format!(
            "UPDATE users SET name = COALESCE($2, name), email = COALESCE($3, email), \
             updated_at = NOW() WHERE id = $1 RETURNING {USER_COLUMNS}"
        );
        let span = db_span!("UPDATE", query.as_str());
        let row = sqlx::query(&query)
            .bind(id)
            .bind(update.name.as_deref())
            .bind(update.email.as_deref())
            .fetch_optional(&self.pool)
            .instrument(span)
            .await?;
        Ok(row.as_ref().map(user_from_row).transpose()?)
    }

    async fn increment_token_version(&self, id: Uuid) -> StoreResult<Option<i64>> {
        let query = "UPDATE users SET token_version = token_version + 1, updated_at = NOW() \
                     WHERE id = $1 RETURNING token_version";
        let span = db_span!("UPDATE", query);
        let row = sqlx::query(query)
            .bind(id)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await?;
        Ok(row
            .map(|row| row.try_get::<i64, _>("token_version"))
            .transpose()?)
    }
}

#[async_trait]
impl RefreshTokenRepository for PgStore {
    async fn replace_for_user(&self, token: &RefreshToken) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;

        // Row lock on the owner serializes concurrent issues for one user.
        let query = "SELECT id FROM users WHERE id = $1 FOR UPDATE";
        let span = db_span!("SELECT", query);
        let owner = sqlx::query(query)
            .bind(token.user_id)
            .fetch_optional(&mut *tx)
            .instrument(span)
            .await?;
        if owner.is_none() {
            return Err(StoreError::backend(anyhow!(
                "refresh token owner {} does not exist",
                token.user_id
            )));
        }

        let query = "DELETE FROM refresh_tokens WHERE user_id = $1";
        let span = db_span!("DELETE", query);
        sqlx::query(query)
            .bind(token.user_id)
            .execute(&mut *tx)
            .instrument(span)
            .await?;

        let query = "INSERT INTO refresh_tokens \
                     (id, user_id, token_hash, user_version, expires_at, created_at) \
                     VALUES ($1, $2, $3, $4, $5, $6)";
        let span = db_span!("INSERT", query);
        sqlx::query(query)
            .bind(token.id)
            .bind(token.user_id)
            .bind(token.token_hash.as_slice())
            .bind(token.user_version)
            .bind(token.expires_at)
            .bind(token.created_at)
            .execute(&mut *tx)
            .instrument(span)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn find_by_hash(&self, token_hash: &[u8]) -> StoreResult<Option<RefreshToken>> {
        let query = "SELECT id, user_id, token_hash, user_version, expires_at, created_at \
                     FROM refresh_tokens WHERE token_hash = $1";
        let span = db_span!("SELECT", query);
        let row = sqlx::query(query)
            .bind(token_hash)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await?;
        Ok(row.as_ref().map(refresh_token_from_row).transpose()?)
    }

    async fn delete_by_hash(&self, token_hash: &[u8]) -> StoreResult<bool> {
        let query = "DELETE FROM refresh_tokens WHERE token_hash = $1";
        let span = db_span!("DELETE", query);
        let result = sqlx::query(query)
            .bind(token_hash)
            .execute(&self.pool)
            .instrument(span)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_for_user(&self, user_id: Uuid) -> StoreResult<u64> {
        let query = "DELETE FROM refresh_tokens WHERE user_id = $1";
        let span = db_span!("DELETE", query);
        let result = sqlx::query(query)
            .bind(user_id)
            .execute(&self.pool)
            .instrument(span)
            .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl AccountLinkRepository for PgStore {
    async fn find_link(
        &self,
        provider: &str,
        provider_user_id: &str,
    ) -> StoreResult<Option<ProviderAccountLink>> {
        let query = "SELECT id, provider, provider_user_id, user_id, created_at, updated_at \
                     FROM provider_account_links WHERE provider = $1 AND provider_user_id = $2";
        let span = db_span!("SELECT", query);
        let row = sqlx::query(query)
            .bind(provider)
            .bind(provider_user_id)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await?;
        Ok(row.as_ref().map(link_from_row).transpose()?)
    }

    async fn link_existing_user(
        &self,
        user_id: Uuid,
        provider: &str,
        provider_user_id: &str,
        update: &ProfileUpdate,
    ) -> StoreResult<User> {
        let mut tx = self.pool.begin().await?;

        let query = format!(
            "UPDATE users SET name = COALESCE($2, name), email = COALESCE($3, email), \
             updated_at = NOW() WHERE id = $1 RETURNING {USER_COLUMNS}"
        );
        let span = db_span!("UPDATE", query.as_str());
        let row = sqlx::query(&query)
            .bind(user_id)
            .bind(update.name.as_deref())
            .bind(update.email.as_deref())
            .fetch_optional(&mut *tx)
            .instrument(span)
            .await?;
        let Some(row) = row else {
            return Err(StoreError::backend(anyhow!(
                "link owner {user_id} does not exist"
            )));
        };
        let user = user_from_row(&row)?;

        insert_link(&mut *tx, user_id, provider, provider_user_id).await?;
        tx.commit().await?;
        Ok(user)
    }

    async fn create_user_with_link(
        &self,
        user: NewUser,
        provider: &str,
        provider_user_id: &str,
    ) -> StoreResult<User> {
        let mut tx = self.pool.begin().await?;
        let user = insert_user(&mut *tx, user).await?;
        insert_link(&mut *tx, user.id, provider, provider_user_id).await?;
        tx.commit().await?;
        Ok(user)
    }
}

#[async_trait]
impl StoreHealth for PgStore {
    async fn ping(&self) -> StoreResult<()> {
        let query = "SELECT 1";
        let span = db_span!("SELECT", query);
        sqlx::query(query)
            .execute(&self.pool)
            .instrument(span)
            .await?;
        Ok(())
    }
}
