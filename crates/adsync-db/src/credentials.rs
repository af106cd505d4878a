//! Credential Store Accessor: OAuth token records and account bindings.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::DbError;

// ---------------------------------------------------------------------------
// Row types
// ---------------------------------------------------------------------------

/// A row from the `account_platforms` table.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct PlatformRow {
    pub id: i64,
    pub name: String,
}

/// A row from the `credentials` table. One per (user, platform).
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct CredentialRow {
    pub id: i64,
    pub user_id: i64,
    pub platform_id: i64,
    pub flag: bool,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub token_expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CredentialRow {
    /// A credential without a recorded expiry is never considered expired by time.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.token_expires_at.is_some_and(|expiry| expiry <= now)
    }
}

/// A credential joined with its owner, for the expiry notifier.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct CredentialWithUser {
    #[sqlx(flatten)]
    pub credential: CredentialRow,
    pub user_name: String,
    pub user_email: String,
}

/// An account bound to a platform, paired with the owning user's token.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct AccountToken {
    pub account_id: String,
    pub user_id: i64,
    pub access_token: String,
    pub refresh_token: Option<String>,
}

// ---------------------------------------------------------------------------
// Write types
// ---------------------------------------------------------------------------

/// Field-level change to one credential, addressed by primary key.
/// `None` fields are left untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialUpdate {
    pub id: i64,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub token_expires_at: Option<DateTime<Utc>>,
    pub flag: Option<bool>,
}

impl CredentialUpdate {
    #[must_use]
    pub fn flag(id: i64, valid: bool) -> Self {
        Self {
            id,
            access_token: None,
            refresh_token: None,
            token_expires_at: None,
            flag: Some(valid),
        }
    }

    /// A successful refresh: new token, marked valid. A `None` expiry keeps
    /// the stored one.
    #[must_use]
    pub fn refreshed(
        id: i64,
        access_token: String,
        refresh_token: Option<String>,
        token_expires_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            id,
            access_token: Some(access_token),
            refresh_token,
            token_expires_at,
            flag: Some(true),
        }
    }
}

/// Refreshed token written back by owner rather than by primary key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnerCredentialUpdate {
    pub user_id: i64,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub token_expires_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Accessor trait
// ---------------------------------------------------------------------------

#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn platform_by_name(&self, name: &str) -> Result<Option<PlatformRow>, DbError>;

    async fn platform_by_id(&self, id: i64) -> Result<Option<PlatformRow>, DbError>;

    async fn list_credentials(&self, platform_id: i64) -> Result<Vec<CredentialRow>, DbError>;

    async fn list_credentials_with_users(&self) -> Result<Vec<CredentialWithUser>, DbError>;

    /// Accounts bound to the platform with a currently valid token,
    /// one row per account.
    async fn list_account_tokens(&self, platform_id: i64) -> Result<Vec<AccountToken>, DbError>;

    async fn list_account_ids(&self, platform_id: i64, user_id: i64)
        -> Result<Vec<String>, DbError>;

    /// Apply all updates atomically. Returns the number of rows changed.
    async fn apply_credential_updates(&self, updates: &[CredentialUpdate]) -> Result<u64, DbError>;

    /// Apply refreshed tokens keyed by (user, platform) atomically.
    async fn apply_owner_updates(
        &self,
        platform_id: i64,
        updates: &[OwnerCredentialUpdate],
    ) -> Result<u64, DbError>;
}

// ---------------------------------------------------------------------------
// Postgres implementation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct PgCredentialStore {
    pool: PgPool,
}

impl PgCredentialStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const CREDENTIAL_COLUMNS: &str = "c.id, c.user_id, c.platform_id, c.flag, c.access_token, \
     c.refresh_token, c.token_expires_at, c.created_at, c.updated_at";

#[async_trait]
impl CredentialStore for PgCredentialStore {
    async fn platform_by_name(&self, name: &str) -> Result<Option<PlatformRow>, DbError> {
        let row = sqlx::query_as::<_, PlatformRow>(
            "SELECT id, name FROM account_platforms WHERE name = $1",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn platform_by_id(&self, id: i64) -> Result<Option<PlatformRow>, DbError> {
        let row = sqlx::query_as::<_, PlatformRow>(
            "SELECT id, name FROM account_platforms WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn list_credentials(&self, platform_id: i64) -> Result<Vec<CredentialRow>, DbError> {
        let rows = sqlx::query_as::<_, CredentialRow>(&format!(
            "SELECT {CREDENTIAL_COLUMNS} FROM credentials c \
             WHERE c.platform_id = $1 \
             ORDER BY c.id"
        ))
        .bind(platform_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn list_credentials_with_users(&self) -> Result<Vec<CredentialWithUser>, DbError> {
        let rows = sqlx::query_as::<_, CredentialWithUser>(&format!(
            "SELECT {CREDENTIAL_COLUMNS}, u.name AS user_name, u.email AS user_email \
             FROM credentials c \
             JOIN users u ON u.id = c.user_id \
             ORDER BY c.user_id, c.id"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn list_account_tokens(&self, platform_id: i64) -> Result<Vec<AccountToken>, DbError> {
        let rows = sqlx::query_as::<_, AccountToken>(
            "SELECT DISTINCT ON (ac.account_id) \
                    ac.account_id, ac.user_id, c.access_token, c.refresh_token \
             FROM account_configurations ac \
             JOIN credentials c \
               ON c.user_id = ac.user_id AND c.platform_id = ac.platform_id \
             WHERE ac.platform_id = $1 \
               AND c.flag = TRUE \
               AND c.access_token IS NOT NULL \
             ORDER BY ac.account_id, c.updated_at DESC",
        )
        .bind(platform_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn list_account_ids(
        &self,
        platform_id: i64,
        user_id: i64,
    ) -> Result<Vec<String>, DbError> {
        let ids = sqlx::query_scalar::<_, String>(
            "SELECT account_id FROM account_configurations \
             WHERE platform_id = $1 AND user_id = $2 \
             ORDER BY account_id",
        )
        .bind(platform_id)
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    async fn apply_credential_updates(&self, updates: &[CredentialUpdate]) -> Result<u64, DbError> {
        if updates.is_empty() {
            return Ok(0);
        }

        let mut ids: Vec<i64> = Vec::with_capacity(updates.len());
        let mut access_tokens: Vec<Option<String>> = Vec::with_capacity(updates.len());
        let mut refresh_tokens: Vec<Option<String>> = Vec::with_capacity(updates.len());
        let mut expiries: Vec<Option<DateTime<Utc>>> = Vec::with_capacity(updates.len());
        let mut flags: Vec<Option<bool>> = Vec::with_capacity(updates.len());

        for update in updates {
            ids.push(update.id);
            access_tokens.push(update.access_token.clone());
            refresh_tokens.push(update.refresh_token.clone());
            expiries.push(update.token_expires_at);
            flags.push(update.flag);
        }

        let mut tx = self.pool.begin().await?;
        let affected = sqlx::query(
            "UPDATE credentials AS c SET \
                 access_token     = COALESCE(u.access_token, c.access_token), \
                 refresh_token    = COALESCE(u.refresh_token, c.refresh_token), \
                 token_expires_at = COALESCE(u.token_expires_at, c.token_expires_at), \
                 flag             = COALESCE(u.flag, c.flag), \
                 updated_at       = NOW() \
             FROM UNNEST($1::int8[], $2::text[], $3::text[], $4::timestamptz[], $5::bool[]) \
                  AS u(id, access_token, refresh_token, token_expires_at, flag) \
             WHERE c.id = u.id",
        )
        .bind(&ids)
        .bind(&access_tokens)
        .bind(&refresh_tokens)
        .bind(&expiries)
        .bind(&flags)
        .execute(&mut *tx)
        .await?
        .rows_affected();
        tx.commit().await?;

        Ok(affected)
    }

    async fn apply_owner_updates(
        &self,
        platform_id: i64,
        updates: &[OwnerCredentialUpdate],
    ) -> Result<u64, DbError> {
        if updates.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        let mut affected = 0u64;
        for update in updates {
            affected += sqlx::query(
                "UPDATE credentials SET \
                     access_token     = $3, \
                     refresh_token    = COALESCE($4, refresh_token), \
                     token_expires_at = COALESCE($5, token_expires_at), \
                     flag             = TRUE, \
                     updated_at       = NOW() \
                 WHERE user_id = $1 AND platform_id = $2",
            )
            .bind(update.user_id)
            .bind(platform_id)
            .bind(&update.access_token)
            .bind(&update.refresh_token)
            .bind(update.token_expires_at)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        }
        tx.commit().await?;

        Ok(affected)
    }
}
