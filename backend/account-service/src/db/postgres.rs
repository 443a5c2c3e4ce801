/// PostgreSQL account store
use super::AccountStore;
use crate::config::DatabaseSettings;
use crate::domain::{Account, TokenPurpose, VerificationToken};
use crate::error::{AccountError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, Transaction};
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

const USERNAME_CONSTRAINT: &str = "user_accounts_tenant_username_key";
const EMAIL_CONSTRAINT: &str = "user_accounts_tenant_email_key";

const ACCOUNT_COLUMNS: &str = "id, tenant, username, email, password_hash, \
    is_account_verified, is_login_allowed, is_account_closed, \
    failed_login_count, last_failed_login_at, last_login_at, password_changed_at, \
    unconfirmed_email, verification_key, verification_purpose, verification_issued_at, \
    created_at, version";

/// Row shape of `user_accounts`
#[derive(Debug, sqlx::FromRow)]
struct AccountRecord {
    id: Uuid,
    tenant: String,
    username: String,
    email: String,
    password_hash: String,
    is_account_verified: bool,
    is_login_allowed: bool,
    is_account_closed: bool,
    failed_login_count: i32,
    last_failed_login_at: Option<DateTime<Utc>>,
    last_login_at: Option<DateTime<Utc>>,
    password_changed_at: Option<DateTime<Utc>>,
    unconfirmed_email: Option<String>,
    verification_key: Option<String>,
    verification_purpose: Option<String>,
    verification_issued_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    version: i64,
}

impl TryFrom<AccountRecord> for Account {
    type Error = AccountError;

    fn try_from(record: AccountRecord) -> Result<Self> {
        let verification = match (
            record.verification_key,
            record.verification_purpose,
            record.verification_issued_at,
        ) {
            (Some(value), Some(purpose), Some(issued_at)) => {
                let purpose = TokenPurpose::parse(&purpose).ok_or_else(|| {
                    AccountError::Storage(format!("Unknown verification purpose: {purpose}"))
                })?;
                Some(VerificationToken {
                    value,
                    purpose,
                    issued_at,
                })
            }
            _ => None,
        };

        Ok(Account {
            id: record.id,
            tenant: record.tenant,
            username: record.username,
            email: record.email,
            password_hash: record.password_hash,
            is_account_verified: record.is_account_verified,
            is_login_allowed: record.is_login_allowed,
            is_account_closed: record.is_account_closed,
            failed_login_count: u32::try_from(record.failed_login_count).unwrap_or(0),
            last_failed_login_at: record.last_failed_login_at,
            last_login_at: record.last_login_at,
            password_changed_at: record.password_changed_at,
            unconfirmed_email: record.unconfirmed_email,
            verification,
            created_at: record.created_at,
            version: record.version,
        })
    }
}

/// Token slot split into its three columns
fn token_columns(
    account: &Account,
) -> (Option<&str>, Option<&'static str>, Option<DateTime<Utc>>) {
    match &account.verification {
        Some(token) => (
            Some(token.value.as_str()),
            Some(token.purpose.as_str()),
            Some(token.issued_at),
        ),
        None => (None, None, None),
    }
}

fn failed_count_column(account: &Account) -> i32 {
    i32::try_from(account.failed_login_count).unwrap_or(i32::MAX)
}

/// Unique violations on the tenant constraints become conflict errors
fn map_write_error(err: sqlx::Error) -> AccountError {
    let conflict = match &err {
        sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
            match db_err.constraint() {
                Some(USERNAME_CONSTRAINT) => Some(AccountError::UsernameAlreadyExists),
                Some(EMAIL_CONSTRAINT) => Some(AccountError::EmailAlreadyExists),
                _ => None,
            }
        }
        _ => None,
    };

    conflict.unwrap_or_else(|| AccountError::from(err))
}

/// Run embedded migrations
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    info!("Database migrations completed");
    Ok(())
}

/// Holds the username lock until the transaction ends
async fn claim_username(tx: &mut Transaction<'_, Postgres>, account: &Account) -> Result<()> {
    sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
        .bind(&account.username)
        .execute(&mut **tx)
        .await?;

    let taken = sqlx::query_scalar::<_, bool>(
        "SELECT EXISTS(SELECT 1 FROM user_accounts WHERE username = $1 AND id <> $2)",
    )
    .bind(&account.username)
    .bind(account.id)
    .fetch_one(&mut **tx)
    .await?;

    if taken {
        return Err(AccountError::UsernameAlreadyExists);
    }
    Ok(())
}

#[derive(Clone)]
pub struct PgAccountStore {
    pool: PgPool,
    global_usernames: bool,
}

impl PgAccountStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            global_usernames: false,
        }
    }

    /// Reject a username held by any tenant. The table constraint only
    /// covers `(tenant, username)`, so writes take a per-username advisory
    /// lock and check the other tenants inside the same transaction.
    pub fn with_global_usernames(mut self, global: bool) -> Self {
        self.global_usernames = global;
        self
    }

    /// Connect a pool from settings
    pub async fn connect(settings: &DatabaseSettings) -> Result<Self> {
        let url = settings
            .url
            .as_deref()
            .ok_or_else(|| AccountError::Storage("DATABASE_URL is not set".to_string()))?;

        let pool = PgPoolOptions::new()
            .max_connections(settings.max_connections)
            .acquire_timeout(Duration::from_secs(settings.acquire_timeout))
            .connect(url)
            .await?;

        info!(
            "Database pool initialized with {} max connections",
            settings.max_connections
        );

        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn begin_write(&self, account: &Account) -> Result<Transaction<'static, Postgres>> {
        let mut tx = self.pool.begin().await?;
        if self.global_usernames {
            claim_username(&mut tx, account).await?;
        }
        Ok(tx)
    }

    async fn fetch_one_where(&self, clause: &str, binds: &[&str]) -> Result<Option<Account>> {
        let sql = format!("SELECT {ACCOUNT_COLUMNS} FROM user_accounts WHERE {clause}");
        let mut query = sqlx::query_as::<_, AccountRecord>(&sql);
        for value in binds {
            query = query.bind(*value);
        }

        query
            .fetch_optional(&self.pool)
            .await?
            .map(Account::try_from)
            .transpose()
    }
}

#[async_trait]
impl AccountStore for PgAccountStore {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Account>> {
        let sql = format!("SELECT {ACCOUNT_COLUMNS} FROM user_accounts WHERE id = $1");
        sqlx::query_as::<_, AccountRecord>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(Account::try_from)
            .transpose()
    }

    async fn find_by_username(&self, tenant: &str, username: &str) -> Result<Option<Account>> {
        self.fetch_one_where("tenant = $1 AND username = $2", &[tenant, username])
            .await
    }

    async fn find_by_email(&self, tenant: &str, email: &str) -> Result<Option<Account>> {
        self.fetch_one_where("tenant = $1 AND LOWER(email) = LOWER($2)", &[tenant, email])
            .await
    }

    async fn username_exists_in_any_tenant(&self, username: &str) -> Result<bool> {
        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM user_accounts WHERE username = $1)",
        )
        .bind(username)
        .fetch_one(&self.pool)
        .await?;

        Ok(exists)
    }

    async fn find_by_verification_key(&self, key: &str) -> Result<Option<Account>> {
        self.fetch_one_where("verification_key = $1", &[key]).await
    }

    async fn list_by_tenant(&self, tenant: &str) -> Result<Vec<Account>> {
        let sql = format!(
            "SELECT {ACCOUNT_COLUMNS} FROM user_accounts WHERE tenant = $1 ORDER BY created_at"
        );
        sqlx::query_as::<_, AccountRecord>(&sql)
            .bind(tenant)
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(Account::try_from)
            .collect()
    }

    async fn add(&self, account: &Account) -> Result<Account> {
        let (key, purpose, issued_at) = token_columns(account);
        let mut tx = self.begin_write(account).await?;

        let sql = format!(
            r#"
            INSERT INTO user_accounts (
                id, tenant, username, email, password_hash,
                is_account_verified, is_login_allowed, is_account_closed,
                failed_login_count, last_failed_login_at, last_login_at, password_changed_at,
                unconfirmed_email, verification_key, verification_purpose, verification_issued_at,
                created_at, version
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, 1)
            RETURNING {returning}
            "#,
            returning = ACCOUNT_COLUMNS,
        );

        let record = sqlx::query_as::<_, AccountRecord>(&sql)
            .bind(account.id)
            .bind(&account.tenant)
            .bind(&account.username)
            .bind(&account.email)
            .bind(&account.password_hash)
            .bind(account.is_account_verified)
            .bind(account.is_login_allowed)
            .bind(account.is_account_closed)
            .bind(failed_count_column(account))
            .bind(account.last_failed_login_at)
            .bind(account.last_login_at)
            .bind(account.password_changed_at)
            .bind(&account.unconfirmed_email)
            .bind(key)
            .bind(purpose)
            .bind(issued_at)
            .bind(account.created_at)
            .fetch_one(&mut *tx)
            .await
            .map_err(map_write_error)?;

        tx.commit().await?;
        Account::try_from(record)
    }

    async fn save(&self, account: &Account) -> Result<Account> {
        let (key, purpose, issued_at) = token_columns(account);
        let mut tx = self.begin_write(account).await?;

        let sql = format!(
            r#"
            UPDATE user_accounts SET
                username = $2,
                email = $3,
                password_hash = $4,
                is_account_verified = $5,
                is_login_allowed = $6,
                is_account_closed = $7,
                failed_login_count = $8,
                last_failed_login_at = $9,
                last_login_at = $10,
                password_changed_at = $11,
                unconfirmed_email = $12,
                verification_key = $13,
                verification_purpose = $14,
                verification_issued_at = $15,
                version = version + 1
            WHERE id = $1 AND version = $16
            RETURNING {returning}
            "#,
            returning = ACCOUNT_COLUMNS,
        );

        let record = sqlx::query_as::<_, AccountRecord>(&sql)
            .bind(account.id)
            .bind(&account.username)
            .bind(&account.email)
            .bind(&account.password_hash)
            .bind(account.is_account_verified)
            .bind(account.is_login_allowed)
            .bind(account.is_account_closed)
            .bind(failed_count_column(account))
            .bind(account.last_failed_login_at)
            .bind(account.last_login_at)
            .bind(account.password_changed_at)
            .bind(&account.unconfirmed_email)
            .bind(key)
            .bind(purpose)
            .bind(issued_at)
            .bind(account.version)
            .fetch_optional(&mut *tx)
            .await
            .map_err(map_write_error)?
            .ok_or(AccountError::ConcurrentUpdate(account.id))?;

        tx.commit().await?;
        Account::try_from(record)
    }

    async fn remove(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM user_accounts WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}
