use thiserror::Error;
use uuid::Uuid;

pub type Result<T> = std::result::Result<T, AccountError>;

/// Errors surfaced by the account service.
///
/// "Not found" conditions are never errors: lookups return `None` and
/// transitions return `false` so callers cannot enumerate accounts.
#[derive(Debug, Error)]
pub enum AccountError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Username already in use")]
    UsernameAlreadyExists,

    #[error("Email already in use")]
    EmailAlreadyExists,

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Account {0} was modified concurrently")]
    ConcurrentUpdate(Uuid),

    #[error("Notification error: {0}")]
    Notification(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AccountError {
    /// Username or email uniqueness violation
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            AccountError::UsernameAlreadyExists | AccountError::EmailAlreadyExists
        )
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, AccountError::Validation(_))
    }

    /// Persistence failures abort the operation
    pub fn is_storage(&self) -> bool {
        matches!(
            self,
            AccountError::Storage(_) | AccountError::ConcurrentUpdate(_)
        )
    }
}

impl From<sqlx::Error> for AccountError {
    fn from(err: sqlx::Error) -> Self {
        tracing::error!("Database error: {}", err);
        AccountError::Storage(err.to_string())
    }
}

impl From<sqlx::migrate::MigrateError> for AccountError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        tracing::error!("Migration error: {}", err);
        AccountError::Storage(err.to_string())
    }
}

impl From<lettre::error::Error> for AccountError {
    fn from(err: lettre::error::Error) -> Self {
        AccountError::Notification(err.to_string())
    }
}
