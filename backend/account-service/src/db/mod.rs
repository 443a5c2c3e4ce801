/// Account persistence
///
/// The service only talks to [`AccountStore`]; `save` is the single commit
/// point of every lifecycle operation.
use crate::domain::Account;
use crate::error::Result;
use async_trait::async_trait;
use uuid::Uuid;

pub mod memory;
pub mod postgres;

pub use memory::InMemoryAccountStore;
pub use postgres::{run_migrations, PgAccountStore};

#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Account>>;

    async fn find_by_username(&self, tenant: &str, username: &str) -> Result<Option<Account>>;

    async fn find_by_email(&self, tenant: &str, email: &str) -> Result<Option<Account>>;

    async fn username_exists_in_any_tenant(&self, username: &str) -> Result<bool>;

    async fn find_by_verification_key(&self, key: &str) -> Result<Option<Account>>;

    /// Every account in `tenant`, closed ones included
    async fn list_by_tenant(&self, tenant: &str) -> Result<Vec<Account>>;

    /// Insert a new record
    ///
    /// Fails with a conflict error when the tenant already holds the
    /// username or email.
    async fn add(&self, account: &Account) -> Result<Account>;

    /// Persist a mutated snapshot
    ///
    /// Fails with `ConcurrentUpdate` when the stored version moved since the
    /// snapshot was read. Returns the record with its bumped version.
    async fn save(&self, account: &Account) -> Result<Account>;

    /// Hard delete. Returns whether a record was removed.
    async fn remove(&self, id: Uuid) -> Result<bool>;
}
