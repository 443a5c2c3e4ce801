use super::AccountStore;
use crate::domain::Account;
use crate::error::{AccountError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Process-local store with the same uniqueness and version rules as the
/// Postgres table
#[derive(Debug, Default)]
pub struct InMemoryAccountStore {
    accounts: RwLock<HashMap<Uuid, Account>>,
    global_usernames: bool,
}

impl InMemoryAccountStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject a username held by any tenant, not only the account's own
    pub fn with_global_usernames(mut self, global: bool) -> Self {
        self.global_usernames = global;
        self
    }

    pub async fn len(&self) -> usize {
        self.accounts.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.accounts.read().await.is_empty()
    }
}

fn conflict_with(
    existing: &Account,
    candidate: &Account,
    global_usernames: bool,
) -> Option<AccountError> {
    if existing.id == candidate.id {
        return None;
    }
    let same_tenant = existing.tenant == candidate.tenant;
    if existing.username == candidate.username && (same_tenant || global_usernames) {
        return Some(AccountError::UsernameAlreadyExists);
    }
    if same_tenant && existing.email.eq_ignore_ascii_case(&candidate.email) {
        return Some(AccountError::EmailAlreadyExists);
    }
    None
}

#[async_trait]
impl AccountStore for InMemoryAccountStore {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Account>> {
        Ok(self.accounts.read().await.get(&id).cloned())
    }

    async fn find_by_username(&self, tenant: &str, username: &str) -> Result<Option<Account>> {
        let accounts = self.accounts.read().await;
        Ok(accounts
            .values()
            .find(|a| a.tenant == tenant && a.username == username)
            .cloned())
    }

    async fn find_by_email(&self, tenant: &str, email: &str) -> Result<Option<Account>> {
        let accounts = self.accounts.read().await;
        Ok(accounts
            .values()
            .find(|a| a.tenant == tenant && a.email.eq_ignore_ascii_case(email))
            .cloned())
    }

    async fn username_exists_in_any_tenant(&self, username: &str) -> Result<bool> {
        let accounts = self.accounts.read().await;
        Ok(accounts.values().any(|a| a.username == username))
    }

    async fn find_by_verification_key(&self, key: &str) -> Result<Option<Account>> {
        let accounts = self.accounts.read().await;
        Ok(accounts
            .values()
            .find(|a| a.verification_key() == Some(key))
            .cloned())
    }

    async fn list_by_tenant(&self, tenant: &str) -> Result<Vec<Account>> {
        let accounts = self.accounts.read().await;
        let mut listed: Vec<Account> = accounts
            .values()
            .filter(|a| a.tenant == tenant)
            .cloned()
            .collect();
        listed.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(listed)
    }

    async fn add(&self, account: &Account) -> Result<Account> {
        let mut accounts = self.accounts.write().await;

        if accounts.contains_key(&account.id) {
            return Err(AccountError::Storage(format!(
                "Account {} already exists",
                account.id
            )));
        }
        if let Some(err) = accounts
            .values()
            .find_map(|a| conflict_with(a, account, self.global_usernames)) {
            return Err(err);
        }

        let mut stored = account.clone();
        stored.version = 1;
        accounts.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn save(&self, account: &Account) -> Result<Account> {
        let mut accounts = self.accounts.write().await;

        let current_version = accounts
            .get(&account.id)
            .map(|a| a.version)
            .ok_or(AccountError::ConcurrentUpdate(account.id))?;

        if current_version != account.version {
            return Err(AccountError::ConcurrentUpdate(account.id));
        }
        if let Some(err) = accounts
            .values()
            .find_map(|a| conflict_with(a, account, self.global_usernames)) {
            return Err(err);
        }

        let mut stored = account.clone();
        stored.version += 1;
        accounts.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn remove(&self, id: Uuid) -> Result<bool> {
        Ok(self.accounts.write().await.remove(&id).is_some())
    }
}
