/// Tenant-scoped account lookups
///
/// Every lookup resolves the tenant first. A blank tenant, username, email or
/// key is a miss, never an error.
use crate::config::SecuritySettings;
use crate::db::AccountStore;
use crate::domain::Account;
use crate::error::Result;
use crate::validators::{is_blank, mask_email};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

#[derive(Clone)]
pub struct TenantDirectory {
    store: Arc<dyn AccountStore>,
    settings: Arc<SecuritySettings>,
}

impl TenantDirectory {
    pub fn new(store: Arc<dyn AccountStore>, settings: Arc<SecuritySettings>) -> Self {
        Self { store, settings }
    }

    /// Effective tenant for a request
    ///
    /// Single-tenant deployments ignore `requested`. `None` marks an unusable
    /// tenant.
    pub fn resolve_tenant(&self, requested: Option<&str>) -> Option<String> {
        let tenant = if self.settings.multi_tenant {
            requested?
        } else {
            self.settings.default_tenant.as_str()
        };

        if is_blank(tenant) {
            None
        } else {
            Some(tenant.to_string())
        }
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<Account>> {
        let found = self.store.find_by_id(id).await?;
        if found.is_none() {
            debug!(account_id = %id, "account not found by id");
        }
        Ok(found)
    }

    pub async fn find_by_username(
        &self,
        tenant: Option<&str>,
        username: &str,
    ) -> Result<Option<Account>> {
        let Some(tenant) = self.resolve_tenant(tenant) else {
            debug!("lookup by username with invalid tenant");
            return Ok(None);
        };
        if is_blank(username) {
            return Ok(None);
        }

        let found = self.store.find_by_username(&tenant, username).await?;
        if found.is_none() {
            debug!(tenant = %tenant, username = %username, "account not found by username");
        }
        Ok(found)
    }

    pub async fn find_by_email(&self, tenant: Option<&str>, email: &str) -> Result<Option<Account>> {
        let Some(tenant) = self.resolve_tenant(tenant) else {
            debug!("lookup by email with invalid tenant");
            return Ok(None);
        };
        if is_blank(email) {
            return Ok(None);
        }

        let found = self.store.find_by_email(&tenant, email).await?;
        if found.is_none() {
            debug!(tenant = %tenant, email = %mask_email(email), "account not found by email");
        }
        Ok(found)
    }

    /// Account holding the pending key, whatever its purpose
    pub async fn find_by_token(&self, key: &str) -> Result<Option<Account>> {
        if is_blank(key) {
            return Ok(None);
        }

        let found = self.store.find_by_verification_key(key).await?;
        if found.is_none() {
            debug!("account not found by verification key");
        }
        Ok(found)
    }

    /// Closed accounts still hold their username
    pub async fn username_in_use(&self, tenant: Option<&str>, username: &str) -> Result<bool> {
        if is_blank(username) {
            return Ok(false);
        }

        let Some(tenant) = self.resolve_tenant(tenant) else {
            return Ok(false);
        };

        if self.settings.usernames_unique_across_tenants {
            return self.store.username_exists_in_any_tenant(username).await;
        }

        Ok(self
            .store
            .find_by_username(&tenant, username)
            .await?
            .is_some())
    }

    /// Email uniqueness is always per tenant
    pub async fn email_in_use(&self, tenant: Option<&str>, email: &str) -> Result<bool> {
        Ok(self.find_by_email(tenant, email).await?.is_some())
    }

    /// Open accounts of the tenant
    pub async fn list_active(&self, tenant: Option<&str>) -> Result<Vec<Account>> {
        let Some(tenant) = self.resolve_tenant(tenant) else {
            return Ok(Vec::new());
        };

        let accounts = self.store.list_by_tenant(&tenant).await?;
        Ok(accounts
            .into_iter()
            .filter(|a| !a.is_account_closed)
            .collect())
    }
}
