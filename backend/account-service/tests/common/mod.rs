#![allow(dead_code)]

use account_service::config::SecuritySettings;
use account_service::db::{AccountStore, InMemoryAccountStore};
use account_service::domain::Account;
use account_service::error::{AccountError, Result};
use account_service::security::PasswordHasher;
use account_service::services::{AccountService, NotificationGateway};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

pub const PASSWORD: &str = "SecurePass123!";

/// Reversible hasher so tests skip Argon2 cost
pub struct FastHasher;

impl PasswordHasher for FastHasher {
    fn hash(&self, password: &str) -> Result<String> {
        Ok(format!("test${password}"))
    }

    fn verify(&self, password: &str, password_hash: &str) -> Result<bool> {
        Ok(password_hash.strip_prefix("test$") == Some(password))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentNotice {
    pub kind: &'static str,
    pub account_id: Uuid,
    pub address: String,
}

/// Records every notice; optionally fails after recording
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<SentNotice>>,
    fail: AtomicBool,
}

impl RecordingNotifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing() -> Arc<Self> {
        let notifier = Self::default();
        notifier.fail.store(true, Ordering::SeqCst);
        Arc::new(notifier)
    }

    pub fn sent(&self) -> Vec<SentNotice> {
        self.sent.lock().unwrap().clone()
    }

    pub fn count(&self, kind: &str) -> usize {
        self.sent().iter().filter(|n| n.kind == kind).count()
    }

    fn record(&self, kind: &'static str, account: &Account, address: &str) -> Result<()> {
        self.sent.lock().unwrap().push(SentNotice {
            kind,
            account_id: account.id,
            address: address.to_string(),
        });

        if self.fail.load(Ordering::SeqCst) {
            return Err(AccountError::Notification("smtp unavailable".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl NotificationGateway for RecordingNotifier {
    async fn send_account_created(&self, account: &Account) -> Result<()> {
        self.record("account_created", account, &account.email)
    }

    async fn send_account_verified(&self, account: &Account) -> Result<()> {
        self.record("account_verified", account, &account.email)
    }

    async fn send_account_deleted(&self, account: &Account) -> Result<()> {
        self.record("account_deleted", account, &account.email)
    }

    async fn send_password_changed(&self, account: &Account) -> Result<()> {
        self.record("password_changed", account, &account.email)
    }

    async fn send_password_reset(&self, account: &Account) -> Result<()> {
        self.record("password_reset", account, &account.email)
    }

    async fn send_username_reminder(&self, account: &Account) -> Result<()> {
        self.record("username_reminder", account, &account.email)
    }

    async fn send_email_change_requested(&self, account: &Account, new_email: &str) -> Result<()> {
        self.record("email_change_requested", account, new_email)
    }

    async fn send_email_changed(&self, account: &Account, old_email: &str) -> Result<()> {
        self.record("email_changed", account, old_email)
    }
}

/// In-memory store whose commits can be made to fail
pub struct FlakyStore {
    inner: InMemoryAccountStore,
    fail_writes: AtomicBool,
}

impl FlakyStore {
    pub fn for_settings(settings: &SecuritySettings) -> Arc<Self> {
        Arc::new(Self {
            inner: InMemoryAccountStore::new()
                .with_global_usernames(settings.usernames_unique_across_tenants),
            fail_writes: AtomicBool::new(false),
        })
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(AccountError::Storage("connection reset".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl AccountStore for FlakyStore {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Account>> {
        self.inner.find_by_id(id).await
    }

    async fn find_by_username(&self, tenant: &str, username: &str) -> Result<Option<Account>> {
        self.inner.find_by_username(tenant, username).await
    }

    async fn find_by_email(&self, tenant: &str, email: &str) -> Result<Option<Account>> {
        self.inner.find_by_email(tenant, email).await
    }

    async fn username_exists_in_any_tenant(&self, username: &str) -> Result<bool> {
        self.inner.username_exists_in_any_tenant(username).await
    }

    async fn find_by_verification_key(&self, key: &str) -> Result<Option<Account>> {
        self.inner.find_by_verification_key(key).await
    }

    async fn list_by_tenant(&self, tenant: &str) -> Result<Vec<Account>> {
        self.inner.list_by_tenant(tenant).await
    }

    async fn add(&self, account: &Account) -> Result<Account> {
        self.check()?;
        self.inner.add(account).await
    }

    async fn save(&self, account: &Account) -> Result<Account> {
        self.check()?;
        self.inner.save(account).await
    }

    async fn remove(&self, id: Uuid) -> Result<bool> {
        self.check()?;
        self.inner.remove(id).await
    }
}

pub fn multi_tenant() -> SecuritySettings {
    SecuritySettings {
        multi_tenant: true,
        ..SecuritySettings::default()
    }
}

pub struct Harness {
    pub service: AccountService,
    pub store: Arc<FlakyStore>,
    pub notifier: Arc<RecordingNotifier>,
}

impl Harness {
    pub fn new(settings: SecuritySettings) -> Self {
        Self::with_notifier(settings, RecordingNotifier::new())
    }

    pub fn with_notifier(settings: SecuritySettings, notifier: Arc<RecordingNotifier>) -> Self {
        let store = FlakyStore::for_settings(&settings);
        let service = AccountService::new(store.clone(), Arc::new(settings))
            .with_hasher(Arc::new(FastHasher))
            .with_notifier(notifier.clone());

        Self {
            service,
            store,
            notifier,
        }
    }

    pub async fn stored(&self, id: Uuid) -> Account {
        self.store
            .find_by_id(id)
            .await
            .unwrap()
            .expect("account should be stored")
    }

    /// Create and verify `username` in `tenant`
    pub async fn verified_account(&self, tenant: &str, username: &str, email: &str) -> Account {
        let account = self
            .service
            .create_account(Some(tenant), username, PASSWORD, email)
            .await
            .unwrap();
        let key = account.verification_key().unwrap().to_string();
        assert!(self.service.verify_account(&key).await.unwrap());
        self.stored(account.id).await
    }
}
