/// Account lifecycle orchestration
///
/// Every mutating operation follows the same sequence:
///
/// 1. Resolve the tenant and reject blank arguments (`Ok(false)`)
/// 2. Validate password strength and email format (`Validation`)
/// 3. Pre-check username and email uniqueness (conflict errors)
/// 4. Apply the transition to a freshly read [`Account`]
/// 5. Commit the record through [`AccountStore::save`]
/// 6. Only after a successful commit, attempt one notification
///
/// Notification failures are logged, counted and swallowed: the committed
/// state change stands.
use crate::config::SecuritySettings;
use crate::db::AccountStore;
use crate::directory::TenantDirectory;
use crate::domain::{
    deletion_disposition, Account, AuthOutcome, Disposition, LockoutPolicy, TokenPurpose,
};
use crate::error::{AccountError, Result};
use crate::metrics;
use crate::security::{Argon2Hasher, PasswordHasher, PasswordPolicy};
use crate::services::notification::NotificationGateway;
use crate::validators::{is_blank, mask_email, validate_email, validate_username};
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

enum Notice<'a> {
    Created(&'a Account),
    Verified(&'a Account),
    Deleted(&'a Account),
    PasswordChanged(&'a Account),
    PasswordReset(&'a Account),
    UsernameReminder(&'a Account),
    EmailChangeRequested(&'a Account, &'a str),
    EmailChanged(&'a Account, &'a str),
}

impl Notice<'_> {
    fn kind(&self) -> &'static str {
        match self {
            Notice::Created(_) => "account_created",
            Notice::Verified(_) => "account_verified",
            Notice::Deleted(_) => "account_deleted",
            Notice::PasswordChanged(_) => "password_changed",
            Notice::PasswordReset(_) => "password_reset",
            Notice::UsernameReminder(_) => "username_reminder",
            Notice::EmailChangeRequested(..) => "email_change_requested",
            Notice::EmailChanged(..) => "email_changed",
        }
    }

    fn account(&self) -> &Account {
        match self {
            Notice::Created(a)
            | Notice::Verified(a)
            | Notice::Deleted(a)
            | Notice::PasswordChanged(a)
            | Notice::PasswordReset(a)
            | Notice::UsernameReminder(a)
            | Notice::EmailChangeRequested(a, _)
            | Notice::EmailChanged(a, _) => a,
        }
    }
}

/// Account service
#[derive(Clone)]
pub struct AccountService {
    directory: TenantDirectory,
    store: Arc<dyn AccountStore>,
    settings: Arc<SecuritySettings>,
    hasher: Arc<dyn PasswordHasher>,
    policy: Option<Arc<dyn PasswordPolicy>>,
    notifier: Option<Arc<dyn NotificationGateway>>,
}

impl AccountService {
    /// Service with Argon2 hashing, no password policy and no notifier
    pub fn new(store: Arc<dyn AccountStore>, settings: Arc<SecuritySettings>) -> Self {
        Self {
            directory: TenantDirectory::new(store.clone(), settings.clone()),
            store,
            settings,
            hasher: Arc::new(Argon2Hasher),
            policy: None,
            notifier: None,
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn NotificationGateway>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn with_password_policy(mut self, policy: Arc<dyn PasswordPolicy>) -> Self {
        self.policy = Some(policy);
        self
    }

    pub fn with_hasher(mut self, hasher: Arc<dyn PasswordHasher>) -> Self {
        self.hasher = hasher;
        self
    }

    pub fn settings(&self) -> &SecuritySettings {
        &self.settings
    }

    pub fn directory(&self) -> &TenantDirectory {
        &self.directory
    }

    // ----- Queries -----

    /// Open accounts of the tenant
    pub async fn list_accounts(&self, tenant: Option<&str>) -> Result<Vec<Account>> {
        self.directory.list_active(tenant).await
    }

    pub async fn get_by_username(
        &self,
        tenant: Option<&str>,
        username: &str,
    ) -> Result<Option<Account>> {
        self.directory.find_by_username(tenant, username).await
    }

    pub async fn get_by_email(&self, tenant: Option<&str>, email: &str) -> Result<Option<Account>> {
        self.directory.find_by_email(tenant, email).await
    }

    pub async fn get_by_id(&self, id: Uuid) -> Result<Option<Account>> {
        self.directory.find_by_id(id).await
    }

    /// Account holding `key`, unless the key has expired
    pub async fn get_by_verification_key(&self, key: &str) -> Result<Option<Account>> {
        let lifetime = self.settings.verification_key_lifetime();
        let now = Utc::now();

        Ok(self
            .directory
            .find_by_token(key)
            .await?
            .filter(|account| !account.is_token_expired(now, lifetime)))
    }

    pub async fn username_exists(&self, tenant: Option<&str>, username: &str) -> Result<bool> {
        self.directory.username_in_use(tenant, username).await
    }

    pub async fn email_exists(&self, tenant: Option<&str>, email: &str) -> Result<bool> {
        self.directory.email_in_use(tenant, email).await
    }

    // ----- Creation and verification -----

    /// Register a new account
    ///
    /// In email-is-username mode `username` is ignored and the email is used
    /// instead.
    pub async fn create_account(
        &self,
        tenant: Option<&str>,
        username: &str,
        password: &str,
        email: &str,
    ) -> Result<Account> {
        let tenant = self
            .directory
            .resolve_tenant(tenant)
            .ok_or_else(|| AccountError::Validation("Tenant is required.".to_string()))?;
        let username = if self.settings.email_is_username {
            email
        } else {
            username
        };

        info!(tenant = %tenant, username = %username, "Creating account");

        if is_blank(username) {
            return Err(AccountError::Validation("Username is required.".to_string()));
        }
        if is_blank(password) {
            return Err(AccountError::Validation("Password is required.".to_string()));
        }
        if is_blank(email) {
            return Err(AccountError::Validation("Email is required.".to_string()));
        }
        if !validate_username(username) {
            return Err(AccountError::Validation(
                "Username contains invalid characters.".to_string(),
            ));
        }
        self.validate_password(password)?;
        if !validate_email(email) {
            return Err(AccountError::Validation("Email is invalid.".to_string()));
        }

        if self
            .directory
            .username_in_use(Some(&tenant), username)
            .await?
        {
            debug!(tenant = %tenant, username = %username, "username already in use");
            return Err(AccountError::UsernameAlreadyExists);
        }
        if self.directory.email_in_use(Some(&tenant), email).await? {
            debug!(tenant = %tenant, email = %mask_email(email), "email already in use");
            return Err(AccountError::EmailAlreadyExists);
        }

        let password_hash = self.hasher.hash(password)?;
        let account = Account::create(
            &tenant,
            username,
            password_hash,
            email,
            self.settings.require_account_verification,
            Utc::now(),
        );
        let account = self.store.add(&account).await?;

        metrics::inc_accounts_created();
        info!(
            account_id = %account.id,
            tenant = %account.tenant,
            verified = account.is_account_verified,
            "Account created"
        );

        if account.is_account_verified {
            self.notify(Notice::Verified(&account)).await;
        } else {
            self.notify(Notice::Created(&account)).await;
        }

        Ok(account)
    }

    /// Consume a new-account key
    pub async fn verify_account(&self, key: &str) -> Result<bool> {
        info!("Verifying account");

        let Some(mut account) = self.find_by_live_token(key).await? else {
            return Ok(false);
        };

        if !account.verify(key, Utc::now(), self.settings.verification_key_lifetime()) {
            debug!(account_id = %account.id, "verification key rejected");
            return Ok(false);
        }

        let account = self.store.save(&account).await?;
        info!(account_id = %account.id, "Account verified");
        self.notify(Notice::Verified(&account)).await;

        Ok(true)
    }

    /// Let the recipient of a new-account notice undo a registration they did
    /// not make
    pub async fn cancel_new_account(&self, key: &str) -> Result<bool> {
        info!("Cancelling new account");

        let Some(account) = self.find_by_live_token(key).await? else {
            return Ok(false);
        };

        if !account.can_cancel_creation(key, Utc::now(), self.settings.verification_key_lifetime())
        {
            debug!(account_id = %account.id, "account creation cannot be cancelled");
            return Ok(false);
        }

        self.dispose(account).await
    }

    /// Hard delete or soft close according to the deletion policy
    pub async fn delete_account(&self, tenant: Option<&str>, username: &str) -> Result<bool> {
        info!(username = %username, "Deleting account");

        let Some(account) = self.directory.find_by_username(tenant, username).await? else {
            return Ok(false);
        };

        self.dispose(account).await
    }

    // ----- Credentials -----

    /// Check credentials
    ///
    /// The failure counter is committed whatever the outcome.
    pub async fn authenticate(
        &self,
        tenant: Option<&str>,
        username: &str,
        password: &str,
        lockout: Option<LockoutPolicy>,
    ) -> Result<bool> {
        info!(username = %username, "Authenticating");

        if is_blank(password) {
            return Ok(false);
        }
        let Some(mut account) = self.directory.find_by_username(tenant, username).await? else {
            return Ok(false);
        };

        let before = account.clone();
        let outcome = account.authenticate(
            password,
            self.hasher.as_ref(),
            self.lockout(lockout),
            Utc::now(),
        )?;
        let account = self.commit_if_changed(&before, account).await?;
        record_auth_outcome(&account, outcome);

        Ok(outcome.is_success())
    }

    /// Replace the password after re-authenticating with the old one
    pub async fn change_password(
        &self,
        tenant: Option<&str>,
        username: &str,
        old_password: &str,
        new_password: &str,
        lockout: Option<LockoutPolicy>,
    ) -> Result<bool> {
        info!(username = %username, "Changing password");

        if is_blank(old_password) || is_blank(new_password) {
            return Ok(false);
        }
        self.validate_password(new_password)?;

        let Some(mut account) = self.directory.find_by_username(tenant, username).await? else {
            return Ok(false);
        };

        let before = account.clone();
        let new_hash = self.hasher.hash(new_password)?;
        let changed = account.change_password(
            old_password,
            new_hash,
            self.hasher.as_ref(),
            self.lockout(lockout),
            Utc::now(),
        )?;

        if !changed {
            debug!(account_id = %account.id, "old password rejected");
            self.commit_if_changed(&before, account).await?;
            return Ok(false);
        }

        let account = self.store.save(&account).await?;
        info!(account_id = %account.id, "Password changed");
        self.notify(Notice::PasswordChanged(&account)).await;

        Ok(true)
    }

    /// Start a password reset
    ///
    /// An unverified account gets its new-account notice again instead, when
    /// verification is required and a notifier is configured.
    pub async fn reset_password(&self, tenant: Option<&str>, email: &str) -> Result<bool> {
        info!(email = %mask_email(email), "Resetting password");

        let Some(mut account) = self.directory.find_by_email(tenant, email).await? else {
            return Ok(false);
        };
        let now = Utc::now();

        if account.reset_password(now) {
            let account = self.store.save(&account).await?;
            info!(account_id = %account.id, "Password reset key issued");
            self.notify(Notice::PasswordReset(&account)).await;
            return Ok(true);
        }

        if self.settings.require_account_verification
            && self.notifier.is_some()
            && account.renew_account_verification(now)
        {
            let account = self.store.save(&account).await?;
            info!(account_id = %account.id, "Account not verified; resending verification");
            self.notify(Notice::Created(&account)).await;
            return Ok(true);
        }

        debug!(account_id = %account.id, "password reset not available");
        Ok(false)
    }

    /// Complete a password reset with the key from the reset notice
    pub async fn change_password_from_reset_key(
        &self,
        key: &str,
        new_password: &str,
    ) -> Result<bool> {
        info!("Changing password from reset key");

        if is_blank(new_password) {
            return Ok(false);
        }
        let Some(mut account) = self.find_by_live_token(key).await? else {
            return Ok(false);
        };
        self.validate_password(new_password)?;

        let now = Utc::now();
        let lifetime = self.settings.verification_key_lifetime();
        if let Err(reason) = account.check_token(key, TokenPurpose::PasswordReset, now, lifetime) {
            debug!(account_id = %account.id, ?reason, "reset key rejected");
            return Ok(false);
        }

        let new_hash = self.hasher.hash(new_password)?;
        if !account.consume_password_reset(key, new_hash, now, lifetime) {
            return Ok(false);
        }

        let account = self.store.save(&account).await?;
        info!(account_id = %account.id, "Password changed from reset key");
        self.notify(Notice::PasswordChanged(&account)).await;

        Ok(true)
    }

    /// Email the username to the account's address
    pub async fn send_username_reminder(&self, tenant: Option<&str>, email: &str) -> Result<bool> {
        info!(email = %mask_email(email), "Sending username reminder");

        if self.notifier.is_none() {
            debug!("no notifier configured; username reminder skipped");
            return Ok(false);
        }
        let Some(account) = self.directory.find_by_email(tenant, email).await? else {
            return Ok(false);
        };
        if account.is_account_closed {
            return Ok(false);
        }

        self.notify(Notice::UsernameReminder(&account)).await;
        Ok(true)
    }

    // ----- Email change -----

    /// Stage a new address and send it a confirmation key
    pub async fn change_email_request(
        &self,
        tenant: Option<&str>,
        username: &str,
        new_email: &str,
    ) -> Result<bool> {
        info!(username = %username, "Requesting email change");

        if self.settings.email_is_username {
            debug!("email change disabled while email is the username");
            return Ok(false);
        }
        if is_blank(new_email) {
            return Ok(false);
        }
        if !validate_email(new_email) {
            return Err(AccountError::Validation("Email is invalid.".to_string()));
        }

        let Some(mut account) = self.directory.find_by_username(tenant, username).await? else {
            return Ok(false);
        };
        if account.email.eq_ignore_ascii_case(new_email) {
            return Ok(false);
        }
        if self
            .directory
            .email_in_use(Some(&account.tenant), new_email)
            .await?
        {
            return Err(AccountError::EmailAlreadyExists);
        }

        if !account.request_email_change(
            new_email,
            self.settings.email_is_username,
            Utc::now(),
        ) {
            debug!(account_id = %account.id, "email change not available");
            return Ok(false);
        }

        let account = self.store.save(&account).await?;
        info!(account_id = %account.id, "Email change key issued");
        self.notify(Notice::EmailChangeRequested(&account, new_email))
            .await;

        Ok(true)
    }

    /// Confirm a staged address
    ///
    /// The password is checked like a login and its outcome committed before
    /// the change itself.
    pub async fn change_email_from_key(
        &self,
        password: &str,
        key: &str,
        new_email: &str,
        lockout: Option<LockoutPolicy>,
    ) -> Result<bool> {
        info!("Changing email from key");

        if is_blank(password) || is_blank(new_email) {
            return Ok(false);
        }
        let Some(mut account) = self.find_by_live_token(key).await? else {
            return Ok(false);
        };

        let lifetime = self.settings.verification_key_lifetime();
        if let Err(reason) =
            account.check_token(key, TokenPurpose::EmailChange, Utc::now(), lifetime)
        {
            debug!(account_id = %account.id, ?reason, "email change key rejected");
            return Ok(false);
        }

        let before = account.clone();
        let outcome = account.authenticate(
            password,
            self.hasher.as_ref(),
            self.lockout(lockout),
            Utc::now(),
        )?;
        let mut account = self.commit_if_changed(&before, account).await?;
        record_auth_outcome(&account, outcome);
        if !outcome.is_success() {
            return Ok(false);
        }

        if self
            .directory
            .email_in_use(Some(&account.tenant), new_email)
            .await?
        {
            return Err(AccountError::EmailAlreadyExists);
        }

        let old_email = account.email.clone();
        if !account.confirm_email_change(key, new_email, Utc::now(), lifetime) {
            debug!(account_id = %account.id, "email change confirmation rejected");
            return Ok(false);
        }

        let account = self.store.save(&account).await?;
        info!(account_id = %account.id, "Email changed");
        self.notify(Notice::EmailChanged(&account, &old_email)).await;

        Ok(true)
    }

    // ----- Helpers -----

    fn lockout(&self, requested: Option<LockoutPolicy>) -> LockoutPolicy {
        requested.unwrap_or_else(|| {
            LockoutPolicy::new(
                self.settings.account_lockout_failed_login_attempts,
                self.settings.lockout_window(),
            )
        })
    }

    fn validate_password(&self, password: &str) -> Result<()> {
        match &self.policy {
            Some(policy) => policy.validate(password).map_err(AccountError::Validation),
            None => Ok(()),
        }
    }

    /// Lookup by key where an expired key counts as a miss
    ///
    /// An expired email-change key is discarded together with its staged
    /// address.
    async fn find_by_live_token(&self, key: &str) -> Result<Option<Account>> {
        let Some(mut account) = self.directory.find_by_token(key).await? else {
            return Ok(None);
        };

        let now = Utc::now();
        let lifetime = self.settings.verification_key_lifetime();
        if !account.is_token_expired(now, lifetime) {
            return Ok(Some(account));
        }

        debug!(account_id = %account.id, "verification key expired");
        if account.pending_purpose() == Some(TokenPurpose::EmailChange)
            && account.discard_expired_token(now, lifetime)
        {
            self.store.save(&account).await?;
        }

        Ok(None)
    }

    async fn commit_if_changed(&self, before: &Account, after: Account) -> Result<Account> {
        if *before == after {
            return Ok(after);
        }
        self.store.save(&after).await
    }

    async fn dispose(&self, mut account: Account) -> Result<bool> {
        match deletion_disposition(
            self.settings.allow_account_deletion,
            account.is_account_verified,
        ) {
            Disposition::HardDelete => {
                if !self.store.remove(account.id).await? {
                    return Ok(false);
                }
                info!(account_id = %account.id, "Account record removed");
            }
            Disposition::SoftClose => {
                if !account.close() {
                    debug!(account_id = %account.id, "account already closed");
                    return Ok(false);
                }
                account = self.store.save(&account).await?;
                info!(account_id = %account.id, "Account closed");
            }
        }

        self.notify(Notice::Deleted(&account)).await;
        Ok(true)
    }

    /// Phase two: the state change is already durable
    async fn notify(&self, notice: Notice<'_>) {
        let Some(notifier) = &self.notifier else {
            return;
        };

        let result = match &notice {
            Notice::Created(a) => notifier.send_account_created(a).await,
            Notice::Verified(a) => notifier.send_account_verified(a).await,
            Notice::Deleted(a) => notifier.send_account_deleted(a).await,
            Notice::PasswordChanged(a) => notifier.send_password_changed(a).await,
            Notice::PasswordReset(a) => notifier.send_password_reset(a).await,
            Notice::UsernameReminder(a) => notifier.send_username_reminder(a).await,
            Notice::EmailChangeRequested(a, new_email) => {
                notifier.send_email_change_requested(a, new_email).await
            }
            Notice::EmailChanged(a, old_email) => notifier.send_email_changed(a, old_email).await,
        };

        if let Err(e) = result {
            metrics::inc_notification_failures();
            warn!(
                account_id = %notice.account().id,
                notice = notice.kind(),
                error = %e,
                "Notification failed after commit"
            );
        }
    }
}

fn record_auth_outcome(account: &Account, outcome: AuthOutcome) {
    match outcome {
        AuthOutcome::Authenticated => {
            info!(account_id = %account.id, "Authentication succeeded");
        }
        AuthOutcome::LockoutTriggered => {
            metrics::inc_login_failures();
            metrics::inc_account_lockouts();
            warn!(
                account_id = %account.id,
                failed_login_count = account.failed_login_count,
                "Account locked after repeated failures"
            );
        }
        other => {
            metrics::inc_login_failures();
            debug!(account_id = %account.id, outcome = ?other, "Authentication failed");
        }
    }
}
