use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::token::{TokenPurpose, TokenRejection, VerificationToken};
use crate::error::Result;
use crate::security::PasswordHasher;

/// Lockout options for credential checks
///
/// `max_failures == 0` disables lockout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockoutPolicy {
    pub max_failures: u32,
    pub window: Duration,
}

impl LockoutPolicy {
    pub fn new(max_failures: u32, window: Duration) -> Self {
        Self {
            max_failures,
            window,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.max_failures > 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleStage {
    Unverified,
    Verified,
    Closed,
}

/// Result of a credential check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthOutcome {
    Authenticated,
    InvalidCredentials,
    /// This failure reached the threshold and disabled login
    LockoutTriggered,
    /// Rejected without checking the password
    LockedOut,
    Unverified,
    Closed,
}

impl AuthOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, AuthOutcome::Authenticated)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    HardDelete,
    SoftClose,
}

/// Records are removed when deletion is allowed or the account never verified;
/// otherwise they are retained and closed.
pub fn deletion_disposition(deletion_allowed: bool, is_account_verified: bool) -> Disposition {
    if deletion_allowed || !is_account_verified {
        Disposition::HardDelete
    } else {
        Disposition::SoftClose
    }
}

/// Account aggregate root
///
/// Every transition is computed in memory against one snapshot; the caller
/// persists the whole record afterwards. Closed accounts reject every
/// transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: Uuid,
    pub tenant: String,
    pub username: String,
    pub email: String,
    pub password_hash: String,

    pub is_account_verified: bool,
    pub is_login_allowed: bool,
    pub is_account_closed: bool,

    pub failed_login_count: u32,
    pub last_failed_login_at: Option<DateTime<Utc>>,
    pub last_login_at: Option<DateTime<Utc>>,
    pub password_changed_at: Option<DateTime<Utc>>,

    pub unconfirmed_email: Option<String>,
    pub verification: Option<VerificationToken>,

    pub created_at: DateTime<Utc>,
    /// Optimistic concurrency stamp, bumped by the store on commit
    pub version: i64,
}

impl Account {
    /// Create a new account
    ///
    /// Without required verification the account starts verified and no key
    /// is issued.
    pub fn create(
        tenant: &str,
        username: &str,
        password_hash: String,
        email: &str,
        require_verification: bool,
        now: DateTime<Utc>,
    ) -> Self {
        let mut account = Self {
            id: Uuid::new_v4(),
            tenant: tenant.to_string(),
            username: username.to_string(),
            email: email.to_string(),
            password_hash,
            is_account_verified: !require_verification,
            is_login_allowed: true,
            is_account_closed: false,
            failed_login_count: 0,
            last_failed_login_at: None,
            last_login_at: None,
            password_changed_at: None,
            unconfirmed_email: None,
            verification: None,
            created_at: now,
            version: 0,
        };

        if require_verification {
            account.issue_token(TokenPurpose::NewAccount, now);
        }

        account
    }

    pub fn stage(&self) -> LifecycleStage {
        if self.is_account_closed {
            LifecycleStage::Closed
        } else if self.is_account_verified {
            LifecycleStage::Verified
        } else {
            LifecycleStage::Unverified
        }
    }

    pub fn verification_key(&self) -> Option<&str> {
        self.verification.as_ref().map(|t| t.value.as_str())
    }

    pub fn pending_purpose(&self) -> Option<TokenPurpose> {
        self.verification.as_ref().map(|t| t.purpose)
    }

    pub fn is_token_expired(&self, now: DateTime<Utc>, lifetime: Duration) -> bool {
        self.verification
            .as_ref()
            .map(|t| t.is_expired(now, lifetime))
            .unwrap_or(false)
    }

    /// Check a presented key against the pending one
    pub fn check_token(
        &self,
        key: &str,
        purpose: TokenPurpose,
        now: DateTime<Utc>,
        lifetime: Duration,
    ) -> std::result::Result<(), TokenRejection> {
        if self.is_account_closed {
            return Err(TokenRejection::AccountClosed);
        }

        let token = self.verification.as_ref().ok_or(TokenRejection::Missing)?;

        if token.value != key {
            return Err(TokenRejection::Mismatch);
        }
        if token.purpose != purpose {
            return Err(TokenRejection::WrongPurpose);
        }
        if token.is_expired(now, lifetime) {
            return Err(TokenRejection::Expired);
        }

        Ok(())
    }

    /// Consume a new-account key
    pub fn verify(&mut self, key: &str, now: DateTime<Utc>, lifetime: Duration) -> bool {
        if self
            .check_token(key, TokenPurpose::NewAccount, now, lifetime)
            .is_err()
        {
            return false;
        }

        self.is_account_verified = true;
        self.clear_token();
        true
    }

    pub fn can_cancel_creation(&self, key: &str, now: DateTime<Utc>, lifetime: Duration) -> bool {
        !self.is_account_verified
            && self
                .check_token(key, TokenPurpose::NewAccount, now, lifetime)
                .is_ok()
    }

    /// Locked while the threshold is met and the most recent failure is
    /// younger than the window
    pub fn is_locked_out(&self, lockout: LockoutPolicy, now: DateTime<Utc>) -> bool {
        if !lockout.is_enabled() || self.failed_login_count < lockout.max_failures {
            return false;
        }

        self.last_failed_login_at
            .map(|at| now - at < lockout.window)
            .unwrap_or(false)
    }

    /// Check credentials and update the failure counter
    pub fn authenticate(
        &mut self,
        password: &str,
        hasher: &dyn PasswordHasher,
        lockout: LockoutPolicy,
        now: DateTime<Utc>,
    ) -> Result<AuthOutcome> {
        if self.is_account_closed {
            return Ok(AuthOutcome::Closed);
        }
        if !self.is_account_verified {
            return Ok(AuthOutcome::Unverified);
        }

        if self.is_locked_out(lockout, now) {
            // Counted, but the window keeps running from the last real failure
            self.failed_login_count = self.failed_login_count.saturating_add(1);
            self.is_login_allowed = false;
            return Ok(AuthOutcome::LockedOut);
        }

        // Window elapsed since the lockout was triggered
        if !self.is_login_allowed {
            self.is_login_allowed = true;
        }

        if hasher.verify(password, &self.password_hash)? {
            self.failed_login_count = 0;
            self.last_login_at = Some(now);
            return Ok(AuthOutcome::Authenticated);
        }

        let recent_failure = self
            .last_failed_login_at
            .map(|at| now - at < lockout.window)
            .unwrap_or(false);

        self.failed_login_count = if recent_failure {
            self.failed_login_count.saturating_add(1)
        } else {
            1
        };
        self.last_failed_login_at = Some(now);

        if lockout.is_enabled() && self.failed_login_count >= lockout.max_failures {
            self.is_login_allowed = false;
            return Ok(AuthOutcome::LockoutTriggered);
        }

        Ok(AuthOutcome::InvalidCredentials)
    }

    /// Re-authenticate with the old password, then replace the hash
    pub fn change_password(
        &mut self,
        old_password: &str,
        new_password_hash: String,
        hasher: &dyn PasswordHasher,
        lockout: LockoutPolicy,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        if !self.authenticate(old_password, hasher, lockout, now)?.is_success() {
            return Ok(false);
        }

        self.password_hash = new_password_hash;
        self.password_changed_at = Some(now);
        self.failed_login_count = 0;

        if self.pending_purpose() == Some(TokenPurpose::PasswordReset) {
            self.clear_token();
        }

        Ok(true)
    }

    /// Issue a password-reset key, superseding any pending key
    pub fn reset_password(&mut self, now: DateTime<Utc>) -> bool {
        if self.is_account_closed || !self.is_account_verified {
            return false;
        }

        self.issue_token(TokenPurpose::PasswordReset, now);
        true
    }

    /// Fresh new-account key for resending the verification notice
    pub fn renew_account_verification(&mut self, now: DateTime<Utc>) -> bool {
        if self.is_account_closed || self.is_account_verified {
            return false;
        }

        self.issue_token(TokenPurpose::NewAccount, now);
        true
    }

    pub fn consume_password_reset(
        &mut self,
        key: &str,
        new_password_hash: String,
        now: DateTime<Utc>,
        lifetime: Duration,
    ) -> bool {
        if self
            .check_token(key, TokenPurpose::PasswordReset, now, lifetime)
            .is_err()
        {
            return false;
        }

        self.password_hash = new_password_hash;
        self.password_changed_at = Some(now);
        self.failed_login_count = 0;
        self.last_failed_login_at = None;
        self.is_login_allowed = true;
        self.clear_token();
        true
    }

    /// Stage `new_email` and issue an email-change key
    pub fn request_email_change(
        &mut self,
        new_email: &str,
        email_is_username: bool,
        now: DateTime<Utc>,
    ) -> bool {
        // Email doubles as the login identity in that mode
        if email_is_username {
            return false;
        }
        if self.is_account_closed || !self.is_account_verified {
            return false;
        }
        if new_email.trim().is_empty() || new_email.eq_ignore_ascii_case(&self.email) {
            return false;
        }

        self.issue_token(TokenPurpose::EmailChange, now);
        self.unconfirmed_email = Some(new_email.to_string());
        true
    }

    /// Promote the staged email
    pub fn confirm_email_change(
        &mut self,
        key: &str,
        new_email: &str,
        now: DateTime<Utc>,
        lifetime: Duration,
    ) -> bool {
        if self
            .check_token(key, TokenPurpose::EmailChange, now, lifetime)
            .is_err()
        {
            return false;
        }

        match self.unconfirmed_email.take() {
            // The requested spelling is kept
            Some(pending) if pending.eq_ignore_ascii_case(new_email) => {
                self.email = pending;
                self.clear_token();
                true
            }
            other => {
                self.unconfirmed_email = other;
                false
            }
        }
    }

    /// Soft close: retained, login disabled
    pub fn close(&mut self) -> bool {
        if self.is_account_closed {
            return false;
        }

        self.is_login_allowed = false;
        self.is_account_closed = true;
        self.clear_token();
        true
    }

    pub fn discard_expired_token(&mut self, now: DateTime<Utc>, lifetime: Duration) -> bool {
        if !self.is_token_expired(now, lifetime) {
            return false;
        }

        self.clear_token();
        true
    }

    fn issue_token(&mut self, purpose: TokenPurpose, now: DateTime<Utc>) {
        self.clear_token();
        self.verification = Some(VerificationToken::issue(purpose, now));
    }

    /// A staged email only lives as long as its key
    fn clear_token(&mut self) {
        self.verification = None;
        self.unconfirmed_email = None;
    }
}
