/// Outbound account notices
///
/// Gateways are invoked only after the state change they describe has been
/// committed. Their errors are logged and counted by the caller, never
/// propagated.
use crate::domain::Account;
use crate::error::Result;
use async_trait::async_trait;
use tracing::debug;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NotificationGateway: Send + Sync {
    /// Carries the new-account key when verification is required
    async fn send_account_created(&self, account: &Account) -> Result<()>;

    async fn send_account_verified(&self, account: &Account) -> Result<()>;

    async fn send_account_deleted(&self, account: &Account) -> Result<()>;

    async fn send_password_changed(&self, account: &Account) -> Result<()>;

    /// Carries the password-reset key
    async fn send_password_reset(&self, account: &Account) -> Result<()>;

    async fn send_username_reminder(&self, account: &Account) -> Result<()>;

    /// Sent to the pending address with the email-change key
    async fn send_email_change_requested(&self, account: &Account, new_email: &str) -> Result<()>;

    /// Sent to the previous address once the change is confirmed
    async fn send_email_changed(&self, account: &Account, old_email: &str) -> Result<()>;
}

/// Gateway that drops every notice
#[derive(Debug, Clone, Default)]
pub struct NoopNotifier;

#[async_trait]
impl NotificationGateway for NoopNotifier {
    async fn send_account_created(&self, account: &Account) -> Result<()> {
        debug!(account_id = %account.id, "noop notifier: account created");
        Ok(())
    }

    async fn send_account_verified(&self, account: &Account) -> Result<()> {
        debug!(account_id = %account.id, "noop notifier: account verified");
        Ok(())
    }

    async fn send_account_deleted(&self, account: &Account) -> Result<()> {
        debug!(account_id = %account.id, "noop notifier: account deleted");
        Ok(())
    }

    async fn send_password_changed(&self, account: &Account) -> Result<()> {
        debug!(account_id = %account.id, "noop notifier: password changed");
        Ok(())
    }

    async fn send_password_reset(&self, account: &Account) -> Result<()> {
        debug!(account_id = %account.id, "noop notifier: password reset");
        Ok(())
    }

    async fn send_username_reminder(&self, account: &Account) -> Result<()> {
        debug!(account_id = %account.id, "noop notifier: username reminder");
        Ok(())
    }

    async fn send_email_change_requested(&self, account: &Account, _new_email: &str) -> Result<()> {
        debug!(account_id = %account.id, "noop notifier: email change requested");
        Ok(())
    }

    async fn send_email_changed(&self, account: &Account, _old_email: &str) -> Result<()> {
        debug!(account_id = %account.id, "noop notifier: email changed");
        Ok(())
    }
}
