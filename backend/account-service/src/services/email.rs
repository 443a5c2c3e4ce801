/// SMTP notification gateway
use super::notification::NotificationGateway;
use crate::config::EmailSettings;
use crate::domain::Account;
use crate::error::{AccountError, Result};
use crate::validators::mask_email;
use async_trait::async_trait;
use lettre::message::{header, Mailbox, Message};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Tokio1Executor};
use std::sync::Arc;
use tracing::{info, warn};

const DEFAULT_VERIFICATION_URL: &str = "https://app.nova.dev/verify-account";
const DEFAULT_PASSWORD_RESET_URL: &str = "https://app.nova.dev/reset-password";
const DEFAULT_EMAIL_CHANGE_URL: &str = "https://app.nova.dev/confirm-email";

#[derive(Debug, Clone, PartialEq, Eq)]
struct Mail {
    to: String,
    subject: &'static str,
    body: String,
}

/// Account notices delivered as plain text email
///
/// Without an SMTP host the notifier runs in no-op mode and only logs.
#[derive(Clone)]
pub struct EmailNotifier {
    transport: Option<Arc<AsyncSmtpTransport<Tokio1Executor>>>,
    from: Mailbox,
    verification_base_url: Option<String>,
    password_reset_base_url: Option<String>,
    email_change_base_url: Option<String>,
}

impl EmailNotifier {
    pub fn new(config: &EmailSettings) -> Result<Self> {
        let from = config
            .smtp_from
            .parse::<Mailbox>()
            .map_err(|e| AccountError::Internal(format!("Invalid SMTP_FROM address: {}", e)))?;

        let transport = if config.smtp_host.trim().is_empty() {
            warn!("SMTP host not configured; account notices will only be logged");
            None
        } else {
            let builder = if config.use_starttls {
                AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_host)
            } else {
                AsyncSmtpTransport::<Tokio1Executor>::relay(&config.smtp_host)
            }
            .map_err(|e| {
                AccountError::Internal(format!("Failed to configure SMTP transport: {}", e))
            })?
            .port(config.smtp_port);

            let builder = match (&config.smtp_username, &config.smtp_password) {
                (Some(username), Some(password)) => {
                    builder.credentials(Credentials::new(username.clone(), password.clone()))
                }
                _ => builder,
            };

            Some(Arc::new(builder.build()))
        };

        Ok(Self {
            transport,
            from,
            verification_base_url: config.verification_base_url.clone(),
            password_reset_base_url: config.password_reset_base_url.clone(),
            email_change_base_url: config.email_change_base_url.clone(),
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.transport.is_some()
    }

    fn link(base: &Option<String>, fallback: &str, key: &str) -> String {
        match base {
            Some(base) if !base.is_empty() => format!("{base}?key={key}"),
            _ => format!("{fallback}?key={key}"),
        }
    }

    fn pending_key(account: &Account) -> &str {
        account.verification_key().unwrap_or_default()
    }

    fn account_created_mail(&self, account: &Account) -> Mail {
        let body = if account.is_account_verified {
            format!(
                "Welcome, {}!\n\nYour account has been created.",
                account.username
            )
        } else {
            let link = Self::link(
                &self.verification_base_url,
                DEFAULT_VERIFICATION_URL,
                Self::pending_key(account),
            );
            format!(
                "Welcome, {}!\n\nPlease open the following link to verify your account:\n{}\n\nIf you did not create this account, the same link lets you cancel it.",
                account.username, link
            )
        };

        Mail {
            to: account.email.clone(),
            subject: "Your new account",
            body,
        }
    }

    fn account_verified_mail(&self, account: &Account) -> Mail {
        Mail {
            to: account.email.clone(),
            subject: "Account verified",
            body: format!(
                "Hello {},\n\nYour account is verified and ready to use.",
                account.username
            ),
        }
    }

    fn account_deleted_mail(&self, account: &Account) -> Mail {
        Mail {
            to: account.email.clone(),
            subject: "Account closed",
            body: format!(
                "Hello {},\n\nYour account has been closed. If you did not request this, please contact support.",
                account.username
            ),
        }
    }

    fn password_changed_mail(&self, account: &Account) -> Mail {
        Mail {
            to: account.email.clone(),
            subject: "Password changed",
            body: format!(
                "Hello {},\n\nYour password was changed. If you did not do this, reset your password immediately.",
                account.username
            ),
        }
    }

    fn password_reset_mail(&self, account: &Account) -> Mail {
        let link = Self::link(
            &self.password_reset_base_url,
            DEFAULT_PASSWORD_RESET_URL,
            Self::pending_key(account),
        );
        Mail {
            to: account.email.clone(),
            subject: "Password reset",
            body: format!(
                "We received a password reset request.\n\nPlease open the following link to choose a new password:\n{}\n\nIf you did not request this, please ignore this email.",
                link
            ),
        }
    }

    fn username_reminder_mail(&self, account: &Account) -> Mail {
        Mail {
            to: account.email.clone(),
            subject: "Your username",
            body: format!("Your username is: {}", account.username),
        }
    }

    fn email_change_requested_mail(&self, account: &Account, new_email: &str) -> Mail {
        let link = Self::link(
            &self.email_change_base_url,
            DEFAULT_EMAIL_CHANGE_URL,
            Self::pending_key(account),
        );
        Mail {
            to: new_email.to_string(),
            subject: "Confirm your new email address",
            body: format!(
                "Hello {},\n\nPlease open the following link to confirm this address:\n{}\n\nYou will be asked for your password.",
                account.username, link
            ),
        }
    }

    fn email_changed_mail(&self, account: &Account, old_email: &str) -> Mail {
        Mail {
            to: old_email.to_string(),
            subject: "Email address changed",
            body: format!(
                "Hello {},\n\nThe email address on your account was changed to {}.",
                account.username,
                mask_email(&account.email)
            ),
        }
    }

    async fn deliver(&self, mail: Mail) -> Result<()> {
        let Some(transport) = &self.transport else {
            info!(
                subject = mail.subject,
                recipient = %mask_email(&mail.to),
                "Email notifier running in no-op mode; skipping actual send"
            );
            return Ok(());
        };

        let to = mail.to.parse::<Mailbox>().map_err(|e| {
            AccountError::Notification(format!("Invalid recipient email address: {}", e))
        })?;

        let message = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(mail.subject)
            .header(header::ContentType::TEXT_PLAIN)
            .body(mail.body)?;

        transport
            .send(message)
            .await
            .map_err(|e| AccountError::Notification(format!("Failed to send email: {}", e)))?;

        info!(subject = mail.subject, "email sent successfully");
        Ok(())
    }
}

#[async_trait]
impl NotificationGateway for EmailNotifier {
    async fn send_account_created(&self, account: &Account) -> Result<()> {
        self.deliver(self.account_created_mail(account)).await
    }

    async fn send_account_verified(&self, account: &Account) -> Result<()> {
        self.deliver(self.account_verified_mail(account)).await
    }

    async fn send_account_deleted(&self, account: &Account) -> Result<()> {
        self.deliver(self.account_deleted_mail(account)).await
    }

    async fn send_password_changed(&self, account: &Account) -> Result<()> {
        self.deliver(self.password_changed_mail(account)).await
    }

    async fn send_password_reset(&self, account: &Account) -> Result<()> {
        self.deliver(self.password_reset_mail(account)).await
    }

    async fn send_username_reminder(&self, account: &Account) -> Result<()> {
        self.deliver(self.username_reminder_mail(account)).await
    }

    async fn send_email_change_requested(&self, account: &Account, new_email: &str) -> Result<()> {
        self.deliver(self.email_change_requested_mail(account, new_email))
            .await
    }

    async fn send_email_changed(&self, account: &Account, old_email: &str) -> Result<()> {
        self.deliver(self.email_changed_mail(account, old_email))
            .await
    }
}
