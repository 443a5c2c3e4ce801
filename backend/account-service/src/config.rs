//! Configuration management for Account Service
//!
//! Loads settings from:
//! 1. Environment variables
//! 2. .env file (local development)
//!
//! The security settings are read once and injected into
//! [`AccountService`](crate::services::AccountService) as an immutable value.
//!
//! # Example
//!
//! ```no_run
//! use account_service::config::Settings;
//!
//! fn main() -> anyhow::Result<()> {
//!     let settings = Settings::load()?;
//!     println!("Default tenant: {}", settings.security.default_tenant);
//!     Ok(())
//! }
//! ```

use anyhow::{Context, Result};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::env;
use tracing::info;

/// Application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub security: SecuritySettings,
    pub database: DatabaseSettings,
    pub email: EmailSettings,
}

impl Settings {
    /// Load settings from environment variables
    pub fn load() -> Result<Self> {
        // Load .env file in development
        if cfg!(debug_assertions) {
            dotenvy::dotenv().ok();
            info!("Loaded .env file for development");
        }

        Ok(Settings {
            security: SecuritySettings::from_env()?,
            database: DatabaseSettings::from_env()?,
            email: EmailSettings::from_env()?,
        })
    }
}

/// Account lifecycle policy switches
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecuritySettings {
    /// When false every operation runs against `default_tenant`
    pub multi_tenant: bool,
    pub default_tenant: String,
    /// Username is forced to the email address and becomes immutable
    pub email_is_username: bool,
    pub usernames_unique_across_tenants: bool,
    /// Verified accounts are hard-deleted instead of closed
    pub allow_account_deletion: bool,
    pub require_account_verification: bool,
    pub account_lockout_failed_login_attempts: u32,
    pub account_lockout_duration_secs: u64,
    pub verification_key_lifetime_secs: u64,
}

impl Default for SecuritySettings {
    fn default() -> Self {
        Self {
            multi_tenant: false,
            default_tenant: "default".to_string(),
            email_is_username: false,
            usernames_unique_across_tenants: false,
            allow_account_deletion: true,
            require_account_verification: true,
            account_lockout_failed_login_attempts: 10,
            account_lockout_duration_secs: 300,
            verification_key_lifetime_secs: 3600,
        }
    }
}

impl SecuritySettings {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        Ok(Self {
            multi_tenant: bool_var("ACCOUNT_MULTI_TENANT", defaults.multi_tenant)?,
            default_tenant: env::var("ACCOUNT_DEFAULT_TENANT")
                .unwrap_or(defaults.default_tenant),
            email_is_username: bool_var("ACCOUNT_EMAIL_IS_USERNAME", defaults.email_is_username)?,
            usernames_unique_across_tenants: bool_var(
                "ACCOUNT_USERNAMES_UNIQUE_ACROSS_TENANTS",
                defaults.usernames_unique_across_tenants,
            )?,
            allow_account_deletion: bool_var(
                "ACCOUNT_ALLOW_DELETION",
                defaults.allow_account_deletion,
            )?,
            require_account_verification: bool_var(
                "ACCOUNT_REQUIRE_VERIFICATION",
                defaults.require_account_verification,
            )?,
            account_lockout_failed_login_attempts: env::var("ACCOUNT_LOCKOUT_FAILED_ATTEMPTS")
                .unwrap_or_else(|_| defaults.account_lockout_failed_login_attempts.to_string())
                .parse()
                .context("Invalid ACCOUNT_LOCKOUT_FAILED_ATTEMPTS")?,
            account_lockout_duration_secs: secs_var(
                "ACCOUNT_LOCKOUT_DURATION_SECS",
                defaults.account_lockout_duration_secs,
            )?,
            verification_key_lifetime_secs: secs_var(
                "ACCOUNT_VERIFICATION_KEY_LIFETIME_SECS",
                defaults.verification_key_lifetime_secs,
            )?,
        })
    }

    /// Clamped to [`MAX_DURATION_SECS`] for hand-built settings
    pub fn lockout_window(&self) -> Duration {
        clamped_seconds(self.account_lockout_duration_secs)
    }

    pub fn verification_key_lifetime(&self) -> Duration {
        clamped_seconds(self.verification_key_lifetime_secs)
    }
}

/// Database connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSettings {
    pub url: Option<String>,
    pub max_connections: u32,
    pub acquire_timeout: u64,
}

impl DatabaseSettings {
    fn from_env() -> Result<Self> {
        Ok(Self {
            url: env::var("DATABASE_URL").ok(),
            max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "20".to_string())
                .parse()
                .context("Invalid DATABASE_MAX_CONNECTIONS")?,
            acquire_timeout: env::var("DATABASE_ACQUIRE_TIMEOUT")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .context("Invalid DATABASE_ACQUIRE_TIMEOUT")?,
        })
    }
}

/// Email notification configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailSettings {
    pub smtp_host: String,
    pub smtp_port: u16,
    pub smtp_username: Option<String>,
    pub smtp_password: Option<String>,
    pub smtp_from: String,
    pub use_starttls: bool,
    pub verification_base_url: Option<String>,
    pub password_reset_base_url: Option<String>,
    pub email_change_base_url: Option<String>,
}

impl Default for EmailSettings {
    fn default() -> Self {
        Self {
            smtp_host: String::new(),
            smtp_port: 1025,
            smtp_username: None,
            smtp_password: None,
            smtp_from: "noreply@nova.dev".to_string(),
            use_starttls: false,
            verification_base_url: None,
            password_reset_base_url: None,
            email_change_base_url: None,
        }
    }
}

impl EmailSettings {
    fn from_env() -> Result<Self> {
        Ok(Self {
            smtp_host: env::var("SMTP_HOST").unwrap_or_default(),
            smtp_port: env::var("SMTP_PORT")
                .unwrap_or_else(|_| "1025".to_string())
                .parse()
                .context("Invalid SMTP_PORT")?,
            smtp_username: env::var("SMTP_USERNAME").ok(),
            smtp_password: env::var("SMTP_PASSWORD").ok(),
            smtp_from: env::var("SMTP_FROM").unwrap_or_else(|_| "noreply@nova.dev".to_string()),
            use_starttls: env::var("SMTP_USE_STARTTLS")
                .unwrap_or_else(|_| "false".to_string())
                .parse()
                .unwrap_or(false),
            verification_base_url: env::var("ACCOUNT_VERIFICATION_BASE_URL").ok(),
            password_reset_base_url: env::var("ACCOUNT_PASSWORD_RESET_BASE_URL").ok(),
            email_change_base_url: env::var("ACCOUNT_EMAIL_CHANGE_BASE_URL").ok(),
        })
    }
}

/// Longest lockout window or key lifetime accepted (ten years)
pub const MAX_DURATION_SECS: u64 = 10 * 365 * 24 * 60 * 60;

fn clamped_seconds(secs: u64) -> Duration {
    Duration::seconds(secs.min(MAX_DURATION_SECS) as i64)
}

fn secs_var(name: &str, default: u64) -> Result<u64> {
    let secs: u64 = match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("Invalid {name}"))?,
        Err(_) => default,
    };
    anyhow::ensure!(
        secs <= MAX_DURATION_SECS,
        "Invalid {name}: {secs} exceeds {MAX_DURATION_SECS} seconds"
    );
    Ok(secs)
}

fn bool_var(name: &str, default: bool) -> Result<bool> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("Invalid {name}")),
        Err(_) => Ok(default),
    }
}
