/// Account Service Main Entry Point
///
/// Prepares the account database and reports the configured lifecycle policy:
/// - Loads settings from the environment
/// - Connects the PostgreSQL pool and runs migrations
/// - Wires the account service with SMTP notices and password strength rules
use account_service::{
    config::Settings,
    db::{run_migrations, PgAccountStore},
    security::StrengthPolicy,
    services::{AccountService, EmailNotifier},
    telemetry::{init_tracing, DEFAULT_LOG_FILTER},
};
use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing(DEFAULT_LOG_FILTER)?;

    info!("Starting Account Service");

    let settings = Settings::load().context("Failed to load configuration")?;
    info!(
        multi_tenant = settings.security.multi_tenant,
        default_tenant = %settings.security.default_tenant,
        require_verification = settings.security.require_account_verification,
        lockout_attempts = settings.security.account_lockout_failed_login_attempts,
        "Configuration loaded successfully"
    );

    let store = PgAccountStore::connect(&settings.database)
        .await
        .context("Failed to connect to PostgreSQL")?
        .with_global_usernames(settings.security.usernames_unique_across_tenants);
    run_migrations(store.pool())
        .await
        .context("Failed to run database migrations")?;

    let notifier = EmailNotifier::new(&settings.email).context("Failed to configure email")?;
    info!(smtp_enabled = notifier.is_enabled(), "Email notifier initialized");

    let service = AccountService::new(Arc::new(store), Arc::new(settings.security))
        .with_notifier(Arc::new(notifier))
        .with_password_policy(Arc::new(StrengthPolicy::default()));

    let active = service
        .list_accounts(None)
        .await
        .context("Failed to list accounts")?;
    info!(active_accounts = active.len(), "Account service ready");

    Ok(())
}
