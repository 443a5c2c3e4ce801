/// Account Service Library
///
/// Account lifecycle management: registration, verification, authentication
/// with lockout, password reset and email change, for one or many tenants.
///
/// ## Modules
///
/// - `config`: Service configuration
/// - `db`: Account store trait with in-memory and PostgreSQL adapters
/// - `directory`: Tenant-scoped lookups and uniqueness checks
/// - `domain`: Account aggregate and verification tokens
/// - `error`: Error types
/// - `metrics`: Prometheus counters
/// - `security`: Password hashing and strength policies
/// - `services`: Lifecycle orchestration and notification gateways
/// - `telemetry`: Log subscriber setup
/// - `validators`: Input validation
pub mod config;
pub mod db;
pub mod directory;
pub mod domain;
pub mod error;
pub mod metrics;
pub mod security;
pub mod services;
pub mod telemetry;
pub mod validators;

// Re-export commonly used types
pub use config::SecuritySettings;
pub use db::{AccountStore, InMemoryAccountStore, PgAccountStore};
pub use directory::TenantDirectory;
pub use domain::{Account, LockoutPolicy, TokenPurpose};
pub use error::{AccountError, Result};
pub use services::{AccountService, EmailNotifier, NoopNotifier, NotificationGateway};
