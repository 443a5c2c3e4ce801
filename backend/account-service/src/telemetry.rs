use anyhow::{anyhow, Result};
use tracing_subscriber::EnvFilter;

pub const DEFAULT_LOG_FILTER: &str = "account_service=info,info";

/// Install the JSON log subscriber
///
/// `RUST_LOG` wins over `default_filter`. Fails if a global subscriber is
/// already installed.
pub fn init_tracing(default_filter: &str) -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .json()
        .try_init()
        .map_err(|e| anyhow!("Failed to initialize tracing: {}", e))
}
