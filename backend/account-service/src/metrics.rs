use once_cell::sync::Lazy;
use prometheus::{Encoder, IntCounter, TextEncoder};

/// Create and register a counter on the default registry.
///
/// Registration failures (e.g. a duplicate name) still hand back a usable
/// counter.
fn register_counter(name: &str, help: &str) -> IntCounter {
    match IntCounter::new(name, help) {
        Ok(counter) => {
            let _ = prometheus::default_registry().register(Box::new(counter.clone()));
            counter
        }
        Err(e) => {
            tracing::error!("failed to create counter {}: {}", name, e);
            // Unregistered fallback
            IntCounter::new("dummy", "dummy").expect("dummy counter")
        }
    }
}

static ACCOUNTS_CREATED: Lazy<IntCounter> = Lazy::new(|| {
    register_counter("accounts_created_total", "Accounts created")
});

static LOGIN_FAILURES: Lazy<IntCounter> = Lazy::new(|| {
    register_counter(
        "account_login_failures_total",
        "Rejected authentication attempts",
    )
});

static ACCOUNT_LOCKOUTS: Lazy<IntCounter> = Lazy::new(|| {
    register_counter(
        "account_lockouts_total",
        "Failures that reached the lockout threshold",
    )
});

static NOTIFICATION_FAILURES: Lazy<IntCounter> = Lazy::new(|| {
    register_counter(
        "account_notification_failures_total",
        "Notifications that failed after a committed state change",
    )
});

pub fn inc_accounts_created() {
    ACCOUNTS_CREATED.inc();
}

pub fn inc_login_failures() {
    LOGIN_FAILURES.inc();
}

pub fn inc_account_lockouts() {
    ACCOUNT_LOCKOUTS.inc();
}

pub fn inc_notification_failures() {
    NOTIFICATION_FAILURES.inc();
}

pub fn notification_failures() -> u64 {
    NOTIFICATION_FAILURES.get()
}

/// Serialise the default registry in the Prometheus text format
pub fn gather_text() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!("failed to encode metrics: {}", e);
        return String::new();
    }

    String::from_utf8(buffer).unwrap_or_default()
}
