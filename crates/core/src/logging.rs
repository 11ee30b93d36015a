//! Unified logging integration
//!
//! Installs ftlog (default feature) or a tracing-subscriber fmt layer
//! filtered by `RUST_LOG`. Safe to call from every binary and test.

use std::sync::Once;
#[cfg(not(feature = "ftlog"))]
use tracing_subscriber::{EnvFilter, FmtSubscriber};

static INIT: Once = Once::new();

/// Initialize the process-wide logger (idempotent)
pub fn init_logging() {
    INIT.call_once(|| {
        #[cfg(feature = "ftlog")]
        init_ftlog();

        #[cfg(not(feature = "ftlog"))]
        init_tracing();
    });
}

#[cfg(feature = "ftlog")]
fn init_ftlog() {
    let built = ftlog::builder()
        .max_log_level(ftlog::LevelFilter::Debug)
        .bounded(100_000, false)
        .utc()
        .try_init();

    match built {
        Ok(guard) => {
            // The logger lives for the whole process.
            std::mem::forget(guard);
            tracing::info!("📝 Initialized ftlog unified logging");
        }
        // Another logger already owns the global slot (e.g. a test harness).
        Err(e) => eprintln!("ftlog initialization skipped: {e}"),
    }
}

#[cfg(not(feature = "ftlog"))]
fn init_tracing() {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_file(true)
        .with_line_number(true)
        .finish();

    if tracing::subscriber::set_global_default(subscriber).is_ok() {
        tracing::info!("📝 Initialized tracing logging");
    }
}

/// Log an operation latency, escalating to info above one millisecond
#[macro_export]
macro_rules! log_latency {
    ($operation:expr, $duration_micros:expr) => {
        if $duration_micros < 1000 {
            tracing::debug!("⚡ {} completed in {}μs", $operation, $duration_micros);
        } else {
            tracing::info!("⚡ {} completed in {:.3}ms", $operation, $duration_micros as f64 / 1000.0);
        }
    };
}

/// Log a subscription lifecycle event
#[macro_export]
macro_rules! log_subscription {
    ($action:expr, $subscription_id:expr) => {
        tracing::info!("📡 SUBSCRIPTION {}: {}", $action, $subscription_id);
    };
    ($action:expr, $subscription_id:expr, $detail:expr) => {
        tracing::info!("📡 SUBSCRIPTION {}: {} ({})", $action, $subscription_id, $detail);
    };
}

#[macro_export]
macro_rules! log_error {
    ($operation:expr, $error:expr) => {
        tracing::error!("❌ {} failed: {}", $operation, $error);
    };
}
