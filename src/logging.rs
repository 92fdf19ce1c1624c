//! Structured logging setup.
//!
//! The library only emits `tracing` events. Hosts (and tests that want to
//! see shard traffic) install a subscriber once through this module,
//! configured by the `URSA_LOG` environment variable:
//!
//! - `URSA_LOG=info` - default
//! - `URSA_LOG=ursa::manager=debug` - routing and reciprocal dispatch
//! - `URSA_LOG=warn,ursa::shard=debug` - shard task lifecycle

use tracing_subscriber::{fmt, EnvFilter};

/// Environment variable read for the filter directive.
pub const LOG_ENV: &str = "URSA_LOG";

/// Install the global subscriber at `info` unless `URSA_LOG` says otherwise.
///
/// Later calls are ignored (tracing only allows one global subscriber).
pub fn init() {
    init_with_default("info");
}

/// Install the global subscriber with a custom fallback level.
pub fn init_with_default(default_level: &str) {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default_level));

    let _ = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .compact()
        .try_init();
}

/// Subscriber for tests: writes through the libtest capture.
pub fn init_for_tests() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));

    let _ = fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}
