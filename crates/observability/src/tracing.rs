//! Tracing/logging initialization.
//!
//! Services embedding the ledger call [`init`] once at startup; tests and
//! benches use [`init_for_tests`], which routes output through the harness
//! capture instead of stdout. Both are safe to call repeatedly.

use tracing_subscriber::EnvFilter;

/// Filter applied when `RUST_LOG` is unset.
const DEFAULT_DIRECTIVES: &str = "info,partsledger_engine=debug";

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVES))
}

/// Initialize JSON logging for the process, configurable via `RUST_LOG`.
///
/// Subsequent calls are no-ops.
pub fn init() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .json()
        .with_timer(tracing_subscriber::fmt::time::SystemTime)
        .with_target(false)
        .try_init();
}

/// Initialize compact logging for test runs.
///
/// Call it from any test that wants span output under `RUST_LOG`; only the
/// first call installs a subscriber.
pub fn init_for_tests() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_test_writer()
        .compact()
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_initialization_is_a_no_op() {
        init_for_tests();
        init_for_tests();
        init();
        tracing::info!("still here after three init calls");
    }
}
