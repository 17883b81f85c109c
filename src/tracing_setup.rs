//! Tracing initialization
//!
//! Console logging with environment-controlled filtering. Process bootstrap
//! calls this once before constructing any engine; library code only emits
//! through the `tracing` macros and never installs a subscriber itself.
//!
//! Configuration via environment variables:
//! - RUST_LOG: Log level filter (default: info)

use tracing_subscriber::EnvFilter;

/// Initialize console tracing
///
/// Safe to call once per process. Returns an error if a global subscriber
/// is already installed (e.g. by a test harness).
pub fn init_tracing() -> Result<(), Box<dyn std::error::Error>> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .try_init()?;

    tracing::info!("Tracing initialized");
    Ok(())
}

/// Initialize tracing for tests, ignoring double-init errors
pub fn init_tracing_for_tests() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new("debug"))
        .with_test_writer()
        .try_init();
}
