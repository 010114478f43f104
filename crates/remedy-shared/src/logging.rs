//! # Logging Bootstrap
//!
//! Tracing initialization shared by the server binary and integration
//! harnesses. Filtering comes from `RUST_LOG`; set `REMEDY_LOG_FORMAT=json`
//! for structured output in containerized deployments.

use tracing_subscriber::EnvFilter;

/// Initialize the global tracing subscriber. Idempotent: repeated calls
/// (e.g. from multiple tests) are no-ops.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let json = std::env::var("REMEDY_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .try_init();
    } else {
        let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
    }
}
