//! Tracing setup for embedding applications.

use tracing_log::LogTracer;
use tracing_subscriber::{fmt, EnvFilter};

/// Installs the global tracing subscriber and routes `log` records
/// through it. Reads the filter from `EXAMSHELF_LOG`, defaulting to
/// `info`. Safe to call once per process; later calls are no-ops.
pub fn init_tracing() {
    let _ = LogTracer::init();

    let filter = EnvFilter::try_from_env("EXAMSHELF_LOG")
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
