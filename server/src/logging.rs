//! Logging setup. A `tracing::Subscriber` installed once in `main` routes
//! every log through `tracing`'s own non-blocking writer.

use tracing_subscriber::EnvFilter;

/// Installs a process-wide subscriber reading `RUST_LOG`, defaulting to
/// `info` when unset.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}
