//! Tracing subscriber initialization for the bootstrap binary.

/// Install the global `fmt` subscriber, filtered from the environment with
/// an `info` default.
pub fn init() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();
}
