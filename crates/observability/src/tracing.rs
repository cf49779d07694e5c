//! Tracing/logging initialization.
//!
//! Minimal stub for now; this can evolve into layered JSON logging, filtering,
//! correlation IDs, etc.

use tracing_subscriber::EnvFilter;

/// Initialize tracing/logging for the process.
///
/// Filter directives come from `RUST_LOG`, falling back to `info`.
/// Safe to call multiple times (subsequent calls are no-ops).
pub fn init() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));
    install(filter);
}

/// Initialize with explicit filter directives, e.g. `"relaykit_infra=debug"`.
///
/// Safe to call multiple times (subsequent calls are no-ops).
pub fn init_with_filter(directives: &str) {
    install(EnvFilter::new(directives));
}

fn install(filter: EnvFilter) {
    // JSON logs + timestamps; a subscriber set by the host wins.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .json()
        .with_timer(tracing_subscriber::fmt::time::SystemTime)
        .with_target(false)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_initialization_is_a_no_op() {
        init();
        init();
        init_with_filter("debug");
        tracing::info!("still alive after repeated init");
    }
}
