//! Tracing, logging, metrics (shared setup).

/// Initialize process-wide observability (tracing/logging).
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init();
}

/// Initialize with an explicit filter string instead of `RUST_LOG`.
///
/// Useful for embedding the relay in a host that owns its own log
/// configuration. Safe to call multiple times.
pub fn init_with_filter(directives: &str) {
    tracing::init_with_filter(directives);
}

/// Tracing configuration (filters, layers).
pub mod tracing;

/// Logging configuration.
pub mod logging {}

/// Metrics setup and exporters.
pub mod metrics {}
