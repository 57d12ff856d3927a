//! Telemetry helpers for structured logging.
//!
//! The crate only emits `tracing` events; installing a subscriber is the
//! host's call. Useful targets: `prometheus_task_pool::core::runner` for run
//! lifecycle, `prometheus_task_pool::core::registry` for unit state changes and
//! `prometheus_task_pool::core::capacity` (trace level) for grants and waits.

/// Install a default `fmt` subscriber filtered by `RUST_LOG`, unless one is set.
///
/// Returns `true` if this call installed the subscriber.
pub fn init_tracing() -> bool {
    if tracing::dispatcher::has_been_set() {
        return false;
    }
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init()
        .is_ok()
}
