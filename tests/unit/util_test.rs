//! Tests for utility functions

use prometheus_task_pool::util::init_tracing;

#[test]
fn test_init_tracing_is_idempotent() {
    init_tracing();
    assert!(!init_tracing(), "second call must leave the subscriber alone");
}
