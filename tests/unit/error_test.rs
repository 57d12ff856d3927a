//! Tests for error types

use prometheus_task_pool::core::TaskPoolError;

#[test]
fn test_invalid_capacity_error() {
    let err = TaskPoolError::InvalidCapacity("`local` must have at least one unit".to_string());
    assert_eq!(
        format!("{err}"),
        "invalid capacity: `local` must have at least one unit"
    );
}

#[test]
fn test_source_error() {
    let err = TaskPoolError::source_failure(std::io::Error::other("disk gone"));
    assert_eq!(format!("{err}"), "task source failed: disk gone");
}

#[test]
fn test_store_error() {
    let err = TaskPoolError::Store("connection failed".to_string());
    assert_eq!(format!("{err}"), "identity store error: connection failed");
}

#[test]
fn test_unknown_pool_error() {
    let err = TaskPoolError::UnknownPool("images".to_string());
    assert_eq!(format!("{err}"), "unknown pool: images");
}

#[test]
fn test_error_converts_into_anyhow() {
    let err: anyhow::Error = TaskPoolError::InvalidConfig("global_units must be greater than 0".into()).into();
    assert!(err.to_string().starts_with("invalid config"));
    assert!(err.downcast_ref::<TaskPoolError>().is_some());
}
