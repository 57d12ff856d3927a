//! Tests for configuration validation

use std::collections::HashMap;

use prometheus_task_pool::config::{CapacityConfig, PoolConfig};

#[test]
fn test_pool_config_validation() {
    assert!(PoolConfig { max_units: 3 }.validate().is_ok());
}

#[test]
fn test_pool_config_invalid_max_units() {
    assert!(PoolConfig { max_units: 0 }.validate().is_err());
}

#[test]
fn test_capacity_config_invalid_global_units() {
    let config = CapacityConfig {
        global_units: 0,
        pools: HashMap::new(),
    };
    assert!(config.validate().is_err());
}

#[test]
fn test_invalid_pool_is_named() {
    let config = CapacityConfig::default().with_pool("stories", 0);
    let err = config.validate().unwrap_err();
    assert!(err.contains("stories"), "error should name the pool: {err}");
}

#[test]
fn test_pool_above_global_ceiling_is_allowed() {
    let config = CapacityConfig {
        global_units: 2,
        pools: HashMap::new(),
    }
    .with_pool("wide", 8);
    assert!(config.validate().is_ok());
}

#[test]
fn test_capacity_config_from_json() {
    let json = r#"{
        "global_units": 10,
        "pools": {
            "stories": { "max_units": 3 },
            "images": { "max_units": 2 }
        }
    }"#;

    let config = CapacityConfig::from_json_str(json).unwrap();
    assert_eq!(config.global_units, 10);
    assert_eq!(config.pools.len(), 2);
    assert_eq!(config.pools["stories"].max_units, 3);
}

#[test]
fn test_capacity_config_from_json_rejects_zero() {
    let json = r#"{ "global_units": 0 }"#;
    assert!(CapacityConfig::from_json_str(json).is_err());
}

#[test]
fn test_capacity_config_from_json_rejects_garbage() {
    let err = CapacityConfig::from_json_str("not json").unwrap_err();
    assert!(err.starts_with("parse error"));
}
