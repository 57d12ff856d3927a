//! Tests for task identities and envelopes

use prometheus_task_pool::core::{ProgressEnvelope, TaskDescriptor, TaskIdentity};
use serde_json::json;

#[test]
fn test_derived_identity_is_stable() {
    let params = json!({"tone": "dark", "chapters": 3});
    let a = TaskIdentity::derive("The Dragon's Tale", &params).unwrap();
    let b = TaskIdentity::derive("The Dragon's Tale", &params).unwrap();
    assert_eq!(a, b);
    assert!(a.as_str().starts_with("the-dragon-s-tale-"));
    assert_eq!(a.as_str().len(), "the-dragon-s-tale-".len() + 8);
}

#[test]
fn test_key_order_does_not_change_identity() {
    let a = TaskIdentity::derive("story", &json!({"a": 1, "b": 2})).unwrap();
    let b = TaskIdentity::derive("story", &json!({"b": 2, "a": 1})).unwrap();
    assert_eq!(a, b);
}

#[test]
fn test_different_params_different_identity() {
    let a = TaskIdentity::derive("story", &json!({"chapters": 3})).unwrap();
    let b = TaskIdentity::derive("story", &json!({"chapters": 4})).unwrap();
    assert_ne!(a, b);
}

#[test]
fn test_descriptor_derive_uses_payload() {
    let descriptor = TaskDescriptor::derive("Robots", vec!["r2", "c3po"]).unwrap();
    let expected = TaskIdentity::derive("Robots", &vec!["r2", "c3po"]).unwrap();
    assert_eq!(descriptor.identity, expected);
}

#[test]
fn test_envelope_wire_shape() {
    let envelope = ProgressEnvelope::Final {
        task_identity: TaskIdentity::new("story-abc-f3a1"),
        value: 7_u32,
    };
    let value = serde_json::to_value(&envelope).unwrap();
    assert_eq!(
        value,
        json!({"kind": "final", "task_identity": "story-abc-f3a1", "value": 7})
    );
}
