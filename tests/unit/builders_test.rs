//! Tests for builder modules

use prometheus_task_pool::builders::{build_context, CapacityContext, GLOBAL_LABEL};
use prometheus_task_pool::config::CapacityConfig;
use prometheus_task_pool::core::{ListSource, TaskPoolError};
use prometheus_task_pool::runtime::TokioSpawner;

fn config() -> CapacityConfig {
    CapacityConfig {
        global_units: 4,
        ..CapacityConfig::default()
    }
    .with_pool("stories", 3)
}

#[test]
fn test_context_from_config() {
    let ctx = build_context(&config()).unwrap();
    assert_eq!(ctx.global().label(), GLOBAL_LABEL);
    assert_eq!(ctx.global().total_units(), 4);
    assert_eq!(ctx.pool_names().collect::<Vec<_>>(), vec!["stories"]);
}

#[test]
fn test_invalid_config_rejected() {
    let cfg = CapacityConfig {
        global_units: 0,
        ..CapacityConfig::default()
    };
    assert!(matches!(
        CapacityContext::from_config(&cfg),
        Err(TaskPoolError::InvalidConfig(_))
    ));
}

#[test]
fn test_each_local_is_fresh_and_chained() {
    let ctx = build_context(&config()).unwrap();
    let first = ctx.local("stories").unwrap();
    let second = ctx.local("stories").unwrap();

    let _held = first.try_acquire().unwrap();
    assert_eq!(first.available_units(), 2);
    assert_eq!(second.available_units(), 3, "locals do not share a budget");
    assert_eq!(ctx.global().available_units(), 3, "but they share the global one");
    assert_eq!(second.parent().map(|p| p.label()), Some(GLOBAL_LABEL));
}

#[test]
fn test_unknown_pool() {
    let ctx = build_context(&config()).unwrap();
    assert_eq!(
        ctx.local("images").unwrap_err(),
        TaskPoolError::UnknownPool("images".to_string())
    );
}

#[test]
fn test_contexts_are_isolated() {
    let a = CapacityContext::new(1).unwrap();
    let b = CapacityContext::new(1).unwrap();
    let _held = a.global().try_acquire().unwrap();
    assert!(b.global().try_acquire().is_some());
}

#[tokio::test]
async fn test_runner_for_pool() {
    let ctx = build_context(&config()).unwrap();
    let runner = ctx
        .runner("job-1", "stories", ListSource::<u8>::new(Vec::new()), TokioSpawner::current())
        .unwrap();
    assert_eq!(runner.label(), "job-1");
    let report = runner.run_tasks().into_report().await;
    assert!(report.envelopes.is_empty());
}
