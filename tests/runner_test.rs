//! Integration tests for the capacity-gated task runner.
//!
//! These tests validate real-world functionality including:
//! - Bounded parallelism across two local pools under one global ceiling
//! - Completion-order delivery of envelopes
//! - Per-task error and panic isolation
//! - Runner-level failure when the source itself fails
//! - Lazy pulling of tasks from the source
//! - Intermediate progress envelopes
//! - Discarding a run mid-flight

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::anyhow;
use futures::StreamExt;
use prometheus_task_pool::builders::CapacityContext;
use prometheus_task_pool::config::CapacityConfig;
use prometheus_task_pool::core::{
    CapacitySource, EnvelopeKind, IterSource, ListSource, ProgressEnvelope, Task, TaskPoolError,
    TaskPoolRunner,
};
use prometheus_task_pool::runtime::TokioSpawner;

// ============================================================================
// HELPERS
// ============================================================================

#[derive(Default)]
struct ConcurrencyProbe {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl ConcurrencyProbe {
    fn enter(&self) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn exit(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }

    fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

/// Task that sleeps while counted by every probe, then returns `index`.
fn sleeping_task(
    pool: &str,
    index: usize,
    hold: Duration,
    probes: Vec<Arc<ConcurrencyProbe>>,
) -> Task<usize> {
    Task::new(format!("{pool}-{index}"), move || async move {
        for probe in &probes {
            probe.enter();
        }
        tokio::time::sleep(hold).await;
        for probe in &probes {
            probe.exit();
        }
        Ok(index)
    })
}

async fn explode() -> anyhow::Result<u32> {
    panic!("thunk panicked on purpose")
}

fn local_pool(units: u32) -> CapacitySource {
    CapacitySource::new("local", units).unwrap()
}

// ============================================================================
// BOUNDED PARALLELISM
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_two_pools_run_in_parallel_within_caps() {
    let cfg = CapacityConfig::default()
        .with_pool("jobs", 3);
    let cfg = CapacityConfig {
        global_units: 10,
        ..cfg
    };
    let ctx = CapacityContext::from_config(&cfg).unwrap();
    let hold = Duration::from_millis(100);

    let global_probe = Arc::new(ConcurrencyProbe::default());
    let probe_a = Arc::new(ConcurrencyProbe::default());
    let probe_b = Arc::new(ConcurrencyProbe::default());

    let tasks_for = |pool: &str, probe: &Arc<ConcurrencyProbe>| {
        (0..5)
            .map(|i| sleeping_task(pool, i, hold, vec![Arc::clone(&global_probe), Arc::clone(probe)]))
            .collect::<Vec<_>>()
    };

    let started = Instant::now();
    let run_a = ctx
        .runner("job-a", "jobs", ListSource::new(tasks_for("a", &probe_a)), TokioSpawner::current())
        .unwrap()
        .run_tasks();
    let run_b = ctx
        .runner("job-b", "jobs", ListSource::new(tasks_for("b", &probe_b)), TokioSpawner::current())
        .unwrap()
        .run_tasks();
    let (report_a, report_b) = tokio::join!(run_a.into_report(), run_b.into_report());
    let elapsed = started.elapsed();

    assert_eq!(report_a.summary.completed, 5);
    assert_eq!(report_b.summary.completed, 5);
    assert!(probe_a.peak() <= 3, "pool a peak {}", probe_a.peak());
    assert!(probe_b.peak() <= 3, "pool b peak {}", probe_b.peak());
    assert!(global_probe.peak() <= 6, "global peak {}", global_probe.peak());

    // Two waves of 100ms per pool: the cap is enforced but work overlaps.
    assert!(elapsed >= Duration::from_millis(200), "finished too fast: {elapsed:?}");
    assert!(elapsed < Duration::from_millis(450), "no parallelism: {elapsed:?}");

    let mut values: Vec<usize> = report_a.finals().map(|(_, v)| *v).collect();
    values.sort_unstable();
    assert_eq!(values, vec![0, 1, 2, 3, 4]);
    assert_eq!(ctx.global().available_units(), 10);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_global_ceiling_limits_sibling_runs() {
    let ctx = CapacityContext::new(4).unwrap();
    let global_probe = Arc::new(ConcurrencyProbe::default());

    let make_run = |label: &str| {
        let tasks: Vec<_> = (0..3)
            .map(|i| sleeping_task(label, i, Duration::from_millis(40), vec![Arc::clone(&global_probe)]))
            .collect();
        TaskPoolRunner::new(
            label,
            ListSource::new(tasks),
            ctx.child(label, 3).unwrap(),
            TokioSpawner::current(),
        )
        .run_tasks()
    };

    let (a, b) = tokio::join!(make_run("a").into_report(), make_run("b").into_report());
    assert_eq!(a.summary.completed + b.summary.completed, 6);
    assert!(global_probe.peak() <= 4, "global peak {}", global_probe.peak());
    assert_eq!(ctx.global().available_units(), 4);
}

// ============================================================================
// DELIVERY ORDER
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_envelopes_arrive_in_completion_order() {
    let slow = Task::new("slow", || async {
        tokio::time::sleep(Duration::from_millis(150)).await;
        Ok("slow")
    });
    let fast = Task::new("fast", || async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        Ok("fast")
    });

    let report = TaskPoolRunner::new(
        "order",
        ListSource::new(vec![slow, fast]),
        local_pool(2),
        TokioSpawner::current(),
    )
    .run_tasks()
    .into_report()
    .await;

    let order: Vec<&str> = report.envelopes.iter().map(|e| e.task_identity().as_str()).collect();
    assert_eq!(order, vec!["fast", "slow"]);
}

// ============================================================================
// FAILURE HANDLING
// ============================================================================

#[tokio::test]
async fn test_failing_task_is_isolated() {
    let tasks: Vec<Task<u32>> = (1..=5)
        .map(|i| {
            Task::new(format!("task-{i}"), move || async move {
                if i == 3 {
                    return Err(anyhow!("task {i} exploded"));
                }
                Ok(i * 10)
            })
        })
        .collect();

    let report = TaskPoolRunner::new("isolation", ListSource::new(tasks), local_pool(2), TokioSpawner::current())
        .run_tasks()
        .into_report()
        .await;

    assert_eq!(report.envelopes.len(), 5);
    assert_eq!(report.summary.completed, 4);
    assert_eq!(report.summary.failed, 1);
    assert!(report.runner_error.is_none());
    assert!(!report.summary.all_succeeded());

    let errors: Vec<_> = report.errors().collect();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].0.as_str(), "task-3");
    assert!(errors[0].1.contains("exploded"));

    let mut values: Vec<u32> = report.finals().map(|(_, v)| *v).collect();
    values.sort_unstable();
    assert_eq!(values, vec![10, 20, 40, 50]);
}

#[tokio::test]
async fn test_panicking_task_becomes_error_envelope() {
    let capacity = local_pool(1);
    let tasks: Vec<Task<u32>> = vec![
        Task::new("ok-1", || async { Ok(1) }),
        Task::new("boom", explode),
        Task::new("ok-2", || async { Ok(2) }),
    ];

    let report = TaskPoolRunner::new("panics", ListSource::new(tasks), capacity.clone(), TokioSpawner::current())
        .run_tasks()
        .into_report()
        .await;

    assert_eq!(report.summary.completed, 2);
    assert_eq!(report.summary.failed, 1);
    let (identity, detail) = report.errors().next().unwrap();
    assert_eq!(identity.as_str(), "boom");
    assert!(detail.contains("thunk panicked on purpose"));
    assert_eq!(capacity.available_units(), 1, "panicking task must release its unit");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_source_failure_is_run_level() {
    let invoked = Arc::new(AtomicUsize::new(0));
    let mut produced = 0_usize;
    let source = IterSource::from_fn({
        let invoked = Arc::clone(&invoked);
        move || {
            produced += 1;
            if produced == 4 {
                return Some(Err(TaskPoolError::source_failure("generator broke on item 4")));
            }
            let invoked = Arc::clone(&invoked);
            let index = produced;
            Some(Ok(Task::new(format!("gen-{index}"), move || async move {
                invoked.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                Ok(index)
            })))
        }
    });

    let mut run = TaskPoolRunner::new("failing-source", source, local_pool(3), TokioSpawner::current()).run_tasks();
    let mut finals = 0;
    let mut runner_error = None;
    while let Some(item) = run.next().await {
        match item {
            Ok(ProgressEnvelope::Final { .. }) => {
                assert!(runner_error.is_none(), "run-level error must come last");
                finals += 1;
            }
            Ok(other) => panic!("unexpected envelope {other:?}"),
            Err(err) => runner_error = Some(err),
        }
    }

    assert_eq!(finals, 3);
    assert!(matches!(runner_error, Some(TaskPoolError::Source(_))));
    assert!(run.summary().runner_failed);
    assert_eq!(invoked.load(Ordering::SeqCst), 3, "no fourth thunk may run");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_panicking_source_is_run_level() {
    let mut calls = 0_usize;
    let source = IterSource::from_fn(move || {
        calls += 1;
        assert!(calls < 3, "generator crashed producing item {calls}");
        let index = calls;
        Some(Ok(Task::new(format!("gen-{index}"), move || async move { Ok(index) })))
    });
    let capacity = local_pool(1);

    let report = TaskPoolRunner::new("panicking-source", source, capacity.clone(), TokioSpawner::current())
        .run_tasks()
        .into_report()
        .await;

    assert_eq!(report.summary.completed, 2);
    assert!(report.summary.runner_failed);
    assert!(!report.summary.all_succeeded());
    match report.runner_error {
        Some(TaskPoolError::Source(detail)) => {
            assert!(detail.contains("generator crashed producing item 3"), "{detail}");
        }
        other => panic!("expected a source failure, got {other:?}"),
    }
    assert_eq!(capacity.available_units(), 1);
}

// ============================================================================
// LAZY PULLING
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_source_pulled_only_with_spare_capacity() {
    let produced = Arc::new(AtomicUsize::new(0));
    let (release_tx, release_rx) = tokio::sync::watch::channel(false);

    let source = IterSource::from_fn({
        let produced = Arc::clone(&produced);
        move || {
            let index = produced.fetch_add(1, Ordering::SeqCst);
            if index >= 4 {
                return None;
            }
            let mut release_rx = release_rx.clone();
            Some(Ok(Task::new(format!("lazy-{index}"), move || async move {
                let _ = release_rx.wait_for(|released| *released).await;
                Ok(index)
            })))
        }
    });

    let run = TaskPoolRunner::new("lazy", source, local_pool(2), TokioSpawner::current()).run_tasks();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(
        produced.load(Ordering::SeqCst),
        2,
        "only as many tasks as there are free units may be produced"
    );

    release_tx.send_replace(true);
    let report = run.into_report().await;
    assert_eq!(report.summary.completed, 4);
}

// ============================================================================
// PROGRESS AND CANCELLATION
// ============================================================================

#[tokio::test]
async fn test_intermediate_envelopes_precede_final() {
    let task = Task::with_progress("chapters", |reporter| async move {
        for chapter in 1..=3 {
            reporter.report(format!("chapter {chapter}"));
        }
        Ok("book".to_string())
    });

    let report = TaskPoolRunner::new("progress", ListSource::new(vec![task]), local_pool(1), TokioSpawner::current())
        .run_tasks()
        .into_report()
        .await;

    let kinds: Vec<EnvelopeKind> = report.envelopes.iter().map(ProgressEnvelope::kind).collect();
    assert_eq!(
        kinds,
        vec![
            EnvelopeKind::Intermediate,
            EnvelopeKind::Intermediate,
            EnvelopeKind::Intermediate,
            EnvelopeKind::Final
        ]
    );
    assert_eq!(report.summary.intermediate, 3);
    assert_eq!(report.summary.finished(), 1);
    assert!(report.summary.all_succeeded());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_dropping_run_stops_pulls_and_releases_capacity() {
    let capacity = local_pool(1);
    let started = Arc::new(AtomicUsize::new(0));
    let tasks: Vec<Task<usize>> = (0..5)
        .map(|i| {
            let started = Arc::clone(&started);
            Task::new(format!("discard-{i}"), move || async move {
                started.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok(i)
            })
        })
        .collect();

    let mut run = TaskPoolRunner::new("discard", ListSource::new(tasks), capacity.clone(), TokioSpawner::current())
        .run_tasks();
    let first = run.next().await.unwrap().unwrap();
    assert!(first.is_terminal());
    drop(run);

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(
        started.load(Ordering::SeqCst) <= 2,
        "at most the task launched before the drop may start after the first result"
    );
    assert_eq!(capacity.available_units(), 1);
}

#[tokio::test]
async fn test_empty_source_finishes_immediately() {
    let report = TaskPoolRunner::new("empty", ListSource::<u8>::new(Vec::new()), local_pool(1), TokioSpawner::current())
        .run_tasks()
        .into_report()
        .await;
    assert!(report.envelopes.is_empty());
    assert!(report.runner_error.is_none());
    assert_eq!(report.summary.finished(), 0);
}
