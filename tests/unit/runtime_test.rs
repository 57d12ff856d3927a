//! Tests for tokio spawner utilities

use prometheus_task_pool::core::Spawn;
use prometheus_task_pool::runtime::TokioSpawner;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_tokio_spawner_spawn() {
    let spawner = TokioSpawner::new(tokio::runtime::Handle::current());

    let (tx, rx) = tokio::sync::oneshot::channel();
    spawner.spawn(async move {
        tx.send(123).unwrap();
    });

    let result = rx.await.expect("oneshot result");
    assert_eq!(result, 123);
}

#[test]
fn test_dedicated_runtime_spawner() {
    let (spawner, runtime) = TokioSpawner::with_worker_threads(2).unwrap();
    let (tx, rx) = std::sync::mpsc::channel();
    spawner.spawn(async move {
        tx.send("ran").unwrap();
    });
    assert_eq!(rx.recv_timeout(std::time::Duration::from_secs(1)).unwrap(), "ran");
    drop(runtime);
}
