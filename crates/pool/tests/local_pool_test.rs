//! End-to-end runs of a worker pool over the in-process backend.

use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use drudge_core::{Params, SchedulerConfig, WorkMessage, WorkMethod, WorkMethods};
use drudge_pool::{PoolState, WorkerPool};
use drudge_queue::{Backend, LocalBackend};
use serde_json::json;

fn params(value: serde_json::Value) -> Params {
    value.as_object().cloned().unwrap()
}

fn fast_config() -> SchedulerConfig {
    SchedulerConfig {
        max_concurrency: 4,
        min_interval_ms: 0,
        max_interval_ms: 20,
        inc_interval_ms: 5,
        max_shutdown_ms: 1_000,
    }
}

async fn wait_until(mut done: impl FnMut() -> bool) {
    for _ in 0..200 {
        if done() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached");
}

#[tokio::test]
async fn double_check_end_to_end() {
    let flag = Arc::new(AtomicI64::new(0));
    let f = flag.clone();
    let methods = WorkMethods::of([WorkMethod::consumer("double-check", move |p: Params| {
        let f = f.clone();
        async move {
            let val = p
                .get("val")
                .and_then(|v| v.as_i64())
                .ok_or_else(|| anyhow::anyhow!("val missing"))?;
            f.store(val, Ordering::SeqCst);
            Ok(())
        }
    })]);

    let backend = Arc::new(LocalBackend::new(Arc::new(methods)));
    backend.submit(WorkMessage::with_params("double-check", params(json!({"val": 8}))));

    let pool = WorkerPool::new("e2e", fast_config(), backend.clone());
    pool.start().await.unwrap();

    wait_until(|| flag.load(Ordering::SeqCst) == 8).await;
    assert!(pool.is_running());
    assert_eq!(pool.state(), PoolState::Running);

    pool.stop().await;
    assert!(!pool.is_running());
    assert_eq!(pool.state(), PoolState::Stopped);
    assert_eq!(backend.metrics().unwrap().processed(), 1);
}

#[tokio::test]
async fn skipped_messages_still_count_as_work() {
    let methods = WorkMethods::of([WorkMethod::new("not-mine", |_p: Params| async { Ok(false) })]);
    let backend = Arc::new(LocalBackend::new(Arc::new(methods)));
    backend.submit(WorkMessage::new("not-mine"));

    let pool = WorkerPool::new("skip", fast_config(), backend.clone());
    pool.start().await.unwrap();

    let metrics = backend.metrics().unwrap();
    wait_until(|| metrics.skipped() == 1).await;
    pool.stop().await;

    assert_eq!(metrics.processed(), 0);
    assert_eq!(metrics.method("not-mine").unwrap().skipped, 1);
    assert!(backend.is_empty());
}

#[tokio::test]
async fn backlog_drains_concurrently() {
    let handled = Arc::new(AtomicUsize::new(0));
    let h = handled.clone();
    let methods = WorkMethods::of([WorkMethod::consumer("tick", move |_p: Params| {
        let h = h.clone();
        async move {
            tokio::time::sleep(Duration::from_millis(1)).await;
            h.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    })]);
    let backend = Arc::new(LocalBackend::new(Arc::new(methods)));
    for _ in 0..50 {
        backend.submit(WorkMessage::new("tick"));
    }

    let pool = WorkerPool::new("backlog", fast_config(), backend.clone());
    pool.start().await.unwrap();

    wait_until(|| handled.load(Ordering::SeqCst) == 50).await;
    assert!(pool.stats().loops_launched > 1);
    pool.stop().await;
}

#[tokio::test]
async fn stop_before_any_work_never_invokes_handler() {
    let calls = Arc::new(AtomicUsize::new(0));
    let c = calls.clone();
    let methods = WorkMethods::of([WorkMethod::consumer("idle", move |_p: Params| {
        c.fetch_add(1, Ordering::SeqCst);
        async { Ok(()) }
    })]);
    let backend = Arc::new(LocalBackend::new(Arc::new(methods)));

    let pool = WorkerPool::new("idle", SchedulerConfig::default(), backend);
    pool.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(pool.stats().wakeups_pending, 1);

    pool.stop().await;
    assert!(!pool.is_running());
    assert_eq!(pool.stats().wakeups_pending, 0);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}
