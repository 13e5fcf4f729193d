//! Admin API tests driven through the router with `tower::ServiceExt`.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;

use drudge_core::{MessageCodec, Params, SchedulerConfig, WorkMethod, WorkMethods};
use drudge_pool::WorkerPool;
use drudge_queue::{Backend, LocalBackend, QueueError, QueueHealth};
use drudge_server::{build_router, AppState};

struct Harness {
    app: Router,
    state: Arc<AppState>,
    local: Arc<LocalBackend>,
    flag: Arc<AtomicI64>,
}

fn harness() -> Harness {
    let flag = Arc::new(AtomicI64::new(0));
    let f = flag.clone();
    let methods = Arc::new(WorkMethods::of([
        WorkMethod::consumer("double-check", move |p: Params| {
            let f = f.clone();
            async move {
                let val = p
                    .get("val")
                    .and_then(Value::as_i64)
                    .ok_or_else(|| anyhow::anyhow!("val is required"))?;
                f.store(val, Ordering::SeqCst);
                Ok(())
            }
        }),
        WorkMethod::new("not-mine", |_p: Params| async { Ok(false) }),
    ]));

    let local = Arc::new(LocalBackend::new(methods.clone()));
    let pool = WorkerPool::new("api-test", SchedulerConfig::default(), local.clone());
    let state = Arc::new(
        AppState::new(pool, methods, MessageCodec::new()).with_sender(local.clone()),
    );

    Harness {
        app: build_router(state.clone()),
        state,
        local,
        flag,
    }
}

async fn send(app: &Router, method: &str, uri: &str) -> (StatusCode, String) {
    let resp = app
        .clone()
        .oneshot(Request::builder().method(method).uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = resp.status();
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    (status, String::from_utf8(bytes.to_vec()).unwrap())
}

#[tokio::test]
async fn run_work_reports_handled() {
    let h = harness();
    let (status, body) = send(&h.app, "POST", "/tasks/work?method=double-check&params=%7Bval:8%7D").await;

    assert_eq!(status, StatusCode::OK);
    let mut lines = body.lines();
    assert_eq!(lines.next(), Some(r#"Running double-check({"val":8})"#));
    let done = lines.next().unwrap();
    assert!(done.starts_with("Completed in "), "{done}");
    assert!(done.ends_with("ms (handled)"), "{done}");
    assert_eq!(h.flag.load(Ordering::SeqCst), 8);
}

#[tokio::test]
async fn run_work_reports_skipped() {
    let h = harness();
    let (status, body) = send(&h.app, "POST", "/tasks/work?method=not-mine").await;

    assert_eq!(status, StatusCode::OK);
    assert!(body.starts_with("Running not-mine({})\n"), "{body}");
    assert!(body.trim_end().ends_with("(skipped)"), "{body}");
}

#[tokio::test]
async fn run_work_usage_errors() {
    let h = harness();

    let (status, body) = send(&h.app, "POST", "/tasks/work").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, "Must specify parameter: method");

    let (status, body) = send(&h.app, "POST", "/tasks/work?method=a&method=b").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, "Must specify parameter: method");

    let (status, body) = send(&h.app, "POST", "/tasks/work?method=ghost").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, "Invalid method: ghost");

    let (status, body) = send(&h.app, "POST", "/tasks/work?method=double-check&params=%7Bval").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body.starts_with("Invalid params: "), "{body}");

    assert_eq!(h.flag.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn run_work_handler_failure_is_500() {
    let h = harness();
    let (status, body) = send(&h.app, "POST", "/tasks/work?method=double-check").await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body.starts_with("Running double-check({})\nFailed after "), "{body}");
    assert!(body.contains("val is required"), "{body}");
}

#[tokio::test]
async fn enqueue_then_poll() {
    let h = harness();
    let (status, body) = send(&h.app, "POST", "/tasks/enqueue?method=double-check&params=%7Bval:3%7D").await;

    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body, "Queued double-check({\"val\":3})\n");
    assert_eq!(h.local.len(), 1);

    assert!(h.local.poll().await.unwrap());
    assert_eq!(h.flag.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn enqueue_rejects_unregistered_method() {
    let h = harness();

    let (status, body) = send(&h.app, "POST", "/tasks/enqueue?method=ghost").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, "Invalid method: ghost");

    let (status, body) = send(&h.app, "POST", "/tasks/enqueue").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, "Must specify parameter: method");

    assert_eq!(h.local.len(), 0);
}

#[tokio::test]
async fn health_follows_pool_state() {
    let h = harness();

    let (status, body) = send(&h.app, "GET", "/health").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    let json: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(json["running"], false);
    assert_eq!(json["state"], "not_started");

    h.state.pool.start().await.unwrap();
    let (status, body) = send(&h.app, "GET", "/health").await;
    assert_eq!(status, StatusCode::OK);
    let json: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(json["status"], "ok");
    assert_eq!(json["backend"], "local");
    assert_eq!(json["queue"]["connected"], true);
    assert_eq!(json["queue"]["provider"], "local");
    assert!(json.get("error").is_none());

    h.state.pool.stop().await;
    let (status, _) = send(&h.app, "GET", "/health").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn metrics_snapshot() {
    let h = harness();
    send(&h.app, "POST", "/tasks/enqueue?method=not-mine").await;
    h.local.poll().await.unwrap();

    let (status, body) = send(&h.app, "GET", "/metrics").await;
    assert_eq!(status, StatusCode::OK);

    let json: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(json["pool"]["name"], "api-test");
    assert_eq!(json["pool"]["max_concurrency"], 10);
    assert_eq!(json["backend"]["skipped"], 1);
    assert_eq!(json["backend"]["methods"]["not-mine"]["skipped"], 1);
    assert_eq!(json["methods"], serde_json::json!(["double-check", "not-mine"]));
}

#[tokio::test]
async fn health_reports_queue_backlog() {
    let h = harness();
    send(&h.app, "POST", "/tasks/enqueue?method=not-mine").await;
    send(&h.app, "POST", "/tasks/enqueue?method=not-mine").await;

    let (_, body) = send(&h.app, "GET", "/health").await;
    let json: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(json["queue"]["approximate_message_count"], 2);
}

/// Starts fine but fails every connectivity check.
struct Unreachable;

#[async_trait]
impl Backend for Unreachable {
    fn name(&self) -> &str {
        "unreachable"
    }

    async fn start(&self) -> Result<(), QueueError> {
        Ok(())
    }

    async fn stop(&self) -> Result<(), QueueError> {
        Ok(())
    }

    async fn poll(&self) -> Result<bool, QueueError> {
        Ok(false)
    }

    async fn health_check(&self) -> Result<QueueHealth, QueueError> {
        Err(QueueError::Connection("queue unreachable".into()))
    }
}

#[tokio::test]
async fn health_is_503_when_backend_check_fails() {
    let methods = Arc::new(WorkMethods::default());
    let pool = WorkerPool::new("unreachable", SchedulerConfig::default(), Arc::new(Unreachable));
    let state = Arc::new(AppState::new(pool, methods, MessageCodec::new()));
    let app = build_router(state.clone());

    state.pool.start().await.unwrap();
    let (status, body) = send(&app, "GET", "/health").await;
    state.pool.stop().await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    let json: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(json["status"], "unavailable");
    assert_eq!(json["running"], true);
    assert!(json["queue"].is_null());
    assert!(json["error"].as_str().unwrap().contains("queue unreachable"));
}
