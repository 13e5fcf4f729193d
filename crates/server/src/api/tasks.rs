//! Manual trigger: run or enqueue a work method from an HTTP request.
//!
//! Both endpoints take `method` (exactly once) and an optional lenient-JSON
//! `params` object in the query string and answer in plain text.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::{RawQuery, State};
use axum::http::StatusCode;
use chrono::Utc;
use drudge_core::{DrudgeError, Params, WorkMessage};
use futures::FutureExt;
use tracing::{info, warn};

use crate::state::AppState;

const USAGE: &str = "Must specify parameter: method";

type TextResponse = (StatusCode, String);

/// `method` / `params` pulled from a raw query string.
#[derive(Debug, Default)]
struct TaskQuery {
    methods: Vec<String>,
    params: Option<String>,
}

impl TaskQuery {
    fn parse(raw: Option<&str>) -> Self {
        let mut query = Self::default();
        for (key, value) in url::form_urlencoded::parse(raw.unwrap_or_default().as_bytes()) {
            match key.as_ref() {
                "method" => query.methods.push(value.into_owned()),
                "params" if query.params.is_none() => query.params = Some(value.into_owned()),
                _ => {}
            }
        }
        query
    }

    /// The single `method` value; missing or repeated is a usage error.
    fn method(&self) -> Result<&str, TextResponse> {
        match self.methods.as_slice() {
            [method] => Ok(method.as_str()),
            _ => Err(bad_request(USAGE.to_string())),
        }
    }

    fn params(&self, state: &AppState) -> Result<Params, TextResponse> {
        match self.params.as_deref().map(str::trim) {
            None | Some("") => Ok(Params::new()),
            Some(text) => state
                .codec
                .parse_params_lenient(text)
                .map_err(|e| bad_request(format!("Invalid params: {}", reason(&e)))),
        }
    }
}

fn bad_request(body: String) -> TextResponse {
    (StatusCode::BAD_REQUEST, body)
}

fn reason(err: &DrudgeError) -> String {
    match err {
        DrudgeError::HandlerFailure { reason, .. } | DrudgeError::MalformedMessage(reason) => {
            reason.clone()
        }
        other => other.to_string(),
    }
}

/// `POST /tasks/work`: run a registered method synchronously.
pub async fn run_work(State(state): State<Arc<AppState>>, RawQuery(raw): RawQuery) -> TextResponse {
    let query = TaskQuery::parse(raw.as_deref());
    let name = match query.method() {
        Ok(name) => name,
        Err(resp) => return resp,
    };
    let Ok(method) = state.methods.resolve(name) else {
        return bad_request(format!("Invalid method: {name}"));
    };
    let params = match query.params(&state) {
        Ok(params) => params,
        Err(resp) => return resp,
    };

    let mut body = format!("Running {name}({})\n", state.codec.params_to_string(&params));
    info!(method = %name, "Manual trigger");

    let started = Instant::now();
    let result = AssertUnwindSafe(method.invoke(params))
        .catch_unwind()
        .await
        .unwrap_or_else(|_| {
            Err(DrudgeError::HandlerFailure {
                method: name.to_string(),
                reason: "panicked".into(),
            })
        });
    let elapsed_ms = started.elapsed().as_millis();

    match result {
        Ok(handled) => {
            let outcome = if handled { "handled" } else { "skipped" };
            body.push_str(&format!("Completed in {elapsed_ms}ms ({outcome})\n"));
            (StatusCode::OK, body)
        }
        Err(e) => {
            warn!(method = %name, error = %e, "Manual trigger failed");
            body.push_str(&format!("Failed after {elapsed_ms}ms: {}\n", reason(&e)));
            (StatusCode::INTERNAL_SERVER_ERROR, body)
        }
    }
}

/// `POST /tasks/enqueue`: hand a message to the configured sender.
pub async fn enqueue_work(
    State(state): State<Arc<AppState>>,
    RawQuery(raw): RawQuery,
) -> TextResponse {
    let Some(sender) = state.sender.as_ref() else {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            "No sender configured for this backend\n".to_string(),
        );
    };

    let query = TaskQuery::parse(raw.as_deref());
    let name = match query.method() {
        Ok(name) => name,
        Err(resp) => return resp,
    };
    if !state.methods.exists(name) {
        return bad_request(format!("Invalid method: {name}"));
    }
    let params = match query.params(&state) {
        Ok(params) => params,
        Err(resp) => return resp,
    };

    let rendered = state.codec.params_to_string(&params);
    let message = WorkMessage::queued(name, params, Utc::now());
    match sender.send(&message).await {
        Ok(()) => (StatusCode::ACCEPTED, format!("Queued {name}({rendered})\n")),
        Err(e) => {
            warn!(method = %name, error = %e, "Enqueue failed");
            (
                StatusCode::BAD_GATEWAY,
                format!("Failed to queue {name}: {e}\n"),
            )
        }
    }
}
