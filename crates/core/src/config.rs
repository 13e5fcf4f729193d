use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::DrudgeError;

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read a profiled env var: tries {PROFILE}_{KEY} first, falls back to {KEY}.
fn profiled_env_opt(profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = env_opt(&prefixed) {
            return Some(v);
        }
    }
    env_opt(key)
}

fn profiled_env_or(profile: &str, key: &str, default: &str) -> String {
    profiled_env_opt(profile, key).unwrap_or_else(|| default.to_string())
}

/// Parse a profiled env var, falling back to `default` when unset or unparseable.
fn profiled_env_parse<T: FromStr>(profile: &str, key: &str, default: T) -> T {
    match profiled_env_opt(profile, key) {
        Some(v) => v.parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %v, "ignoring unparseable config value");
            default
        }),
        None => default,
    }
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Active profile name (empty = default).
    pub profile: String,
    pub backend: BackendKind,
    pub scheduler: SchedulerConfig,
    pub aws: AwsConfig,
    pub sqs: SqsConfig,
    pub pubsub: PubSubConfig,
    pub server: ServerConfig,
}

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `DRUDGE_PROFILE` env var. When set (e.g. `PROD`),
    /// every key is first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn from_env() -> Self {
        let profile = env_or("DRUDGE_PROFILE", "").to_uppercase();
        Self::for_profile(&profile)
    }

    /// Build config for a specific named profile (empty string = default).
    pub fn for_profile(profile: &str) -> Self {
        let p = profile.to_uppercase();
        let p = p.as_str();
        Self {
            profile: p.to_string(),
            backend: profiled_env_parse(p, "WORKER_BACKEND", BackendKind::Local),
            scheduler: SchedulerConfig::from_env_profiled(p),
            aws: AwsConfig::from_env_profiled(p),
            sqs: SqsConfig::from_env_profiled(p),
            pubsub: PubSubConfig::from_env_profiled(p),
            server: ServerConfig::from_env_profiled(p),
        }
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    /// Check cross-field invariants of every section.
    pub fn validate(&self) -> Result<(), DrudgeError> {
        self.scheduler.validate()?;
        if self.backend == BackendKind::Sqs && self.sqs.queue_name.is_none() && self.sqs.queue_url.is_none() {
            return Err(DrudgeError::Config(
                "sqs backend needs SQS_QUEUE_NAME or SQS_QUEUE_URL".into(),
            ));
        }
        Ok(())
    }

    /// Print a redacted summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded (profile: {}):", self.profile_label());
        tracing::info!("  backend:     {}", self.backend);
        tracing::info!(
            "  scheduler:   max_concurrency={}, interval={}..{}ms (+{}ms), shutdown={}ms",
            self.scheduler.max_concurrency,
            self.scheduler.min_interval_ms,
            self.scheduler.max_interval_ms,
            self.scheduler.inc_interval_ms,
            self.scheduler.max_shutdown_ms
        );
        tracing::info!("  aws:         region={}", self.aws.region);
        tracing::info!(
            "  sqs:         queue={}, ack_policy={:?}",
            self.sqs.queue_label(),
            self.sqs.ack_policy
        );
        tracing::info!("  pubsub:      endpoint={}, channel={}", self.pubsub.endpoint, self.pubsub.channel);
        tracing::info!("  server:      {}:{}", self.server.host, self.server.port);
    }

    /// Return a redacted view safe for API responses (no secrets).
    pub fn redacted_summary(&self) -> serde_json::Value {
        serde_json::json!({
            "profile": self.profile_label(),
            "backend": self.backend.to_string(),
            "scheduler": self.scheduler,
            "aws": {
                "region": self.aws.region,
                "configured": self.aws.has_static_credentials(),
            },
            "sqs": {
                "queue": self.sqs.queue_label(),
                "wait_time_secs": self.sqs.wait_time_secs,
                "max_messages": self.sqs.max_messages,
                "ack_policy": self.sqs.ack_policy,
            },
            "pubsub": { "endpoint": self.pubsub.endpoint, "channel": self.pubsub.channel },
            "server": { "host": self.server.host, "port": self.server.port },
        })
    }
}

// ── Backend selection ─────────────────────────────────────────

/// Which queue backend the worker polls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Local,
    Sqs,
    PubSub,
}

impl FromStr for BackendKind {
    type Err = DrudgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "sqs" => Ok(Self::Sqs),
            "pubsub" | "pub-sub" | "zmq" => Ok(Self::PubSub),
            other => Err(DrudgeError::Config(format!("unknown backend: {other}"))),
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Local => "local",
            Self::Sqs => "sqs",
            Self::PubSub => "pubsub",
        };
        f.write_str(name)
    }
}

// ── Scheduler ─────────────────────────────────────────────────

/// Worker-pool sizing and idle backoff.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerConfig {
    /// Upper bound on concurrently running poll loops.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    /// Idle wake-up interval right after work was found.
    #[serde(default)]
    pub min_interval_ms: u64,
    /// Cap on the idle wake-up interval.
    #[serde(default = "default_max_interval")]
    pub max_interval_ms: u64,
    /// Amount added to the idle interval on every empty wake-up.
    #[serde(default = "default_inc_interval")]
    pub inc_interval_ms: u64,
    /// Budget for draining in-flight loops during shutdown.
    #[serde(default = "default_max_shutdown")]
    pub max_shutdown_ms: u64,
}

fn default_max_concurrency() -> usize { 10 }
fn default_max_interval() -> u64 { 60_000 }
fn default_inc_interval() -> u64 { 5_000 }
fn default_max_shutdown() -> u64 { 120_000 }

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            min_interval_ms: 0,
            max_interval_ms: default_max_interval(),
            inc_interval_ms: default_inc_interval(),
            max_shutdown_ms: default_max_shutdown(),
        }
    }
}

impl SchedulerConfig {
    fn from_env_profiled(p: &str) -> Self {
        let d = Self::default();
        Self {
            max_concurrency: profiled_env_parse(p, "WORKER_MAX_CONCURRENCY", d.max_concurrency),
            min_interval_ms: profiled_env_parse(p, "WORKER_MIN_INTERVAL_MS", d.min_interval_ms),
            max_interval_ms: profiled_env_parse(p, "WORKER_MAX_INTERVAL_MS", d.max_interval_ms),
            inc_interval_ms: profiled_env_parse(p, "WORKER_INC_INTERVAL_MS", d.inc_interval_ms),
            max_shutdown_ms: profiled_env_parse(p, "WORKER_MAX_SHUTDOWN_MS", d.max_shutdown_ms),
        }
    }

    pub fn validate(&self) -> Result<(), DrudgeError> {
        if self.max_concurrency == 0 {
            return Err(DrudgeError::Config("maxConcurrency must be at least 1".into()));
        }
        if self.min_interval_ms > self.max_interval_ms {
            return Err(DrudgeError::Config(format!(
                "minIntervalMs ({}) must not exceed maxIntervalMs ({})",
                self.min_interval_ms, self.max_interval_ms
            )));
        }
        Ok(())
    }

    pub fn max_shutdown(&self) -> Duration {
        Duration::from_millis(self.max_shutdown_ms)
    }
}

// ── AWS ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AwsConfig {
    pub region: String,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub session_token: Option<String>,
    pub endpoint_url: Option<String>,
}

impl AwsConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            region: profiled_env_or(p, "AWS_REGION", "us-east-1"),
            access_key_id: profiled_env_opt(p, "AWS_ACCESS_KEY_ID"),
            secret_access_key: profiled_env_opt(p, "AWS_SECRET_ACCESS_KEY"),
            session_token: profiled_env_opt(p, "AWS_SESSION_TOKEN"),
            endpoint_url: profiled_env_opt(p, "QUEUE_AWS_ENDPOINT_URL"),
        }
    }

    pub fn has_static_credentials(&self) -> bool {
        self.access_key_id.is_some() && self.secret_access_key.is_some()
    }
}

// ── SQS ───────────────────────────────────────────────────────

/// When a cloud-queue message is deleted after its handler ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AckPolicy {
    /// Delete after every successful invocation, handled or skipped.
    #[default]
    Always,
    /// Delete only when the handler reported it handled the message;
    /// skipped messages are left for redelivery.
    Handled,
}

impl FromStr for AckPolicy {
    type Err = DrudgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "always" => Ok(Self::Always),
            "handled" | "handled-only" => Ok(Self::Handled),
            other => Err(DrudgeError::Config(format!("unknown ack policy: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SqsConfig {
    /// Queue name, resolved to a URL when the backend starts.
    pub queue_name: Option<String>,
    /// Explicit queue URL; takes precedence over `queue_name`.
    pub queue_url: Option<String>,
    /// Long-poll wait, capped at 20s by SQS.
    pub wait_time_secs: i32,
    /// Messages per receive, capped at 10 by SQS.
    pub max_messages: i32,
    pub visibility_timeout_secs: i32,
    pub ack_policy: AckPolicy,
    /// Message group for FIFO queues (senders only).
    pub message_group_id: Option<String>,
}

impl SqsConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            queue_name: profiled_env_opt(p, "SQS_QUEUE_NAME"),
            queue_url: profiled_env_opt(p, "SQS_QUEUE_URL"),
            wait_time_secs: profiled_env_parse(p, "SQS_WAIT_TIME_SECS", 20),
            max_messages: profiled_env_parse(p, "SQS_MAX_MESSAGES", 10),
            visibility_timeout_secs: profiled_env_parse(p, "SQS_VISIBILITY_TIMEOUT_SECS", 30),
            ack_policy: profiled_env_parse(p, "SQS_ACK_POLICY", AckPolicy::Always),
            message_group_id: profiled_env_opt(p, "SQS_MESSAGE_GROUP_ID"),
        }
    }

    pub fn queue_label(&self) -> &str {
        self.queue_url
            .as_deref()
            .or(self.queue_name.as_deref())
            .unwrap_or("(none)")
    }
}

// ── Pub/sub ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PubSubConfig {
    /// ZeroMQ endpoint of the publisher, e.g. `tcp://127.0.0.1:5556`.
    pub endpoint: String,
    /// Channel (topic prefix) the worker subscribes to.
    pub channel: String,
    /// How long one poll waits for a message before reporting no work.
    pub recv_timeout_ms: u64,
}

impl PubSubConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            endpoint: profiled_env_or(p, "PUBSUB_ENDPOINT", "tcp://127.0.0.1:5556"),
            channel: profiled_env_or(p, "PUBSUB_CHANNEL", "work"),
            recv_timeout_ms: profiled_env_parse(p, "PUBSUB_RECV_TIMEOUT_MS", 1_000),
        }
    }

    pub fn recv_timeout(&self) -> Duration {
        Duration::from_millis(self.recv_timeout_ms)
    }
}

// ── Server ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            host: profiled_env_or(p, "HOST", "0.0.0.0"),
            port: profiled_env_parse(p, "PORT", 8081),
        }
    }
}
