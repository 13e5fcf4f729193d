use std::fmt;

use serde::Serialize;

/// Lifecycle of a [`WorkerPool`](crate::WorkerPool):
/// `NotStarted -> Starting -> Running -> Stopping -> Stopped`.
/// `Stopped` is terminal and reachable from every other state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolState {
    NotStarted,
    Starting,
    Running,
    Stopping,
    Stopped,
}

impl fmt::Display for PoolState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PoolState::NotStarted => "not started",
            PoolState::Starting => "starting",
            PoolState::Running => "running",
            PoolState::Stopping => "stopping",
            PoolState::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// Point-in-time view of a pool, for the admin surface.
#[derive(Debug, Clone, Serialize)]
pub struct PoolStats {
    pub name: String,
    pub state: PoolState,
    /// Live poll loops, counting a pending wake-up as one.
    pub workers: usize,
    pub max_concurrency: usize,
    /// Current idle backoff interval.
    pub interval_ms: u64,
    /// Poll loops run so far, including those started by a wake-up.
    pub loops_launched: u64,
    pub wakeups_scheduled: u64,
    /// Wake-ups armed and not yet fired; never more than 1.
    pub wakeups_pending: usize,
    /// Highest `wakeups_pending` ever observed.
    pub wakeups_peak: usize,
}
