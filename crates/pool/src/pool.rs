//! Adaptive worker pool.
//!
//! Each poll loop keeps polling while the backend reports work and retires
//! the moment it does not. Work found by a loop may launch one more loop, up
//! to `max_concurrency`. When the last loop retires it leaves a single
//! delayed wake-up behind, whose interval grows by `inc_interval_ms` on
//! every idle round and resets to `min_interval_ms` as soon as work shows up.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicIsize, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use drudge_core::SchedulerConfig;
use drudge_queue::Backend;
use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::oneshot;
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument, warn};

use crate::error::PoolError;
use crate::types::{PoolState, PoolStats};

/// Scheduler that drives a [`Backend`] with a self-sizing set of poll loops.
#[derive(Clone)]
pub struct WorkerPool {
    inner: Arc<Inner>,
}

struct Inner {
    name: String,
    config: SchedulerConfig,
    backend: Arc<dyn Backend>,
    state: Mutex<PoolState>,
    running: AtomicBool,
    worker_count: AtomicIsize,
    interval_ms: AtomicU64,
    /// `None` once shutdown has begun; spawning is then rejected.
    tasks: Mutex<Option<JoinSet<()>>>,
    /// Cancel handle of the pending wake-up, if any.
    wakeup: Mutex<Option<oneshot::Sender<()>>>,
    loops_launched: AtomicU64,
    wakeups_scheduled: AtomicU64,
    /// Wake-up tasks spawned and not yet fired or cancelled.
    wakeups_armed: AtomicUsize,
    wakeups_peak: AtomicUsize,
}

impl WorkerPool {
    pub fn new(name: impl Into<String>, config: SchedulerConfig, backend: Arc<dyn Backend>) -> Self {
        let min = config.min_interval_ms;
        Self {
            inner: Arc::new(Inner {
                name: name.into(),
                config,
                backend,
                state: Mutex::new(PoolState::NotStarted),
                running: AtomicBool::new(false),
                worker_count: AtomicIsize::new(0),
                interval_ms: AtomicU64::new(min),
                tasks: Mutex::new(None),
                wakeup: Mutex::new(None),
                loops_launched: AtomicU64::new(0),
                wakeups_scheduled: AtomicU64::new(0),
                wakeups_armed: AtomicUsize::new(0),
                wakeups_peak: AtomicUsize::new(0),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.inner.backend
    }

    /// Start the backend and launch the first poll loop.
    ///
    /// Only valid from [`PoolState::NotStarted`]. If the backend fails to
    /// start the pool goes back to `NotStarted`. A `stop()` that lands while
    /// the backend is starting wins: the backend is stopped again and this
    /// returns `InvalidState`.
    #[instrument(skip_all, fields(pool = %self.inner.name, backend = %self.inner.backend.name()))]
    pub async fn start(&self) -> Result<(), PoolError> {
        let inner = &self.inner;
        {
            let mut state = lock(&inner.state);
            if *state != PoolState::NotStarted {
                return Err(PoolError::InvalidState {
                    expected: PoolState::NotStarted,
                    actual: *state,
                });
            }
            *state = PoolState::Starting;
        }

        if let Err(e) = inner.backend.start().await {
            let mut state = lock(&inner.state);
            if *state == PoolState::Starting {
                *state = PoolState::NotStarted;
            }
            return Err(PoolError::BackendStart(e));
        }

        let interrupted = {
            let mut state = lock(&inner.state);
            if *state == PoolState::Starting {
                *lock(&inner.tasks) = Some(JoinSet::new());
                inner.worker_count.store(1, Ordering::SeqCst);
                inner
                    .interval_ms
                    .store(inner.config.min_interval_ms, Ordering::SeqCst);
                inner.running.store(true, Ordering::SeqCst);
                *state = PoolState::Running;
                None
            } else {
                Some(*state)
            }
        };
        if let Some(actual) = interrupted {
            info!("Worker pool stopped while starting, releasing backend");
            inner.stop_backend().await;
            return Err(PoolError::InvalidState {
                expected: PoolState::Starting,
                actual,
            });
        }

        info!(
            max_concurrency = inner.config.max_concurrency,
            min_interval_ms = inner.config.min_interval_ms,
            max_interval_ms = inner.config.max_interval_ms,
            inc_interval_ms = inner.config.inc_interval_ms,
            "Worker pool started"
        );

        if !inner.launch(Arc::clone(inner).run_loop()) {
            inner.worker_count.fetch_sub(1, Ordering::SeqCst);
        }
        Ok(())
    }

    /// Stop polling, cancel the pending wake-up, stop the backend and wait
    /// up to `max_shutdown_ms` for in-flight loops before aborting them.
    ///
    /// Terminal. Calling it again, or on a pool that never started, is a
    /// no-op apart from the state change. During `start()` it only marks
    /// the pool stopped; `start()` then releases the backend itself.
    #[instrument(skip_all, fields(pool = %self.inner.name))]
    pub async fn stop(&self) {
        let inner = &self.inner;
        {
            let mut state = lock(&inner.state);
            match *state {
                PoolState::NotStarted => {
                    *state = PoolState::Stopped;
                    info!("Worker pool stopped before start");
                    return;
                }
                PoolState::Starting => {
                    *state = PoolState::Stopped;
                    info!("Worker pool stopped while starting");
                    return;
                }
                PoolState::Stopping | PoolState::Stopped => return,
                PoolState::Running => *state = PoolState::Stopping,
            }
        }

        inner.running.store(false, Ordering::SeqCst);
        inner.cancel_wakeup();

        inner.stop_backend().await;

        let budget = inner.config.max_shutdown();
        let tasks = lock(&inner.tasks).take();
        // A loop may have armed a wake-up between the first cancel and closing the set.
        inner.cancel_wakeup();

        if let Some(mut tasks) = tasks {
            let drained = tokio::time::timeout(budget, async {
                while tasks.join_next().await.is_some() {}
            })
            .await;
            if drained.is_err() {
                warn!(remaining = tasks.len(), "Shutdown budget exhausted, aborting poll loops");
                tasks.shutdown().await;
            }
        }

        inner.worker_count.store(0, Ordering::SeqCst);
        *lock(&inner.state) = PoolState::Stopped;
        info!("Worker pool stopped");
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> PoolState {
        self.inner.state()
    }

    /// Live poll loops, counting a pending wake-up as one.
    pub fn worker_count(&self) -> usize {
        self.inner.worker_count.load(Ordering::SeqCst).max(0) as usize
    }

    /// Delay the next idle wake-up will use.
    pub fn current_interval(&self) -> Duration {
        Duration::from_millis(self.inner.interval_ms.load(Ordering::SeqCst))
    }

    pub fn stats(&self) -> PoolStats {
        let inner = &self.inner;
        PoolStats {
            name: inner.name.clone(),
            state: inner.state(),
            workers: self.worker_count(),
            max_concurrency: inner.config.max_concurrency,
            interval_ms: inner.interval_ms.load(Ordering::SeqCst),
            loops_launched: inner.loops_launched.load(Ordering::Relaxed),
            wakeups_scheduled: inner.wakeups_scheduled.load(Ordering::Relaxed),
            wakeups_pending: inner.wakeups_armed.load(Ordering::SeqCst),
            wakeups_peak: inner.wakeups_peak.load(Ordering::SeqCst),
        }
    }
}

impl Inner {
    fn state(&self) -> PoolState {
        *lock(&self.state)
    }

    /// Backend stop bounded by the shutdown budget. Failures are logged.
    async fn stop_backend(&self) {
        let budget = self.config.max_shutdown();
        match tokio::time::timeout(budget, self.backend.stop()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(pool = %self.name, error = %e, "Backend stop failed"),
            Err(_) => warn!(
                pool = %self.name,
                budget_ms = budget.as_millis() as u64,
                "Backend stop timed out"
            ),
        }
    }

    /// One poll loop. Boxed because loops launch further loops.
    fn run_loop(self: Arc<Self>) -> BoxFuture<'static, ()> {
        async move {
            self.loops_launched.fetch_add(1, Ordering::Relaxed);
            while self.running.load(Ordering::SeqCst) {
                let found = match AssertUnwindSafe(self.backend.poll()).catch_unwind().await {
                    Ok(Ok(found)) => found,
                    Ok(Err(e)) => {
                        warn!(pool = %self.name, error = %e, "Poll failed");
                        false
                    }
                    Err(_) => {
                        error!(pool = %self.name, "Poll panicked");
                        false
                    }
                };

                if found {
                    self.grow();
                } else {
                    self.shrink();
                    return;
                }
            }
        }
        .boxed()
    }

    fn grow(self: &Arc<Self>) {
        let max = self.config.max_concurrency as isize;
        if self.worker_count.load(Ordering::SeqCst) < max {
            let count = self.worker_count.fetch_add(1, Ordering::SeqCst) + 1;
            if count > max {
                // Lost the race to another grow.
                self.worker_count.fetch_sub(1, Ordering::SeqCst);
            } else if self.launch(Arc::clone(self).run_loop()) {
                debug!(pool = %self.name, workers = count, "Grew pool");
            } else {
                self.worker_count.fetch_sub(1, Ordering::SeqCst);
            }
        }
        self.interval_ms
            .store(self.config.min_interval_ms, Ordering::SeqCst);
    }

    fn shrink(self: &Arc<Self>) {
        let remaining = self.worker_count.fetch_sub(1, Ordering::SeqCst) - 1;
        if remaining > 0 {
            debug!(pool = %self.name, workers = remaining, "Poll loop retired");
            return;
        }

        // Last one out: exactly one retiring loop gets to arm the wake-up.
        let count = self.worker_count.fetch_add(1, Ordering::SeqCst) + 1;
        if count != 1 {
            self.worker_count.fetch_sub(1, Ordering::SeqCst);
            return;
        }
        if !self.running.load(Ordering::SeqCst) {
            return;
        }

        let interval = self.backoff();
        self.schedule_wakeup(Duration::from_millis(interval));
    }

    /// Grow the idle interval by one increment, capped. Returns the new value.
    fn backoff(&self) -> u64 {
        let (inc, max) = (self.config.inc_interval_ms, self.config.max_interval_ms);
        let next = |cur: u64| cur.saturating_add(inc).min(max);
        let prev = self
            .interval_ms
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |cur| Some(next(cur)))
            .unwrap_or_else(|cur| cur);
        next(prev)
    }

    fn schedule_wakeup(self: &Arc<Self>, delay: Duration) {
        let (cancel_tx, cancel_rx) = oneshot::channel::<()>();
        let armed = ArmedWakeup::arm(self);
        let inner = Arc::clone(self);
        let wakeup = async move {
            let fired = tokio::select! {
                _ = tokio::time::sleep(delay) => true,
                _ = cancel_rx => false,
            };
            drop(armed);
            if fired {
                lock(&inner.wakeup).take();
                inner.run_loop().await;
            } else {
                debug!(pool = %inner.name, "Wake-up cancelled");
            }
        }
        .boxed();

        *lock(&self.wakeup) = Some(cancel_tx);
        if self.launch(wakeup) {
            self.wakeups_scheduled.fetch_add(1, Ordering::Relaxed);
            debug!(pool = %self.name, delay_ms = delay.as_millis() as u64, "Scheduled wake-up");
        } else {
            lock(&self.wakeup).take();
            self.worker_count.fetch_sub(1, Ordering::SeqCst);
        }
    }

    fn cancel_wakeup(&self) {
        if let Some(cancel) = lock(&self.wakeup).take() {
            // Already fired is fine; that loop sees `running == false`.
            let _ = cancel.send(());
            debug!(pool = %self.name, "Cancelled pending wake-up");
        }
    }

    /// Spawn onto the pool's task set, reaping finished tasks first.
    fn spawn(&self, task: BoxFuture<'static, ()>) -> Result<(), PoolError> {
        let mut tasks = lock(&self.tasks);
        let set = tasks.as_mut().ok_or(PoolError::SubmissionRejected)?;
        while set.try_join_next().is_some() {}
        set.spawn(task);
        Ok(())
    }

    /// Spawn, swallowing rejections that are expected during shutdown.
    fn launch(&self, task: BoxFuture<'static, ()>) -> bool {
        match self.spawn(task) {
            Ok(()) => true,
            Err(e) => {
                if self.running.load(Ordering::SeqCst) {
                    error!(pool = %self.name, error = %e, "Failed to launch poll loop");
                }
                false
            }
        }
    }
}

/// Counts a wake-up as armed from scheduling until it fires, is cancelled
/// or its task is dropped.
struct ArmedWakeup(Arc<Inner>);

impl ArmedWakeup {
    fn arm(inner: &Arc<Inner>) -> Self {
        let armed = inner.wakeups_armed.fetch_add(1, Ordering::SeqCst) + 1;
        inner.wakeups_peak.fetch_max(armed, Ordering::SeqCst);
        Self(Arc::clone(inner))
    }
}

impl Drop for ArmedWakeup {
    fn drop(&mut self) {
        self.0.wakeups_armed.fetch_sub(1, Ordering::SeqCst);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
