//! Synchronizer — decides when the live repository is flushed to its
//! backend.
//!
//! Lifecycle: `new` (stopped) → [`Synchronizer::start`] restores the
//! snapshot if enabled and spawns the flush task (running) → the shutdown
//! signal stops the ticker and performs one final save (draining) →
//! [`Synchronizer::done`] returns once that save was attempted (stopped).
//! The caller then invokes [`Synchronizer::close`].
//!
//! Persistence is best effort. Save failures on the tick, on the
//! write-through path, or at shutdown are logged and never surface to
//! metric producers.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use tally_state::{Backend, Metric, MetricKey, Repository, StateResult};

use crate::backoff::Backoff;

/// How mutations reach the backend. The two modes never mix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushMode {
    /// Every mutation is saved before the call returns.
    WriteThrough,
    /// A background ticker saves on this cadence.
    Periodic(Duration),
}

impl FlushMode {
    /// Zero means write-through, anything else periodic.
    pub fn from_interval(interval: Duration) -> Self {
        if interval.is_zero() {
            FlushMode::WriteThrough
        } else {
            FlushMode::Periodic(interval)
        }
    }
}

/// Scheduling and restore policy.
#[derive(Debug, Clone)]
pub struct SyncPolicy {
    pub mode: FlushMode,
    /// Load the backend snapshot on start.
    pub restore: bool,
    /// Total load attempts on start (at least one).
    pub restore_attempts: u32,
    /// Delay before the first retry; doubled after each failure.
    pub restore_backoff: Duration,
    /// Upper bound for the retry delay.
    pub restore_backoff_max: Duration,
}

impl SyncPolicy {
    pub fn new(interval: Duration, restore: bool) -> Self {
        Self {
            mode: FlushMode::from_interval(interval),
            restore,
            restore_attempts: 3,
            restore_backoff: Duration::from_secs(1),
            restore_backoff_max: Duration::from_secs(5),
        }
    }

    pub fn with_restore_retries(mut self, attempts: u32, backoff: Duration) -> Self {
        self.restore_attempts = attempts.max(1);
        self.restore_backoff = backoff;
        self
    }
}

/// Serializes saves so concurrent write-through callers and the ticker
/// never interleave writes to the backend. The snapshot is taken after
/// the save lock is acquired, so the last save always sees the newest
/// state.
struct Flusher {
    repo: Repository,
    backend: Arc<dyn Backend>,
    save_lock: tokio::sync::Mutex<()>,
}

impl Flusher {
    async fn save(&self) -> StateResult<usize> {
        let _guard = self.save_lock.lock().await;
        let snapshot = self.repo.get_all();
        self.backend.save(&snapshot).await?;
        Ok(snapshot.len())
    }

    async fn save_logged(&self, reason: &'static str) {
        match self.save().await {
            Ok(metrics) => debug!(backend = self.backend.name(), reason, metrics, "snapshot saved"),
            Err(e) => error!(
                backend = self.backend.name(),
                reason,
                error = %e,
                "snapshot save failed"
            ),
        }
    }
}

/// Flush task slot. `Starting` is claimed before restore runs, so a
/// second `start` sees the synchronizer as taken.
enum FlushTask {
    Idle,
    Starting,
    Running(JoinHandle<()>),
}

/// Composes a [`Repository`] with a [`Backend`] and a [`SyncPolicy`].
pub struct Synchronizer {
    repo: Repository,
    flusher: Arc<Flusher>,
    policy: SyncPolicy,
    task: Mutex<FlushTask>,
}

impl Synchronizer {
    pub fn new(repo: Repository, backend: Arc<dyn Backend>, policy: SyncPolicy) -> Self {
        let flusher = Arc::new(Flusher {
            repo: repo.clone(),
            backend,
            save_lock: tokio::sync::Mutex::new(()),
        });
        Self {
            repo,
            flusher,
            policy,
            task: Mutex::new(FlushTask::Idle),
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.flusher.backend.name()
    }

    /// Restore (if enabled) and spawn the flush task.
    ///
    /// A failed restore is logged and the repository starts empty. The
    /// task runs until `shutdown` flips to `true` or its sender is dropped.
    pub async fn start(&self, shutdown: watch::Receiver<bool>) {
        {
            let mut slot = self.task_slot();
            if !matches!(*slot, FlushTask::Idle) {
                warn!("synchronizer already started");
                return;
            }
            *slot = FlushTask::Starting;
        }

        if self.policy.restore {
            match self.restore().await {
                Ok(metrics) => info!(backend = self.backend_name(), metrics, "snapshot restored"),
                Err(e) => error!(
                    backend = self.backend_name(),
                    error = %e,
                    "snapshot restore failed, starting empty"
                ),
            }
        }

        let handle = tokio::spawn(run_flush_loop(self.flusher.clone(), self.policy.mode, shutdown));
        *self.task_slot() = FlushTask::Running(handle);
    }

    fn task_slot(&self) -> std::sync::MutexGuard<'_, FlushTask> {
        self.task.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Load the backend snapshot into the repository, retrying with
    /// backoff. Nothing is applied unless the whole snapshot loaded.
    pub async fn restore(&self) -> StateResult<usize> {
        let mut backoff = Backoff::new(self.policy.restore_backoff, self.policy.restore_backoff_max);
        let mut attempt = 1;
        let snapshot = loop {
            match self.flusher.backend.load().await {
                Ok(snapshot) => break snapshot,
                Err(e) if attempt < self.policy.restore_attempts && !e.is_validation() => {
                    let delay = backoff.next_delay();
                    warn!(attempt, error = %e, ?delay, "snapshot load failed, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        };

        for metric in &snapshot {
            self.repo.set(metric)?;
        }
        Ok(snapshot.len())
    }

    /// Wait until the flush task has made its final save attempt.
    /// Returns immediately if the synchronizer was never started.
    pub async fn done(&self) {
        let handle = {
            let mut slot = self.task_slot();
            match std::mem::replace(&mut *slot, FlushTask::Idle) {
                FlushTask::Running(handle) => Some(handle),
                other => {
                    *slot = other;
                    None
                }
            }
        };
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!(error = %e, "flush task ended abnormally");
            }
        }
    }

    /// Close the backend. Call after [`done`](Self::done).
    pub async fn close(&self) -> StateResult<()> {
        self.flusher.backend.close().await
    }

    /// Save the current state now, surfacing any error.
    pub async fn flush(&self) -> StateResult<()> {
        self.flusher.save().await.map(|_| ())
    }

    /// Aggregate a metric; in write-through mode also save before returning.
    pub async fn collect(&self, metric: Metric) -> StateResult<Metric> {
        let stored = self.repo.collect(metric)?;
        self.after_mutation().await;
        Ok(stored)
    }

    /// Aggregate a batch atomically; write-through saves once.
    pub async fn collect_batch(&self, metrics: Vec<Metric>) -> StateResult<Vec<Metric>> {
        let stored = self.repo.collect_batch(metrics)?;
        self.after_mutation().await;
        Ok(stored)
    }

    pub async fn delete(&self, key: &MetricKey) -> StateResult<()> {
        self.repo.delete(key)?;
        self.after_mutation().await;
        Ok(())
    }

    pub fn get(&self, key: &MetricKey) -> Option<Metric> {
        self.repo.get(key)
    }

    pub fn get_all(&self) -> Vec<Metric> {
        self.repo.get_all()
    }

    /// Repository and backend liveness.
    pub async fn ping(&self) -> StateResult<()> {
        self.repo.ping()?;
        self.flusher.backend.ping().await
    }

    async fn after_mutation(&self) {
        if self.policy.mode == FlushMode::WriteThrough {
            self.flusher.save_logged("write-through").await;
        }
    }
}

async fn run_flush_loop(flusher: Arc<Flusher>, mode: FlushMode, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = match mode {
        FlushMode::Periodic(period) => {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            Some(ticker)
        }
        FlushMode::WriteThrough => None,
    };
    info!(backend = flusher.backend.name(), ?mode, "synchronizer started");

    loop {
        if *shutdown.borrow_and_update() {
            break;
        }
        tokio::select! {
            _ = next_tick(&mut ticker) => flusher.save_logged("tick").await,
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }

    info!(backend = flusher.backend.name(), "synchronizer draining");
    flusher.save_logged("shutdown").await;
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}
