//! Adaptive worker pool.
//!
//! Submitted tasks wait in `pending` until the control loop admits them into
//! `active` and starts their worker process. Finished workers are reaped into
//! `completed`. When the host is under pressure the most recently admitted
//! worker is evicted: terminated, closed and replaced in `pending` by its
//! rebirth, which takes over the caller's handle.
//!
//! The loop admits or evicts at most one worker per tick. With a timeout set,
//! an overdue worker is sent SIGALRM every tick and is killed, not reborn,
//! once its grace period runs out.

mod config;
mod health;

pub use config::{
    DEFAULT_HIGH_THRESHOLD, DEFAULT_LOW_THRESHOLD, DEFAULT_POLL_INTERVAL, DEFAULT_TIMEOUT_GRACE,
    PoolConfig, Thresholds, default_max_workers,
};
pub use health::{HealthPolicy, Status};

use crate::error::{CirnoError, Result};
use crate::handle::Handle;
use crate::metrics::{ResourceMonitor, ResourceUsage, SysinfoMonitor};
use crate::task::{Task, TaskFailure};
use crate::worker::{Worker, WorkerProgram};
use rand::Rng;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

/// Attempts to start a worker before its task is failed with
/// [`TaskFailure::SPAWN_FAILED`].
pub const MAX_SPAWN_ATTEMPTS: u32 = 3;

/// Snapshot of pool counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    /// Workers waiting to be admitted.
    pub pending: usize,
    /// Workers with a running process.
    pub active: usize,
    /// Workers with a settled outcome.
    pub completed: usize,
    /// Tasks accepted by `submit`.
    pub submitted: u64,
    /// Workers evicted under resource pressure.
    pub evictions: u64,
    /// Failed attempts to start a worker process.
    pub spawn_failures: u64,
    /// Tasks that ended by exceeding the timeout.
    pub timeouts: u64,
}

/// The active set and its size, guarded together.
#[derive(Default)]
struct ActiveSet {
    workers: Vec<Arc<Worker>>,
    count: usize,
}

struct Shared {
    policy: HealthPolicy,
    poll_interval: Duration,
    timeout: Option<Duration>,
    timeout_grace: Duration,
    program: Arc<WorkerProgram>,
    monitor: Arc<dyn ResourceMonitor>,

    pending: Mutex<Vec<Arc<Worker>>>,
    active: Mutex<ActiveSet>,
    completed: Mutex<Vec<Arc<Worker>>>,

    /// Held for the duration of a tick; a worker in transit between two
    /// collections is only visible while it is held.
    tick: Mutex<()>,

    shutdown: AtomicBool,
    closed: AtomicBool,

    next_id: AtomicU64,
    submitted: AtomicU64,
    evictions: AtomicU64,
    spawn_failures: AtomicU64,
    timeouts: AtomicU64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Adaptive pool of worker processes.
pub struct Pool {
    shared: Arc<Shared>,
    stop: Mutex<Option<Sender<()>>>,
    control: Mutex<Option<JoinHandle<()>>>,
}

impl Pool {
    /// Create a pool sampling the host through `sysinfo`.
    pub fn new(config: PoolConfig) -> Result<Self> {
        Self::with_monitor(config, Arc::new(SysinfoMonitor::new()))
    }

    /// Create a pool with a custom resource monitor.
    pub fn with_monitor(config: PoolConfig, monitor: Arc<dyn ResourceMonitor>) -> Result<Self> {
        config.validate()?;

        let mut program = match config.program.clone() {
            Some(program) => program,
            None => WorkerProgram::current_exe()?,
        };
        if let Some(dir) = &config.output_dir {
            std::fs::create_dir_all(dir).map_err(|e| {
                CirnoError::InvalidConfig(format!(
                    "cannot create output directory {}: {}",
                    dir.display(),
                    e
                ))
            })?;
            program = program.output_dir(dir.clone());
        }

        let shared = Arc::new(Shared {
            policy: HealthPolicy::from_config(&config),
            poll_interval: config.poll_interval,
            timeout: config.timeout,
            timeout_grace: config.timeout_grace,
            program: Arc::new(program),
            monitor,
            pending: Mutex::new(Vec::new()),
            active: Mutex::new(ActiveSet::default()),
            completed: Mutex::new(Vec::new()),
            tick: Mutex::new(()),
            shutdown: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            next_id: AtomicU64::new(0),
            submitted: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            spawn_failures: AtomicU64::new(0),
            timeouts: AtomicU64::new(0),
        });

        let (stop_tx, stop_rx) = mpsc::channel();
        let loop_shared = Arc::clone(&shared);
        let control = std::thread::Builder::new()
            .name("cirno-control".to_string())
            .spawn(move || loop_shared.run(stop_rx))?;

        tracing::info!(
            max_workers = config.max_workers,
            min_workers = config.min_workers,
            smart = config.smart,
            timeout_secs = config.timeout.map(|t| t.as_secs_f64()),
            poll_interval_ms = config.poll_interval.as_millis() as u64,
            "Pool started"
        );

        Ok(Self {
            shared,
            stop: Mutex::new(Some(stop_tx)),
            control: Mutex::new(Some(control)),
        })
    }

    /// Queue a task and return its handle.
    pub fn submit(&self, task: Task) -> Result<Handle> {
        let mut pending = lock(&self.shared.pending);
        if self.shared.shutdown.load(Ordering::Acquire) {
            return Err(CirnoError::ShutDown);
        }

        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        let worker = Arc::new(Worker::new(
            id,
            Arc::new(task),
            Arc::clone(&self.shared.program),
            Arc::clone(&self.shared.monitor),
        ));
        let handle = worker.handle();
        tracing::trace!(worker_id = id, task = %worker.task(), "Task submitted");
        pending.push(worker);
        self.shared.submitted.fetch_add(1, Ordering::Relaxed);

        Ok(handle)
    }

    /// Stop accepting tasks. Queued and running tasks carry on.
    pub fn shutdown(&self) {
        // Taken under the pending lock so no submit straddles the flag.
        let _pending = lock(&self.shared.pending);
        if !self.shared.shutdown.swap(true, Ordering::AcqRel) {
            tracing::info!("Pool shut down");
        }
    }

    /// Whether `shutdown` has been called.
    pub fn is_shutdown(&self) -> bool {
        self.shared.shutdown.load(Ordering::Acquire)
    }

    /// Whether `close` has completed.
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Wait for every task to settle, then stop the control loop.
    ///
    /// Polls at the pool's poll interval with no upper time bound. Fails if
    /// [`shutdown`](Self::shutdown) was not called first.
    pub fn close(&self) -> Result<()> {
        if !self.is_shutdown() {
            return Err(CirnoError::NotShutDown);
        }
        if self.is_closed() {
            return Ok(());
        }

        loop {
            let outstanding = {
                let _tick = lock(&self.shared.tick);
                lock(&self.shared.pending).len() + lock(&self.shared.active).count
            };
            if outstanding == 0 {
                break;
            }
            tracing::trace!(outstanding, "Waiting for workers");
            std::thread::sleep(self.shared.poll_interval);
        }

        self.shared.closed.store(true, Ordering::Release);
        self.stop_control();

        let stats = self.stats();
        tracing::info!(
            completed = stats.completed,
            evictions = stats.evictions,
            "Pool closed"
        );
        Ok(())
    }

    /// Number of workers with a running process.
    pub fn active_count(&self) -> usize {
        lock(&self.shared.active).count
    }

    /// Snapshot of pool counters.
    ///
    /// Taken between ticks, so `pending + active + completed == submitted`.
    pub fn stats(&self) -> PoolStats {
        let _tick = lock(&self.shared.tick);
        let (pending, submitted) = {
            let pending = lock(&self.shared.pending);
            (pending.len(), self.shared.submitted.load(Ordering::Relaxed))
        };
        PoolStats {
            pending,
            active: self.active_count(),
            completed: lock(&self.shared.completed).len(),
            submitted,
            evictions: self.shared.evictions.load(Ordering::Relaxed),
            spawn_failures: self.shared.spawn_failures.load(Ordering::Relaxed),
            timeouts: self.shared.timeouts.load(Ordering::Relaxed),
        }
    }

    /// Wake the control loop and wait for it to exit.
    fn stop_control(&self) {
        // Dropping the sender disconnects the loop's receiver.
        drop(lock(&self.stop).take());
        if let Some(control) = lock(&self.control).take()
            && control.join().is_err()
        {
            tracing::error!("Control loop panicked");
        }
    }
}

impl Drop for Pool {
    fn drop(&mut self) {
        if self.is_closed() {
            return;
        }
        self.shared.closed.store(true, Ordering::Release);
        self.stop_control();

        let active = std::mem::take(&mut lock(&self.shared.active).workers);
        if !active.is_empty() {
            tracing::warn!(
                workers = active.len(),
                "Pool dropped without close; terminating active workers"
            );
        }
        for worker in active {
            worker.close(true);
        }
        lock(&self.shared.active).count = 0;
    }
}

impl Shared {
    fn run(&self, stop: mpsc::Receiver<()>) {
        loop {
            if self.closed.load(Ordering::Acquire) {
                break;
            }
            self.tick();
            match stop.recv_timeout(self.poll_interval) {
                Err(RecvTimeoutError::Timeout) => {}
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        tracing::debug!("Control loop stopped");
    }

    /// One pass of the control loop: reap, expire, classify, act.
    fn tick(&self) {
        let _tick = lock(&self.tick);

        self.reap();
        self.expire();

        let active = lock(&self.active).count;
        let usage = if self.policy.smart {
            self.monitor.system_usage()
        } else {
            ResourceUsage::default()
        };
        let status = self.policy.classify(active, usage);
        tracing::trace!(
            %status,
            active,
            cpu = usage.cpu,
            mem = usage.mem,
            load = usage.load,
            "Classified pool health"
        );

        match status {
            Status::Healthy => self.admit(),
            Status::MaybeOk => {}
            Status::Bad => self.evict(),
        }
    }

    /// Move every exited active worker into `completed`.
    fn reap(&self) {
        let finished: Vec<Arc<Worker>> = {
            let mut active = lock(&self.active);
            let (finished, running): (Vec<_>, Vec<_>) = std::mem::take(&mut active.workers)
                .into_iter()
                .partition(|worker| !worker.is_alive());
            active.workers = running;
            active.count = active.workers.len();
            finished
        };

        for worker in finished {
            worker.close(false);
            if worker
                .failure()
                .is_some_and(|failure| failure.is(TaskFailure::TIMED_OUT))
            {
                self.timeouts.fetch_add(1, Ordering::Relaxed);
            }
            tracing::debug!(
                worker_id = worker.id(),
                attempt = worker.attempt(),
                "Worker reaped"
            );
            lock(&self.completed).push(worker);
        }
    }

    /// Alarm every worker past the timeout and kill those whose grace period
    /// has run out. A killed worker is completed with a timeout failure.
    fn expire(&self) {
        let Some(timeout) = self.timeout else {
            return;
        };
        let overdue: Vec<Arc<Worker>> = lock(&self.active)
            .workers
            .iter()
            .filter(|worker| worker.running_time().is_some_and(|t| t >= timeout))
            .cloned()
            .collect();

        for worker in overdue {
            let Some(since_alarm) = worker.alarm() else {
                continue;
            };
            if since_alarm < self.timeout_grace {
                continue;
            }

            {
                let mut active = lock(&self.active);
                active.workers.retain(|w| !Arc::ptr_eq(w, &worker));
                active.count = active.workers.len();
            }
            worker.close(true);
            self.timeouts.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                worker_id = worker.id(),
                attempt = worker.attempt(),
                "Worker killed after timeout grace period"
            );
            lock(&self.completed).push(worker);
        }
    }

    /// Start one randomly chosen pending worker.
    fn admit(&self) {
        let worker = {
            let mut pending = lock(&self.pending);
            if pending.is_empty() {
                return;
            }
            let idx = rand::thread_rng().gen_range(0..pending.len());
            let worker = pending.swap_remove(idx);

            let mut active = lock(&self.active);
            active.workers.push(Arc::clone(&worker));
            active.count += 1;
            worker
        };

        if let Err(e) = worker.start() {
            self.spawn_failures.fetch_add(1, Ordering::Relaxed);
            {
                let mut active = lock(&self.active);
                active.workers.retain(|w| !Arc::ptr_eq(w, &worker));
                active.count = active.workers.len();
            }

            let failures = worker.spawn_failures();
            if failures >= MAX_SPAWN_ATTEMPTS {
                tracing::error!(
                    worker_id = worker.id(),
                    error = %e,
                    "Giving up on worker after {} failed starts",
                    failures
                );
                worker.abandon(TaskFailure::new(
                    TaskFailure::SPAWN_FAILED,
                    format!("worker failed to start {} times: {}", failures, e),
                ));
                lock(&self.completed).push(worker);
            } else {
                tracing::warn!(
                    worker_id = worker.id(),
                    attempt = failures,
                    error = %e,
                    "Failed to start worker"
                );
                lock(&self.pending).push(worker);
            }
            return;
        }

        tracing::debug!(
            worker_id = worker.id(),
            attempt = worker.attempt(),
            active = lock(&self.active).count,
            "Worker admitted"
        );
    }

    /// Evict the most recently admitted worker, unless that would drop the
    /// active set below the floor (at least one worker).
    fn evict(&self) {
        let worker = {
            let mut active = lock(&self.active);
            if active.count <= self.policy.floor() {
                return;
            }
            let Some(worker) = active.workers.pop() else {
                return;
            };
            active.count -= 1;
            worker
        };

        worker.close(true);
        self.evictions.fetch_add(1, Ordering::Relaxed);

        // A worker that finished just before it was terminated keeps its outcome.
        if worker.outcome().is_some() {
            tracing::debug!(worker_id = worker.id(), "Evicted worker had already finished");
            lock(&self.completed).push(worker);
            return;
        }

        match worker.reborn() {
            Some(rebirth) => {
                tracing::info!(
                    worker_id = worker.id(),
                    attempt = rebirth.attempt(),
                    "Worker evicted under resource pressure"
                );
                lock(&self.pending).push(rebirth);
            }
            None => {
                tracing::error!(worker_id = worker.id(), "Evicted worker could not be reborn");
                lock(&self.completed).push(worker);
            }
        }
    }
}
