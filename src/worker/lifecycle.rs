//! One execution attempt of a task.
//!
//! A [`Worker`] starts a worker process for its task, collects the last
//! protocol frame it writes and caches the outcome once stdout reaches EOF.
//! A worker that was closed can be reborn: the rebirth carries the same task
//! and takes over the caller's [`Handle`].

use super::ipc::LineReader;
use super::proc::Proc;
use super::protocol::{WorkRequest, WorkResponse};
use super::signals::analyze_wait_status;
use super::spawn::{WorkerProgram, spawn_collector_thread, spawn_worker};
use crate::error::{CirnoError, Result};
use crate::handle::{Binding, Handle};
use crate::metrics::{ResourceMonitor, ResourceUsage};
use crate::task::{Outcome, Task, TaskFailure};
use nix::sys::signal::Signal;
use serde_json::Value;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Grace period between SIGTERM and SIGKILL when terminating a worker.
pub const TERMINATE_GRACE: Duration = Duration::from_millis(200);

/// How long to wait for the collector to deliver an outcome once the worker
/// process has exited.
const COLLECT_GRACE: Duration = Duration::from_millis(500);

/// Poll interval while blocking on a worker's natural exit.
const EXIT_POLL: Duration = Duration::from_millis(10);

/// Lifecycle state of a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Created,
    Running,
    Closed,
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Closed => "closed",
        };
        write!(f, "{}", s)
    }
}

/// Latest frame seen on a worker's stdout, shared with its collector.
type FrameSlot = Arc<Mutex<Option<WorkResponse>>>;

/// The collector thread and the frame slot it fills.
struct Channels {
    latest: FrameSlot,
    collector: Option<JoinHandle<()>>,
}

impl Channels {
    fn collector_done(&self) -> bool {
        self.collector.as_ref().is_none_or(JoinHandle::is_finished)
    }

    fn take_latest(&self) -> Option<Outcome> {
        self.latest
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .map(Outcome::from)
    }

    /// Take the outcome once the collector has reached EOF, without blocking.
    ///
    /// A frame is only final after EOF: a later frame replaces an earlier one.
    fn try_drain(&self) -> Option<Outcome> {
        if self.collector_done() {
            self.take_latest()
        } else {
            None
        }
    }

    /// Take the outcome, waiting up to `grace` for the collector to reach EOF.
    ///
    /// Only called after the worker process has exited. If an orphan still
    /// holds the pipe when `grace` runs out, the latest frame so far is taken.
    fn drain(&self, grace: Duration) -> Option<Outcome> {
        let deadline = Instant::now() + grace;
        while !self.collector_done() && Instant::now() < deadline {
            std::thread::sleep(EXIT_POLL);
        }
        self.take_latest()
    }

    fn release(mut self) {
        if let Some(collector) = self.collector.take() {
            // A finished collector is joined; a stuck one (pipe held open by
            // an orphan) is left to end on its own.
            if collector.is_finished() {
                let _ = collector.join();
            }
        }
    }
}

struct WorkerInner {
    state: WorkerState,
    proc: Option<Proc>,
    pid: Option<u32>,
    channels: Option<Channels>,
    outcome: Option<Outcome>,
    spawn_failures: u32,
    /// Set when the pool terminated the process while it was still running.
    terminated: bool,
    started: Option<Instant>,
    /// When the first timeout alarm was sent.
    alarmed: Option<Instant>,
}

/// One execution attempt of a task.
pub struct Worker {
    id: u64,
    attempt: u32,
    task: Arc<Task>,
    program: Arc<WorkerProgram>,
    monitor: Arc<dyn ResourceMonitor>,
    inner: Mutex<WorkerInner>,
    binding: Mutex<Option<Weak<Binding>>>,
}

impl Worker {
    /// Create a worker in the `Created` state.
    pub fn new(
        id: u64,
        task: Arc<Task>,
        program: Arc<WorkerProgram>,
        monitor: Arc<dyn ResourceMonitor>,
    ) -> Self {
        Self::with_attempt(id, 1, task, program, monitor)
    }

    fn with_attempt(
        id: u64,
        attempt: u32,
        task: Arc<Task>,
        program: Arc<WorkerProgram>,
        monitor: Arc<dyn ResourceMonitor>,
    ) -> Self {
        Self {
            id,
            attempt,
            task,
            program,
            monitor,
            inner: Mutex::new(WorkerInner {
                state: WorkerState::Created,
                proc: None,
                pid: None,
                channels: None,
                outcome: None,
                spawn_failures: 0,
                terminated: false,
                started: None,
                alarmed: None,
            }),
            binding: Mutex::new(None),
        }
    }

    fn lock(&self) -> MutexGuard<'_, WorkerInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Identifier of the logical task; shared by all rebirths.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Execution attempt number, starting at 1.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn task(&self) -> &Task {
        &self.task
    }

    pub fn state(&self) -> WorkerState {
        self.lock().state
    }

    /// OS process id, once started.
    pub fn pid(&self) -> Option<u32> {
        self.lock().pid
    }

    /// Output log of this worker's task, if output capture is enabled.
    pub fn output_path(&self) -> Option<PathBuf> {
        self.program.output_path(self.id)
    }

    /// Time since the process was started; `None` unless running.
    pub fn running_time(&self) -> Option<Duration> {
        let inner = self.lock();
        if inner.state != WorkerState::Running {
            return None;
        }
        inner.started.map(|started| started.elapsed())
    }

    /// Number of failed attempts to start this worker.
    pub fn spawn_failures(&self) -> u32 {
        self.lock().spawn_failures
    }

    /// Handle bound to this worker, creating the binding on first use.
    pub fn handle(self: &Arc<Self>) -> Handle {
        let mut binding = self.binding.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = binding.as_ref().and_then(Weak::upgrade) {
            return Handle::from_binding(existing);
        }
        let created = Arc::new(Binding::new(Arc::clone(self)));
        *binding = Some(Arc::downgrade(&created));
        Handle::from_binding(created)
    }

    /// Launch the worker process and its collector.
    pub fn start(&self) -> Result<()> {
        let mut inner = self.lock();
        if inner.state != WorkerState::Created {
            return Err(CirnoError::Worker(format!(
                "Worker {} cannot start from state {}",
                self.id, inner.state
            )));
        }

        match self.launch() {
            Ok((proc, channels)) => {
                tracing::debug!(
                    worker_id = self.id,
                    attempt = self.attempt,
                    pid = proc.id(),
                    task = %self.task,
                    "Worker started"
                );
                inner.pid = Some(proc.id());
                inner.proc = Some(proc);
                inner.channels = Some(channels);
                inner.started = Some(Instant::now());
                inner.state = WorkerState::Running;
                Ok(())
            }
            Err(e) => {
                inner.spawn_failures += 1;
                Err(e)
            }
        }
    }

    /// Open the task's output log: truncated for the first attempt, appended
    /// to by rebirths.
    fn open_output(&self) -> Result<Option<File>> {
        let Some(path) = self.output_path() else {
            return Ok(None);
        };
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(self.attempt == 1)
            .append(self.attempt > 1)
            .open(&path)
            .map_err(|e| {
                CirnoError::Worker(format!(
                    "Failed to open output log {}: {}",
                    path.display(),
                    e
                ))
            })?;
        Ok(Some(file))
    }

    fn launch(&self) -> Result<(Proc, Channels)> {
        let output = self.open_output()?;
        let log = output.as_ref().map(File::try_clone).transpose()?;
        let mut proc = spawn_worker(&self.program, output)?;
        let reader = proc
            .take_stdout()
            .ok_or_else(|| CirnoError::Worker("Worker stdout not captured".into()))?;

        let latest = FrameSlot::default();
        let slot = Arc::clone(&latest);
        let id = self.id;
        let collector = spawn_collector_thread(&format!("cirno-collector-{}", id), move || {
            collect(id, reader, &slot, log)
        })?;

        // A worker that dies before reading its request is reported as a
        // crash once it is reaped.
        if let Err(e) = proc.send_and_close(&WorkRequest::run((*self.task).clone())) {
            tracing::warn!(worker_id = id, error = %e, "Failed to send task to worker");
        }

        Ok((
            proc,
            Channels {
                latest,
                collector: Some(collector),
            },
        ))
    }

    /// Terminate the worker process and all of its descendants.
    ///
    /// No-op unless the worker is running.
    pub fn terminate(&self) {
        let mut inner = self.lock();
        if inner.state != WorkerState::Running {
            return;
        }
        let inner = &mut *inner;
        let Some(proc) = inner.proc.as_mut() else {
            return;
        };

        let was_running = proc.is_running();
        if let Err(e) = proc.terminate_tree(TERMINATE_GRACE) {
            tracing::warn!(worker_id = self.id, error = %e, "Failed to terminate worker");
        }
        if was_running {
            inner.terminated = true;
            tracing::debug!(worker_id = self.id, pid = proc.id(), "Worker terminated");
        }
    }

    /// Send SIGALRM to the worker's process group.
    ///
    /// Returns the time since the first alarm, or `None` if the worker is not
    /// running. Once alarmed, a worker that ends without an outcome is
    /// recorded as timed out.
    pub fn alarm(&self) -> Option<Duration> {
        let mut inner = self.lock();
        if inner.state != WorkerState::Running {
            return None;
        }
        let inner = &mut *inner;
        let proc = inner.proc.as_mut()?;
        if proc.signal_group(Signal::SIGALRM) && inner.alarmed.is_none() {
            tracing::debug!(worker_id = self.id, pid = proc.id(), "Worker timed out");
            inner.alarmed = Some(Instant::now());
        }
        inner.alarmed.map(|alarmed| alarmed.elapsed())
    }

    /// Close the worker, caching its outcome.
    ///
    /// With `force` the process tree is terminated first; otherwise this
    /// blocks until the process exits on its own. Idempotent.
    pub fn close(&self, force: bool) {
        if force {
            self.terminate();
        }

        loop {
            let mut inner = self.lock();
            match inner.state {
                WorkerState::Closed => return,
                WorkerState::Created => {
                    inner.state = WorkerState::Closed;
                    return;
                }
                WorkerState::Running => {}
            }

            let exited = inner.proc.as_mut().is_none_or(|proc| !proc.is_running());
            if exited {
                self.finish(&mut inner);
                return;
            }

            // Release the lock between polls so handles can still peek.
            drop(inner);
            std::thread::sleep(EXIT_POLL);
        }
    }

    /// Reap an exited process, settle the outcome and release resources.
    fn finish(&self, inner: &mut WorkerInner) {
        let status = inner.proc.as_mut().and_then(|proc| match proc.wait() {
            Ok(status) => Some(status),
            Err(e) => {
                tracing::warn!(worker_id = self.id, error = %e, "Failed to reap worker");
                None
            }
        });

        if inner.outcome.is_none() {
            inner.outcome = inner
                .channels
                .as_ref()
                .and_then(|channels| channels.drain(COLLECT_GRACE));
        }

        if inner.outcome.is_none()
            && let Some(started) = inner.alarmed.and(inner.started)
        {
            let failure = TaskFailure::new(
                TaskFailure::TIMED_OUT,
                format!(
                    "task exceeded its time limit after {:.1}s",
                    started.elapsed().as_secs_f64()
                ),
            );
            tracing::warn!(
                worker_id = self.id,
                attempt = self.attempt,
                reason = %failure.message,
                "Worker timed out"
            );
            inner.outcome = Some(Outcome::Failure { failure });
        }

        if inner.outcome.is_none() && !inner.terminated {
            let failure = match status {
                Some(status) => analyze_wait_status(status).into_failure(),
                None => TaskFailure::new(
                    TaskFailure::WORKER_CRASHED,
                    "worker process vanished without reporting an outcome",
                ),
            };
            tracing::warn!(
                worker_id = self.id,
                attempt = self.attempt,
                reason = %failure.message,
                "Worker crashed"
            );
            inner.outcome = Some(Outcome::Failure { failure });
        }

        if let Some(channels) = inner.channels.take() {
            channels.release();
        }
        inner.proc = None;
        inner.state = WorkerState::Closed;

        tracing::debug!(
            worker_id = self.id,
            attempt = self.attempt,
            status = outcome_label(inner.outcome.as_ref()),
            "Worker closed"
        );
    }

    /// Close a worker that will never run, recording `failure` as its outcome.
    pub fn abandon(&self, failure: TaskFailure) {
        let mut inner = self.lock();
        if inner.state == WorkerState::Closed {
            return;
        }
        inner.outcome = Some(Outcome::Failure { failure });
        inner.state = WorkerState::Closed;
    }

    /// New worker for the same task, taking over this worker's handle.
    ///
    /// Returns `None` unless this worker is closed.
    pub fn reborn(&self) -> Option<Arc<Worker>> {
        if self.state() != WorkerState::Closed {
            return None;
        }

        let rebirth = Arc::new(Worker::with_attempt(
            self.id,
            self.attempt + 1,
            Arc::clone(&self.task),
            Arc::clone(&self.program),
            Arc::clone(&self.monitor),
        ));

        let binding = self
            .binding
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .and_then(|weak| weak.upgrade());
        if let Some(binding) = binding {
            binding.rebind(Arc::clone(&rebirth));
            *rebirth.binding.lock().unwrap_or_else(PoisonError::into_inner) =
                Some(Arc::downgrade(&binding));
        }

        tracing::debug!(
            worker_id = self.id,
            attempt = rebirth.attempt,
            "Worker reborn"
        );
        Some(rebirth)
    }

    /// The outcome, if one has been determined.
    ///
    /// A process that exited but has not been closed yet has its outcome
    /// drained here, at most once. Never blocks on the process.
    pub fn outcome(&self) -> Option<Outcome> {
        let mut inner = self.lock();
        if inner.outcome.is_none() && inner.state == WorkerState::Running {
            let inner = &mut *inner;
            let exited = inner.proc.as_mut().is_some_and(|proc| !proc.is_running());
            if exited {
                inner.outcome = inner.channels.as_ref().and_then(Channels::try_drain);
            }
        }
        inner.outcome.clone()
    }

    /// The task's value.
    ///
    /// `Ok(None)` while no outcome is available; `Err` re-raises a recorded
    /// failure.
    pub fn result(&self) -> std::result::Result<Option<Value>, TaskFailure> {
        self.outcome().map(Outcome::into_result).transpose()
    }

    /// The recorded failure, if the task failed.
    pub fn failure(&self) -> Option<TaskFailure> {
        match self.outcome()? {
            Outcome::Failure { failure } => Some(failure),
            Outcome::Value { .. } => None,
        }
    }

    /// Whether the worker process is running.
    pub fn is_alive(&self) -> bool {
        let mut inner = self.lock();
        inner.state == WorkerState::Running
            && inner.proc.as_mut().is_some_and(Proc::is_running)
    }

    /// Live CPU% and memory% of the worker process; zero unless it is alive.
    pub fn runtime_info(&self) -> ResourceUsage {
        let pid = {
            let mut inner = self.lock();
            if inner.state != WorkerState::Running {
                return ResourceUsage::default();
            }
            match inner.proc.as_mut() {
                Some(proc) => {
                    if !proc.is_running() {
                        return ResourceUsage::default();
                    }
                    proc.id()
                }
                None => return ResourceUsage::default(),
            }
        };
        self.monitor.process_usage(pid).unwrap_or_default()
    }
}

impl fmt::Debug for Worker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.lock();
        f.debug_struct("Worker")
            .field("id", &self.id)
            .field("attempt", &self.attempt)
            .field("task", &self.task)
            .field("state", &inner.state)
            .field("pid", &inner.pid)
            .field("outcome", &inner.outcome)
            .finish()
    }
}

fn outcome_label(outcome: Option<&Outcome>) -> &'static str {
    match outcome {
        Some(Outcome::Value { .. }) => "value",
        Some(Outcome::Failure { .. }) => "failure",
        None => "none",
    }
}

/// Drain a worker's stdout until EOF.
///
/// Each protocol frame replaces the one in `latest`. Every other line is
/// task output and goes to `log` if given.
fn collect(worker_id: u64, mut reader: LineReader, latest: &FrameSlot, mut log: Option<File>) {
    loop {
        let line = match reader.read_line() {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(worker_id, error = %e, "Failed to read from worker");
                break;
            }
        };

        if let Some(frame) = WorkResponse::from_line(line) {
            *latest.lock().unwrap_or_else(PoisonError::into_inner) = Some(frame);
            continue;
        }
        if line.is_empty() {
            continue;
        }

        match log.as_mut() {
            Some(file) => {
                if let Err(e) = writeln!(file, "{}", line) {
                    tracing::warn!(worker_id, error = %e, "Failed to write task output");
                    log = None;
                }
            }
            None => tracing::debug!(worker_id, output = line, "Task output"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullMonitor;

    impl ResourceMonitor for NullMonitor {
        fn system_usage(&self) -> ResourceUsage {
            ResourceUsage::default()
        }

        fn process_usage(&self, _pid: u32) -> Option<ResourceUsage> {
            Some(ResourceUsage::new(1.0, 2.0))
        }
    }

    /// A worker whose "program" is a shell script standing in for
    /// `cirno internal-worker`.
    fn shell_worker(script: &str) -> Arc<Worker> {
        program_worker(WorkerProgram::new("sh").arg("-c").arg(script))
    }

    fn program_worker(program: WorkerProgram) -> Arc<Worker> {
        Arc::new(Worker::new(
            7,
            Arc::new(Task::new("echo").arg("hi")),
            Arc::new(program),
            Arc::new(NullMonitor),
        ))
    }

    fn wait_exit(worker: &Worker) {
        let deadline = Instant::now() + Duration::from_secs(10);
        while worker.is_alive() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
    }

    #[test]
    fn test_value_frame() {
        let worker = shell_worker(
            r#"read req; echo "some task output"; printf '\n{"cirno":"value","value":42}\n'"#,
        );
        assert_eq!(worker.state(), WorkerState::Created);
        assert_eq!(worker.result(), Ok(None));

        worker.start().unwrap();
        wait_exit(&worker);
        assert_eq!(worker.state(), WorkerState::Running);

        worker.close(false);
        assert_eq!(worker.state(), WorkerState::Closed);
        assert_eq!(worker.result(), Ok(Some(serde_json::json!(42))));
        assert_eq!(worker.failure(), None);
        assert!(!worker.is_alive());
    }

    #[test]
    fn test_failure_frame() {
        let worker = shell_worker(
            r#"read req; printf '{"cirno":"failure","failure":{"kind":"ValueError","message":"bad"}}\n'"#,
        );
        worker.start().unwrap();
        worker.close(false);

        let failure = worker.failure().unwrap();
        assert_eq!(failure, TaskFailure::new("ValueError", "bad"));
        assert_eq!(worker.result(), Err(failure));
    }

    #[test]
    fn test_last_frame_wins() {
        // Task output that happens to look like a frame is superseded by the
        // frame written when the task returns.
        let worker = shell_worker(
            r#"read req; printf '{"cirno":"value","value":"forged"}\n'; printf '\n{"cirno":"value","value":1}\n'"#,
        );
        worker.start().unwrap();
        worker.close(false);
        assert_eq!(worker.result(), Ok(Some(serde_json::json!(1))));
    }

    #[test]
    fn test_outcome_waits_for_eof() {
        // The process exits after its frame but a child keeps stdout open.
        let worker = shell_worker(
            r#"read req; printf '{"cirno":"value","value":"early"}\n'; (sleep 1; printf '{"cirno":"value","value":"late"}\n') &"#,
        );
        worker.start().unwrap();
        wait_exit(&worker);
        assert_eq!(worker.outcome(), None);

        let deadline = Instant::now() + Duration::from_secs(10);
        while worker.outcome().is_none() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(20));
        }
        assert_eq!(worker.result(), Ok(Some(serde_json::json!("late"))));
        worker.close(false);
    }

    #[test]
    fn test_lazy_drain_before_close() {
        let worker = shell_worker(r#"read req; printf '{"cirno":"value","value":"early"}\n'"#);
        worker.start().unwrap();
        wait_exit(&worker);

        let deadline = Instant::now() + Duration::from_secs(5);
        while worker.outcome().is_none() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(worker.state(), WorkerState::Running);
        assert_eq!(worker.result(), Ok(Some(serde_json::json!("early"))));

        // Closing keeps the outcome that was already drained.
        worker.close(false);
        assert_eq!(worker.result(), Ok(Some(serde_json::json!("early"))));
    }

    #[test]
    fn test_crash_without_frame() {
        let worker = shell_worker("read req; exit 3");
        worker.start().unwrap();
        worker.close(false);

        let failure = worker.failure().unwrap();
        assert!(failure.is(TaskFailure::WORKER_CRASHED));
        assert!(failure.message.contains("exited with code 3"));
    }

    #[test]
    fn test_forced_close_leaves_no_outcome() {
        let worker = shell_worker("read req; sleep 60");
        worker.start().unwrap();
        assert!(worker.is_alive());
        assert_eq!(worker.result(), Ok(None));

        worker.close(true);
        assert_eq!(worker.state(), WorkerState::Closed);
        assert_eq!(worker.outcome(), None);
        assert!(!worker.is_alive());

        // Idempotent
        worker.close(true);
        worker.close(false);
        worker.terminate();
        assert_eq!(worker.state(), WorkerState::Closed);
    }

    #[test]
    fn test_alarm_times_out() {
        let worker = shell_worker("read req; sleep 60");
        assert_eq!(worker.alarm(), None);
        assert_eq!(worker.running_time(), None);

        worker.start().unwrap();
        assert!(worker.running_time().is_some());
        assert!(worker.alarm().is_some());
        wait_exit(&worker);
        assert!(!worker.is_alive());

        worker.close(false);
        let failure = worker.failure().unwrap();
        assert!(failure.is(TaskFailure::TIMED_OUT), "{failure:?}");
        assert_eq!(worker.running_time(), None);
        assert_eq!(worker.alarm(), None);
    }

    #[test]
    fn test_alarm_ignored_then_killed() {
        let worker = shell_worker("trap '' ALRM; read req; sleep 60");
        worker.start().unwrap();
        // Let the shell install its trap first.
        std::thread::sleep(Duration::from_millis(300));
        let first = worker.alarm().unwrap();
        std::thread::sleep(Duration::from_millis(100));
        assert!(worker.is_alive());
        // Elapsed time counts from the first alarm.
        assert!(worker.alarm().unwrap() > first);

        worker.close(true);
        assert!(worker.failure().unwrap().is(TaskFailure::TIMED_OUT));
    }

    #[test]
    fn test_output_captured_per_task() {
        let dir = tempfile::tempdir().unwrap();
        let worker = program_worker(
            WorkerProgram::new("sh")
                .arg("-c")
                .arg(r#"read req; echo out-line; echo err-line >&2; printf '\n{"cirno":"value","value":1}\n'"#)
                .output_dir(dir.path()),
        );
        let path = dir.path().join("task-7.log");
        assert_eq!(worker.output_path(), Some(path.clone()));

        worker.start().unwrap();
        worker.close(false);
        assert_eq!(worker.result(), Ok(Some(serde_json::json!(1))));
        let log = std::fs::read_to_string(&path).unwrap();
        assert!(log.contains("out-line"), "{log}");
        assert!(log.contains("err-line"), "{log}");
        assert!(!log.contains("cirno"), "{log}");

        // A rebirth appends to the same log.
        let rebirth = worker.reborn().unwrap();
        rebirth.start().unwrap();
        rebirth.close(false);
        let log = std::fs::read_to_string(&path).unwrap();
        assert_eq!(log.matches("err-line").count(), 2, "{log}");
    }

    #[test]
    fn test_runtime_info() {
        let worker = shell_worker("read req; sleep 60");
        assert_eq!(worker.runtime_info(), ResourceUsage::default());

        worker.start().unwrap();
        assert_eq!(worker.runtime_info(), ResourceUsage::new(1.0, 2.0));

        worker.close(true);
        assert_eq!(worker.runtime_info(), ResourceUsage::default());
    }

    #[test]
    fn test_reborn_rebinds_handle() {
        let worker = shell_worker("read req; sleep 60");
        let handle = worker.handle();
        assert!(worker.reborn().is_none());

        worker.start().unwrap();
        assert!(worker.reborn().is_none());
        assert!(handle.is_running());

        worker.close(true);
        let rebirth = worker.reborn().unwrap();
        assert_eq!(rebirth.id(), worker.id());
        assert_eq!(rebirth.attempt(), 2);
        assert_eq!(rebirth.state(), WorkerState::Created);
        assert_eq!(rebirth.task(), worker.task());

        assert_eq!(handle.attempt(), 2);
        assert!(!handle.is_running());
        assert!(Arc::ptr_eq(&handle.worker(), &rebirth));
        // The rebirth hands out the same binding.
        assert!(Arc::ptr_eq(&rebirth.handle().worker(), &rebirth));
    }

    #[test]
    fn test_start_twice_fails() {
        let worker = shell_worker("read req; sleep 60");
        worker.start().unwrap();
        assert!(worker.start().is_err());
        worker.close(true);
    }

    #[test]
    fn test_spawn_failure_counted() {
        let worker = Worker::new(
            1,
            Arc::new(Task::new("echo")),
            Arc::new(WorkerProgram::new("/nonexistent/cirno-worker")),
            Arc::new(NullMonitor),
        );
        assert!(worker.start().is_err());
        assert!(worker.start().is_err());
        assert_eq!(worker.spawn_failures(), 2);
        assert_eq!(worker.state(), WorkerState::Created);

        worker.abandon(TaskFailure::new(TaskFailure::SPAWN_FAILED, "gave up"));
        assert_eq!(worker.state(), WorkerState::Closed);
        assert!(worker.failure().unwrap().is(TaskFailure::SPAWN_FAILED));
    }

    #[test]
    #[cfg(target_os = "linux")]
    fn test_terminate_kills_descendants() {
        let worker = shell_worker("read req; sleep 60 & sleep 60 & wait");
        worker.start().unwrap();
        let pid = worker.pid().unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        let mut kids = super::super::tree::descendants(pid);
        while kids.len() < 2 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(20));
            kids = super::super::tree::descendants(pid);
        }
        assert_eq!(kids.len(), 2);

        worker.close(true);
        let deadline = Instant::now() + Duration::from_secs(5);
        while kids.iter().any(|p| super::super::tree::is_alive(*p)) && Instant::now() < deadline
        {
            std::thread::sleep(Duration::from_millis(20));
        }
        assert!(kids.iter().all(|p| !super::super::tree::is_alive(*p)));
    }
}
