//! Caller-facing handle to a submitted task.
//!
//! A [`Handle`] follows its task across rebirths: when the pool evicts a
//! worker, the rebirth takes over the binding and every clone of the handle
//! now answers for the new worker.

use crate::task::{Outcome, TaskFailure};
use crate::worker::Worker;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock};

/// The current worker for one logical task.
pub(crate) struct Binding {
    worker: RwLock<Arc<Worker>>,
}

impl Binding {
    pub(crate) fn new(worker: Arc<Worker>) -> Self {
        Self {
            worker: RwLock::new(worker),
        }
    }

    pub(crate) fn current(&self) -> Arc<Worker> {
        Arc::clone(&self.worker.read().unwrap_or_else(PoisonError::into_inner))
    }

    pub(crate) fn rebind(&self, worker: Arc<Worker>) {
        *self.worker.write().unwrap_or_else(PoisonError::into_inner) = worker;
    }
}

/// Future-style handle to a submitted task.
///
/// All queries are non-blocking and delegate to the currently bound worker.
#[derive(Clone)]
pub struct Handle {
    binding: Arc<Binding>,
}

impl Handle {
    pub(crate) fn from_binding(binding: Arc<Binding>) -> Self {
        Self { binding }
    }

    /// The worker currently bound to this handle.
    ///
    /// The binding lock is released before the worker is queried.
    pub fn worker(&self) -> Arc<Worker> {
        self.binding.current()
    }

    /// Identifier of the task within its pool.
    pub fn id(&self) -> u64 {
        self.worker().id()
    }

    /// Execution attempt of the bound worker, starting at 1.
    pub fn attempt(&self) -> u32 {
        self.worker().attempt()
    }

    /// Log file holding the task's output, if the pool captures output.
    pub fn output_path(&self) -> Option<PathBuf> {
        self.worker().output_path()
    }

    /// The task's value.
    ///
    /// `Ok(None)` while the task has not finished; `Err` re-raises the task's
    /// failure.
    pub fn result(&self) -> Result<Option<Value>, TaskFailure> {
        self.worker().result()
    }

    /// The task's value decoded into `T`.
    ///
    /// A value that does not decode is reported as a
    /// [`TaskFailure::DECODE`] failure.
    pub fn result_as<T: DeserializeOwned>(&self) -> Result<Option<T>, TaskFailure> {
        match self.result()? {
            Some(value) => serde_json::from_value(value)
                .map(Some)
                .map_err(|e| TaskFailure::new(TaskFailure::DECODE, e.to_string())),
            None => Ok(None),
        }
    }

    /// The task's failure, if it failed.
    pub fn failure(&self) -> Option<TaskFailure> {
        self.worker().failure()
    }

    /// The task's outcome, if determined.
    pub fn outcome(&self) -> Option<Outcome> {
        self.worker().outcome()
    }

    /// Whether the task has an outcome.
    pub fn is_done(&self) -> bool {
        self.outcome().is_some()
    }

    /// Whether the bound worker's process is running.
    pub fn is_running(&self) -> bool {
        self.worker().is_alive()
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let worker = self.worker();
        f.debug_struct("Handle")
            .field("id", &worker.id())
            .field("attempt", &worker.attempt())
            .field("state", &worker.state())
            .finish()
    }
}
