//! Tasks, their failures, and task-list files.
//!
//! A [`Task`] names a registered work item and carries its positional and
//! keyed inputs. Everything in it is plain JSON so it can cross the process
//! boundary to a worker unchanged.

use crate::error::{CirnoError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Work item used for bare command lines in a task list.
pub const EXEC_WORK: &str = "exec";

/// An immutable unit of work: a work item name plus its inputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Name of the work item in the worker's registry.
    pub work: String,
    /// Positional inputs.
    #[serde(default)]
    pub args: Vec<Value>,
    /// Keyed inputs.
    #[serde(default)]
    pub kwargs: Map<String, Value>,
}

impl Task {
    /// Create a task with no inputs.
    pub fn new(work: impl Into<String>) -> Self {
        Self {
            work: work.into(),
            args: Vec::new(),
            kwargs: Map::new(),
        }
    }

    /// Append a positional input.
    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.args.push(value.into());
        self
    }

    /// Set a keyed input.
    pub fn kwarg(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.kwargs.insert(key.into(), value.into());
        self
    }

    /// Task running a shell command through the `exec` work item.
    pub fn command(cmd: impl Into<String>) -> Self {
        Self::new(EXEC_WORK).arg(cmd.into())
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.work)?;
        let mut first = true;
        for arg in &self.args {
            if !first {
                write!(f, ", ")?;
            }
            write!(f, "{}", arg)?;
            first = false;
        }
        for (key, value) in &self.kwargs {
            if !first {
                write!(f, ", ")?;
            }
            write!(f, "{}={}", key, value)?;
            first = false;
        }
        write!(f, ")")
    }
}

/// A structured failure raised by a task body.
///
/// `kind` is the discriminator (an error class name such as `ValueError`, or
/// one of the kinds cirno itself produces), `message` is human-readable and
/// `payload` carries optional structured detail.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct TaskFailure {
    pub kind: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl TaskFailure {
    /// Kind used when the task body panicked.
    pub const PANIC: &'static str = "Panic";
    /// Kind used when the work item is not registered in the worker.
    pub const UNKNOWN_WORK: &'static str = "UnknownWork";
    /// Kind used when the worker could not decode its request.
    pub const INVALID_REQUEST: &'static str = "InvalidRequest";
    /// Kind used when the worker process died without reporting an outcome.
    pub const WORKER_CRASHED: &'static str = "WorkerCrashed";
    /// Kind used when the worker process could not be started.
    pub const SPAWN_FAILED: &'static str = "SpawnFailed";
    /// Kind used when a value could not be decoded into the requested type.
    pub const DECODE: &'static str = "Decode";
    /// Kind used when the task outlived the pool's timeout.
    pub const TIMED_OUT: &'static str = "TimedOut";

    /// Create a failure without payload.
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            payload: None,
        }
    }

    /// Attach a structured payload.
    pub fn with_payload(mut self, payload: impl Into<Value>) -> Self {
        self.payload = Some(payload.into());
        self
    }

    /// Check whether this failure has the given kind.
    pub fn is(&self, kind: &str) -> bool {
        self.kind == kind
    }
}

/// The determined outcome of one task attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Value { value: Value },
    Failure { failure: TaskFailure },
}

impl Outcome {
    /// Convert into the caller-facing result shape.
    pub fn into_result(self) -> std::result::Result<Value, TaskFailure> {
        match self {
            Self::Value { value } => Ok(value),
            Self::Failure { failure } => Err(failure),
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failure { .. })
    }
}

impl From<std::result::Result<Value, TaskFailure>> for Outcome {
    fn from(result: std::result::Result<Value, TaskFailure>) -> Self {
        match result {
            Ok(value) => Self::Value { value },
            Err(failure) => Self::Failure { failure },
        }
    }
}

/// Parse a task list.
///
/// One task per line. A line starting with `{` is a JSON [`Task`]; any other
/// non-empty line is a shell command run through the `exec` work item. Blank
/// lines and lines starting with `#` are skipped.
pub fn parse_tasks(contents: &str) -> Result<Vec<Task>> {
    let mut tasks = Vec::new();
    for (idx, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if line.starts_with('{') {
            let task = serde_json::from_str::<Task>(line).map_err(|e| CirnoError::TaskFile {
                line: idx + 1,
                message: e.to_string(),
            })?;
            tasks.push(task);
        } else {
            tasks.push(Task::command(line));
        }
    }
    Ok(tasks)
}

/// Read and parse a task list file.
pub fn load_tasks(path: &Path) -> Result<Vec<Task>> {
    let contents = fs::read_to_string(path)?;
    parse_tasks(&contents)
}
