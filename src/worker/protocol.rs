//! Wire protocol between the pool and a worker process.
//!
//! Messages are JSON-serialized and newline-delimited. The tag key is `cirno`
//! so protocol frames can be told apart from anything else the task body
//! prints on stdout.

use crate::task::{Outcome, Task, TaskFailure};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Request from pool to worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "cirno")]
pub enum WorkRequest {
    /// Run one task and report its outcome.
    #[serde(rename = "run")]
    Run {
        /// The task to execute.
        task: Task,
    },
}

/// Response from worker to pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cirno")]
pub enum WorkResponse {
    /// The task returned a value.
    #[serde(rename = "value")]
    Value {
        /// Returned value
        value: Value,
    },

    /// The task failed.
    #[serde(rename = "failure")]
    Failure {
        /// Structured failure
        failure: TaskFailure,
    },
}

impl WorkRequest {
    /// Create a run request.
    pub fn run(task: Task) -> Self {
        Self::Run { task }
    }

    /// Serialize to JSON line (with newline).
    pub fn to_line(&self) -> serde_json::Result<String> {
        let mut json = serde_json::to_string(self)?;
        json.push('\n');
        Ok(json)
    }

    /// Deserialize from JSON line.
    pub fn from_line(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line.trim())
    }
}

impl WorkResponse {
    /// Serialize to JSON line (with newline).
    pub fn to_line(&self) -> serde_json::Result<String> {
        let mut json = serde_json::to_string(self)?;
        json.push('\n');
        Ok(json)
    }

    /// Deserialize from JSON line.
    ///
    /// Returns `None` for lines that are not protocol frames (task output).
    pub fn from_line(line: &str) -> Option<Self> {
        let line = line.trim();
        if !line.starts_with('{') {
            return None;
        }
        serde_json::from_str(line).ok()
    }
}

impl From<Outcome> for WorkResponse {
    fn from(outcome: Outcome) -> Self {
        match outcome {
            Outcome::Value { value } => Self::Value { value },
            Outcome::Failure { failure } => Self::Failure { failure },
        }
    }
}

impl From<WorkResponse> for Outcome {
    fn from(response: WorkResponse) -> Self {
        match response {
            WorkResponse::Value { value } => Outcome::Value { value },
            WorkResponse::Failure { failure } => Outcome::Failure { failure },
        }
    }
}
