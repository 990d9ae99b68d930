//! Output formatting for task outcomes.

pub mod json;
pub mod plain;
pub mod report;

use crate::task::{Outcome, Task};
use serde::Serialize;
use std::io::{self, Write};
use std::path::PathBuf;

/// Output format options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    /// One line per task.
    #[default]
    Plain,
    /// JSON document.
    Json,
}

/// The settled state of one task from a task list.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskRecord {
    /// 1-based position in the task list.
    pub index: usize,
    pub task: Task,
    /// Execution attempts, counting rebirths after eviction.
    pub attempts: u32,
    /// Captured output log, if the pool wrote one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<PathBuf>,
    /// `None` only if the pool was torn down before the task settled.
    pub outcome: Option<Outcome>,
}

impl TaskRecord {
    pub fn is_failure(&self) -> bool {
        self.outcome.as_ref().is_none_or(Outcome::is_failure)
    }
}

/// Write task records to `out` in the given format.
pub fn write_records(
    out: &mut impl Write,
    records: &[TaskRecord],
    format: OutputFormat,
) -> io::Result<()> {
    match format {
        OutputFormat::Plain => plain::write_plain(out, records),
        OutputFormat::Json => json::write_json(out, records),
    }
}

/// Print task records to stdout.
pub fn print_records(records: &[TaskRecord], format: OutputFormat) -> io::Result<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    write_records(&mut out, records, format)?;
    out.flush()
}
