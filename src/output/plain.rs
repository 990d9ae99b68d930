//! Plain text output for task outcomes.

use super::TaskRecord;
use crate::task::Outcome;
use owo_colors::{OwoColorize, Stream::Stdout};
use std::io::{self, Write};

/// Write one line per task: index, status, task and value or failure.
pub fn write_plain(out: &mut impl Write, records: &[TaskRecord]) -> io::Result<()> {
    if records.is_empty() {
        return writeln!(out, "No tasks.");
    }

    for record in records {
        match &record.outcome {
            Some(Outcome::Value { value }) => writeln!(
                out,
                "{}\t{}\t{}\t{}",
                record.index,
                "ok".if_supports_color(Stdout, |t| t.green()),
                record.task,
                value
            )?,
            Some(Outcome::Failure { failure }) => writeln!(
                out,
                "{}\t{}\t{}\t{}",
                record.index,
                "failed".if_supports_color(Stdout, |t| t.red()),
                record.task,
                failure
            )?,
            None => writeln!(
                out,
                "{}\t{}\t{}\t-",
                record.index,
                "unfinished".if_supports_color(Stdout, |t| t.yellow()),
                record.task
            )?,
        }
    }
    Ok(())
}
