//! CSV run report.
//!
//! Columns: `index,work,status,detail`. `detail` is the JSON value for
//! successful tasks and `kind: message` for failed ones.

use super::TaskRecord;
use crate::task::Outcome;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

const HEADER: &str = "index,work,status,detail";

/// Quote a CSV field if it contains a separator, quote or line break.
fn escape(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

/// Write the report to `out`.
pub fn write_report(out: &mut impl Write, records: &[TaskRecord]) -> io::Result<()> {
    writeln!(out, "{}", HEADER)?;
    for record in records {
        let (status, detail) = match &record.outcome {
            Some(Outcome::Value { value }) => ("ok", value.to_string()),
            Some(Outcome::Failure { failure }) => ("failed", failure.to_string()),
            None => ("unfinished", String::new()),
        };
        writeln!(
            out,
            "{},{},{},{}",
            record.index,
            escape(&record.task.work),
            status,
            escape(&detail)
        )?;
    }
    Ok(())
}

/// Write the report to a file at `path`.
pub fn save_report(path: &Path, records: &[TaskRecord]) -> io::Result<()> {
    let mut out = BufWriter::new(File::create(path)?);
    write_report(&mut out, records)?;
    out.flush()
}
