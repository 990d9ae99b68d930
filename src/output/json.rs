//! JSON output for task outcomes.

use super::TaskRecord;
use std::io::{self, Write};

/// Write task records as a pretty-printed JSON array.
pub fn write_json(out: &mut impl Write, records: &[TaskRecord]) -> io::Result<()> {
    serde_json::to_writer_pretty(&mut *out, records)?;
    writeln!(out)
}
