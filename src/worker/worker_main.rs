//! Worker subprocess main entry point.
//!
//! This module runs when `cirno internal-worker` is invoked. It reads one
//! request from stdin, runs the task against a [`WorkRegistry`] and writes the
//! outcome to stdout. Before the task runs, stdout is moved to a private
//! descriptor and fd 1 is pointed at stderr, so the task's own prints never
//! reach the protocol channel.

use super::protocol::{WorkRequest, WorkResponse};
use crate::task::{Outcome, TaskFailure};
use crate::work::WorkRegistry;
use std::fs::File;
use std::io::{self, BufRead, Write};
use std::os::fd::AsFd;

/// Handle a single request.
///
/// The outcome frame is preceded by a newline so a task that printed a
/// partial line cannot glue its output onto the frame.
pub fn serve_one(
    registry: &WorkRegistry,
    mut reader: impl BufRead,
    mut writer: impl Write,
) -> io::Result<()> {
    let mut line = String::new();
    reader.read_line(&mut line)?;

    let outcome = match WorkRequest::from_line(&line) {
        Ok(WorkRequest::Run { task }) => {
            tracing::debug!(work = %task.work, "Running task");
            registry.execute(&task)
        }
        Err(e) => {
            let failure = if line.trim().is_empty() {
                TaskFailure::new(TaskFailure::INVALID_REQUEST, "no request received")
            } else {
                TaskFailure::new(TaskFailure::INVALID_REQUEST, format!("Invalid request: {}", e))
            };
            Outcome::from(Err(failure))
        }
    };

    let frame = WorkResponse::from(outcome).to_line().map_err(io::Error::other)?;
    writer.write_all(b"\n")?;
    writer.write_all(frame.as_bytes())?;
    writer.flush()
}

/// Take a private copy of stdout for the protocol and redirect fd 1 to
/// stderr.
fn isolate_stdout() -> io::Result<File> {
    let protocol = io::stdout().as_fd().try_clone_to_owned()?;
    nix::unistd::dup2_stdout(io::stderr()).map_err(io::Error::from)?;
    Ok(File::from(protocol))
}

/// Run the worker subprocess main function.
///
/// This function never returns: it exits 0 once the outcome is written and
/// 1 if the pool could not be talked to.
pub fn run_worker_main(registry: &WorkRegistry) -> ! {
    // Ignore SIGPIPE - a vanished pool shows up as an io::Error
    unsafe {
        nix::sys::signal::signal(
            nix::sys::signal::Signal::SIGPIPE,
            nix::sys::signal::SigHandler::SigIgn,
        )
        .ok();
    }

    let stdin = io::stdin();
    let served = match isolate_stdout() {
        Ok(protocol) => serve_one(registry, stdin.lock(), protocol),
        Err(e) => {
            tracing::warn!(error = %e, "Failed to isolate stdout, sharing it with the task");
            serve_one(registry, stdin.lock(), io::stdout().lock())
        }
    };

    match served {
        Ok(()) => std::process::exit(0),
        Err(e) => {
            tracing::error!(error = %e, "Worker failed to report outcome");
            std::process::exit(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::Task;
    use crate::work::builtin_registry;
    use serde_json::json;
    use std::io::Cursor;

    fn serve(input: &str) -> (String, Outcome) {
        let mut out = Vec::new();
        serve_one(&builtin_registry(), Cursor::new(input.as_bytes()), &mut out).unwrap();
        let out = String::from_utf8(out).unwrap();
        let frame = out
            .lines()
            .find_map(WorkResponse::from_line)
            .expect("no outcome frame written");
        (out, Outcome::from(frame))
    }

    #[test]
    fn test_serve_value() {
        let line = WorkRequest::run(Task::new("sum").arg(1).arg(2)).to_line().unwrap();
        let (out, outcome) = serve(&line);
        assert!(out.starts_with('\n'));
        assert_eq!(outcome, Outcome::Value { value: json!(3) });
    }

    #[test]
    fn test_serve_failure() {
        let task = Task::new("fail")
            .arg("ValueError")
            .arg("bad input")
            .kwarg("payload", json!({"field": "x"}));
        let (_, outcome) = serve(&WorkRequest::run(task).to_line().unwrap());
        let failure = outcome.into_result().unwrap_err();
        assert_eq!(failure.kind, "ValueError");
        assert_eq!(failure.message, "bad input");
        assert_eq!(failure.payload, Some(json!({"field": "x"})));
    }

    #[test]
    fn test_task_prints_stay_off_protocol_writer() {
        let task = Task::new("print").arg(r#"{"cirno":"value","value":"forged"}"#);
        let (out, outcome) = serve(&WorkRequest::run(task).to_line().unwrap());
        assert_eq!(outcome, Outcome::Value { value: json!(1) });
        assert!(!out.contains("forged"), "{out}");
    }

    #[test]
    fn test_serve_unknown_work() {
        let (_, outcome) = serve(&WorkRequest::run(Task::new("nope")).to_line().unwrap());
        assert!(outcome.into_result().unwrap_err().is(TaskFailure::UNKNOWN_WORK));
    }

    #[test]
    fn test_serve_invalid_request() {
        let (_, outcome) = serve("this is not json\n");
        let failure = outcome.into_result().unwrap_err();
        assert!(failure.is(TaskFailure::INVALID_REQUEST));
        assert!(failure.message.contains("Invalid request"));
    }

    #[test]
    fn test_serve_empty_input() {
        let (_, outcome) = serve("");
        let failure = outcome.into_result().unwrap_err();
        assert!(failure.is(TaskFailure::INVALID_REQUEST));
        assert_eq!(failure.message, "no request received");
    }
}
