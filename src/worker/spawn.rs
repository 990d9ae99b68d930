//! Worker subprocess spawning.
//!
//! A worker is a re-execution of a [`WorkerProgram`], by default the current
//! executable in `internal-worker` mode. Each worker becomes the leader of a
//! new process group so its whole tree can be signaled at once.

use super::proc::Proc;
use crate::error::{CirnoError, Result};
use std::ffi::OsString;
use std::fs::File;
use std::io;
use std::os::unix::process::CommandExt;
use std::path::PathBuf;
use std::process::{Command, Stdio};

/// Subcommand the default worker program is invoked with.
pub const INTERNAL_WORKER_ARG: &str = "internal-worker";

/// The program a worker process runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerProgram {
    /// Path to the executable.
    pub program: PathBuf,
    /// Fixed arguments.
    pub args: Vec<OsString>,
    /// Extra environment variables for the worker.
    pub env: Vec<(OsString, OsString)>,
    /// Directory receiving per-task output logs (`None` = stderr is shared
    /// with the pool).
    pub output_dir: Option<PathBuf>,
}

impl WorkerProgram {
    /// Run `program` with no arguments.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            output_dir: None,
        }
    }

    /// The current executable invoked as `<exe> internal-worker`.
    pub fn current_exe() -> Result<Self> {
        let exe = std::env::current_exe()
            .map_err(|e| CirnoError::Worker(format!("Failed to get current executable: {}", e)))?;
        Ok(Self::new(exe).arg(INTERNAL_WORKER_ARG))
    }

    /// Append an argument.
    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Set an environment variable for the worker.
    pub fn env(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Write each task's output to `dir/task-<id>.log`.
    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = Some(dir.into());
        self
    }

    /// Output log of task `id`, if output capture is enabled.
    pub fn output_path(&self, id: u64) -> Option<PathBuf> {
        self.output_dir
            .as_ref()
            .map(|dir| dir.join(format!("task-{}.log", id)))
    }

    fn command(&self, output: Option<File>) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        cmd.envs(self.env.iter().map(|(k, v)| (k, v)));

        // stdin carries the request, stdout the outcome. stderr goes to the
        // task's output log, or is shared with the pool.
        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::piped());
        cmd.stderr(output.map_or_else(Stdio::inherit, Stdio::from));

        cmd.process_group(0);
        cmd
    }
}

/// Spawn a worker subprocess, with stderr redirected to `output` if given.
pub fn spawn_worker(program: &WorkerProgram, output: Option<File>) -> Result<Proc> {
    let child = program.command(output).spawn().map_err(|e| {
        CirnoError::Worker(format!(
            "Failed to spawn worker {}: {}",
            program.program.display(),
            e
        ))
    })?;

    Proc::from_child(child)
}

/// Stack size for collector threads (256 KiB).
///
/// Collectors only move lines from a pipe into a channel.
pub const COLLECTOR_STACK_SIZE: usize = 256 * 1024;

/// Spawn a named collector thread.
pub fn spawn_collector_thread<F, T>(name: &str, f: F) -> io::Result<std::thread::JoinHandle<T>>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    std::thread::Builder::new()
        .name(name.to_string())
        .stack_size(COLLECTOR_STACK_SIZE)
        .spawn(f)
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::unistd::{Pid, getpgid};

    #[test]
    fn test_current_exe_program() {
        let program = WorkerProgram::current_exe().unwrap();
        assert_eq!(program.args, vec![OsString::from(INTERNAL_WORKER_ARG)]);
        assert!(program.env.is_empty());
        assert!(program.output_path(3).is_none());
    }

    #[test]
    fn test_output_path() {
        let program = WorkerProgram::new("sh").output_dir("/tmp/run");
        assert_eq!(
            program.output_path(12),
            Some(PathBuf::from("/tmp/run/task-12.log"))
        );
    }

    #[test]
    fn test_spawn_worker_stderr_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.log");
        let file = File::create(&path).unwrap();

        let program = WorkerProgram::new("sh")
            .arg("-c")
            .arg("echo to-stderr >&2; echo to-stdout");
        let mut proc = spawn_worker(&program, Some(file)).unwrap();
        let mut reader = proc.take_stdout().unwrap();
        assert_eq!(reader.read_line().unwrap(), Some("to-stdout"));
        proc.wait().unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "to-stderr\n");
    }

    #[test]
    fn test_spawn_worker_own_process_group() {
        let program = WorkerProgram::new("sh").arg("-c").arg("read line");
        let mut proc = spawn_worker(&program, None).unwrap();

        let pid = Pid::from_raw(proc.id() as i32);
        assert_eq!(getpgid(Some(pid)).unwrap(), pid);

        proc.send_and_close(&super::super::protocol::WorkRequest::run(
            crate::task::Task::new("echo"),
        ))
        .unwrap();
        assert!(matches!(
            proc.wait().unwrap(),
            nix::sys::wait::WaitStatus::Exited(_, 0)
        ));
    }

    #[test]
    fn test_spawn_worker_env() {
        let program = WorkerProgram::new("sh")
            .arg("-c")
            .arg("echo \"$CIRNO_TEST_VALUE\"")
            .env("CIRNO_TEST_VALUE", "forty-two");
        let mut proc = spawn_worker(&program, None).unwrap();
        let mut reader = proc.take_stdout().unwrap();
        assert_eq!(reader.read_line().unwrap(), Some("forty-two"));
        proc.wait().unwrap();
    }

    #[test]
    fn test_spawn_missing_program() {
        let program = WorkerProgram::new("/nonexistent/cirno-worker");
        match spawn_worker(&program, None) {
            Err(CirnoError::Worker(message)) => {
                assert!(message.contains("Failed to spawn worker"), "{message}");
            }
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("spawning a missing program succeeded"),
        }
    }

    #[test]
    fn test_collector_thread_named() {
        let handle = spawn_collector_thread("cirno-test-collector", || {
            std::thread::current().name().map(str::to_string)
        })
        .unwrap();
        assert_eq!(
            handle.join().unwrap().as_deref(),
            Some("cirno-test-collector")
        );
    }
}
