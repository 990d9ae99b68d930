//! Process handle for worker processes.
//!
//! Wraps a child process with its IPC pipes and its exit status once reaped.
//! Every worker runs as the leader of its own process group.

use super::ipc::{LineReader, LineWriter, PipeFd};
use super::protocol::WorkRequest;
use super::tree;
use crate::error::{CirnoError, Result};
use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::sys::wait::{WaitPidFlag, WaitStatus, waitpid};
use nix::unistd::Pid;
use std::os::unix::io::OwnedFd;
use std::time::{Duration, Instant};

/// Handle to a worker process with IPC channels.
pub struct Proc {
    /// Process ID (also the process group ID)
    pid: Pid,
    /// Writer for the request; dropped once the request is sent
    stdin: Option<LineWriter>,
    /// Reader for responses; handed to the collector thread
    stdout: Option<LineReader>,
    /// Exit status once the process has been reaped
    status: Option<WaitStatus>,
}

impl Proc {
    /// Create from a spawned `std::process::Child`.
    ///
    /// Takes ownership of the child's stdin and stdout. The `Child` itself is
    /// dropped; reaping goes through `waitpid` from here on.
    pub fn from_child(mut child: std::process::Child) -> Result<Self> {
        let pid = Pid::from_raw(child.id() as i32);

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| CirnoError::Worker("Child stdin not captured".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| CirnoError::Worker("Child stdout not captured".into()))?;

        Ok(Self {
            pid,
            stdin: Some(LineWriter::new(PipeFd::new(OwnedFd::from(stdin)))),
            stdout: Some(LineReader::new(PipeFd::new(OwnedFd::from(stdout)))),
            status: None,
        })
    }

    /// Get the process ID as an unsigned value.
    pub fn id(&self) -> u32 {
        self.pid.as_raw() as u32
    }

    /// Send the request and close stdin so the worker sees EOF after it.
    pub fn send_and_close(&mut self, request: &WorkRequest) -> Result<()> {
        let mut writer = self
            .stdin
            .take()
            .ok_or_else(|| CirnoError::Worker("Worker stdin already closed".into()))?;
        let line = request.to_line()?;
        writer
            .write_line(&line)
            .map_err(|e| CirnoError::Worker(format!("Failed to send to worker: {}", e)))
    }

    /// Take the reader for the worker's stdout.
    pub fn take_stdout(&mut self) -> Option<LineReader> {
        self.stdout.take()
    }

    /// Check if the process is still running (non-blocking).
    pub fn is_running(&mut self) -> bool {
        matches!(self.try_wait(), Ok(None))
    }

    /// Wait for the process to exit (blocking).
    ///
    /// Returns the cached status if it was already reaped.
    pub fn wait(&mut self) -> Result<WaitStatus> {
        if let Some(status) = self.status {
            return Ok(status);
        }
        loop {
            match waitpid(self.pid, None) {
                Ok(status) => {
                    self.status = Some(status);
                    return Ok(status);
                }
                Err(Errno::EINTR) => continue,
                Err(e) => return Err(CirnoError::Worker(format!("waitpid failed: {}", e))),
            }
        }
    }

    /// Try to wait for the process (non-blocking).
    ///
    /// Returns `None` if the process is still running.
    pub fn try_wait(&mut self) -> Result<Option<WaitStatus>> {
        if let Some(status) = self.status {
            return Ok(Some(status));
        }
        match waitpid(self.pid, Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::StillAlive) => Ok(None),
            Ok(status) => {
                self.status = Some(status);
                Ok(Some(status))
            }
            Err(e) => Err(CirnoError::Worker(format!("waitpid failed: {}", e))),
        }
    }

    /// Signal the process group while the leader is alive.
    ///
    /// Returns false once the process has been reaped.
    pub fn signal_group(&mut self, sig: Signal) -> bool {
        if self.try_wait().ok().flatten().is_some() {
            return false;
        }
        signal::killpg(self.pid, sig).is_ok()
    }

    /// Signal every descendant, then the process group, then the process.
    ///
    /// Descendants are enumerated before anything is signaled so that
    /// children re-parented by their parent's death are still found. Once
    /// the process has been reaped its group id may be reused, so leftover
    /// group members are signaled one by one.
    fn signal_tree(&self, descendants: &[u32], sig: Signal) {
        for pid in descendants.iter().rev() {
            if tree::is_alive(*pid) {
                let _ = signal::kill(Pid::from_raw(*pid as i32), sig);
            }
        }
        if self.status.is_none() {
            let _ = signal::killpg(self.pid, sig);
            let _ = signal::kill(self.pid, sig);
        } else {
            self.kill_orphans(sig);
        }
    }

    fn kill_orphans(&self, sig: Signal) {
        for pid in tree::group_members(self.id()) {
            let _ = signal::kill(Pid::from_raw(pid as i32), sig);
        }
    }

    /// Terminate the process and all of its descendants.
    ///
    /// Sends SIGTERM to the whole tree, waits up to `grace` for the process
    /// to exit, then sends SIGKILL to anything still alive. Does not reap;
    /// call [`wait`](Self::wait) afterwards.
    pub fn terminate_tree(&mut self, grace: Duration) -> Result<()> {
        if self.status.is_some() {
            // The group may still hold orphans of a worker that already exited.
            self.kill_orphans(Signal::SIGKILL);
            return Ok(());
        }

        let descendants = tree::descendants(self.id());
        tracing::debug!(
            pid = self.id(),
            descendants = descendants.len(),
            "Terminating worker process tree"
        );
        self.signal_tree(&descendants, Signal::SIGTERM);

        let deadline = Instant::now() + grace;
        while Instant::now() < deadline {
            if self.try_wait()?.is_some()
                && !descendants.iter().any(|pid| tree::is_alive(*pid))
            {
                self.kill_orphans(Signal::SIGKILL);
                return Ok(());
            }
            std::thread::sleep(Duration::from_millis(10));
        }

        self.signal_tree(&descendants, Signal::SIGKILL);
        Ok(())
    }
}

impl Drop for Proc {
    fn drop(&mut self) {
        if self.status.is_none() {
            let _ = self.terminate_tree(Duration::from_millis(10));
            let _ = self.wait();
        }
    }
}
