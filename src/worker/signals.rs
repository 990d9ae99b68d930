//! Crash analysis for worker processes.
//!
//! A worker that dies on its own without reporting an outcome is turned into a
//! [`TaskFailure`] describing how it died.

use crate::task::TaskFailure;
use nix::sys::signal::Signal;
use nix::sys::wait::WaitStatus;
use serde_json::json;

/// Reason why a worker process terminated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminationReason {
    /// Normal exit with status code.
    Exited(i32),
    /// Killed by signal.
    Signaled(Signal),
    /// Likely out of memory (SIGKILL from OOM killer).
    OutOfMemory,
    /// Stack overflow (SIGSEGV on Linux).
    StackOverflow,
    /// Stack overflow (SIGBUS on macOS).
    StackOverflowMacOS,
    /// Process is still running.
    StillAlive,
    /// Unknown termination reason.
    Unknown,
}

impl TerminationReason {
    /// Get a human-readable description.
    pub fn description(&self) -> String {
        match self {
            Self::Exited(code) => format!("exited with code {}", code),
            Self::Signaled(sig) => format!("killed by signal {:?}", sig),
            Self::OutOfMemory => "out of memory (SIGKILL from OOM killer)".to_string(),
            Self::StackOverflow => "stack overflow (SIGSEGV)".to_string(),
            Self::StackOverflowMacOS => "stack overflow (SIGBUS)".to_string(),
            Self::StillAlive => "still running".to_string(),
            Self::Unknown => "unknown reason".to_string(),
        }
    }

    /// Failure reported for a worker that died this way without an outcome.
    pub fn into_failure(self) -> TaskFailure {
        let (exit_code, signal) = match &self {
            Self::Exited(code) => (Some(*code), None),
            Self::Signaled(sig) => (None, Some(sig.as_str())),
            Self::OutOfMemory => (None, Some(Signal::SIGKILL.as_str())),
            Self::StackOverflow => (None, Some(Signal::SIGSEGV.as_str())),
            Self::StackOverflowMacOS => (None, Some(Signal::SIGBUS.as_str())),
            Self::StillAlive | Self::Unknown => (None, None),
        };
        TaskFailure::new(
            TaskFailure::WORKER_CRASHED,
            format!("worker process {} without reporting an outcome", self),
        )
        .with_payload(json!({ "exit_code": exit_code, "signal": signal }))
    }
}

impl std::fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// Analyze a `WaitStatus` to determine the termination reason.
pub fn analyze_wait_status(status: WaitStatus) -> TerminationReason {
    match status {
        WaitStatus::Exited(_, code) => TerminationReason::Exited(code),

        WaitStatus::Signaled(_, signal, _) => match signal {
            // SIGKILL (9) - likely OOM killer
            Signal::SIGKILL => TerminationReason::OutOfMemory,

            // SIGSEGV (11) - stack overflow on Linux
            Signal::SIGSEGV => TerminationReason::StackOverflow,

            // SIGBUS (10) - stack overflow on macOS
            Signal::SIGBUS => TerminationReason::StackOverflowMacOS,

            _ => TerminationReason::Signaled(signal),
        },

        WaitStatus::StillAlive => TerminationReason::StillAlive,

        _ => TerminationReason::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::unistd::Pid;

    #[test]
    fn test_analyze_wait_status() {
        let status = WaitStatus::Exited(Pid::from_raw(1), 0);
        assert_eq!(analyze_wait_status(status), TerminationReason::Exited(0));

        let status = WaitStatus::Signaled(Pid::from_raw(1), Signal::SIGKILL, false);
        assert_eq!(analyze_wait_status(status), TerminationReason::OutOfMemory);

        let status = WaitStatus::Signaled(Pid::from_raw(1), Signal::SIGABRT, true);
        assert_eq!(
            analyze_wait_status(status),
            TerminationReason::Signaled(Signal::SIGABRT)
        );

        assert_eq!(
            analyze_wait_status(WaitStatus::StillAlive),
            TerminationReason::StillAlive
        );
    }

    #[test]
    fn test_crash_failure_from_exit_code() {
        let failure = TerminationReason::Exited(3).into_failure();
        assert!(failure.is(TaskFailure::WORKER_CRASHED));
        assert!(failure.message.contains("exited with code 3"));
        assert_eq!(
            failure.payload,
            Some(json!({ "exit_code": 3, "signal": null }))
        );
    }

    #[test]
    fn test_crash_failure_from_signal() {
        let failure = TerminationReason::Signaled(Signal::SIGABRT).into_failure();
        assert!(failure.message.contains("SIGABRT"));
        assert_eq!(failure.payload.unwrap()["signal"], json!("SIGABRT"));
    }
}
