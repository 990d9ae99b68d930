//! Error types for cirno.

use thiserror::Error;

/// Main error type for cirno.
///
/// Failures of a task body are not represented here: they travel as
/// [`TaskFailure`](crate::task::TaskFailure) values through the task's handle.
#[derive(Error, Debug)]
pub enum CirnoError {
    #[error("Pool has been shut down; no further tasks are accepted")]
    ShutDown,

    #[error("Pool must be shut down before it can be closed. Call shutdown() first.")]
    NotShutDown,

    #[error("Invalid pool configuration: {0}")]
    InvalidConfig(String),

    #[error("Worker error: {0}")]
    Worker(String),

    #[error("Task list error at line {line}: {message}")]
    TaskFile { line: usize, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for cirno operations.
pub type Result<T> = std::result::Result<T, CirnoError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_shutdown_error_message() {
        let msg = CirnoError::ShutDown.to_string();
        assert!(msg.contains("shut down"));
        assert!(msg.contains("no further tasks"));
    }

    #[test]
    fn test_not_shutdown_error_message() {
        let msg = CirnoError::NotShutDown.to_string();
        assert!(msg.contains("shutdown()"));
    }

    #[test]
    fn test_invalid_config_error_message() {
        let err = CirnoError::InvalidConfig("max_workers must be at least 1".to_string());
        let msg = err.to_string();
        assert!(msg.contains("configuration"));
        assert!(msg.contains("max_workers"));
    }

    #[test]
    fn test_task_file_error_message() {
        let err = CirnoError::TaskFile {
            line: 7,
            message: "expected value".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("line 7"));
        assert!(msg.contains("expected value"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let err: CirnoError = io_err.into();
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_json_error_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("{ invalid json }").unwrap_err();
        let err: CirnoError = json_err.into();
        assert!(err.to_string().contains("JSON"));
    }

    #[test]
    fn test_error_debug_format() {
        let err = CirnoError::Worker("spawn failed".to_string());
        let debug = format!("{:?}", err);
        assert!(debug.contains("Worker"));
        assert!(debug.contains("spawn failed"));
    }
}
