//! cirno - an adaptive process pool.
//!
//! Tasks run in separate worker processes. Instead of a fixed concurrency
//! limit, the pool admits workers while the host has CPU and memory to spare
//! and evicts the newest one when it does not. An evicted task is not lost:
//! it goes back to the queue and its [`Handle`] follows it.
//!
//! # Example
//!
//! ```no_run
//! use cirno::{Pool, PoolConfig, Task};
//! use std::time::Duration;
//!
//! # fn main() -> cirno::Result<()> {
//! let pool = Pool::new(PoolConfig::default().with_poll_interval(Duration::from_millis(100)))?;
//! let handle = pool.submit(Task::new("sum").arg(1).arg(2))?;
//! pool.shutdown();
//! pool.close()?;
//! assert_eq!(handle.result_as::<i64>(), Ok(Some(3)));
//! # Ok(())
//! # }
//! ```
//!
//! The worker processes are re-executions of the current binary in
//! `internal-worker` mode; a binary embedding cirno dispatches that mode to
//! [`run_worker_main`] with its own [`WorkRegistry`], or points
//! [`PoolConfig::with_program`] at another program.

pub mod cli;
pub mod error;
pub mod handle;
pub mod logging;
pub mod metrics;
pub mod output;
pub mod pool;
pub mod task;
pub mod work;
pub mod worker;

pub use error::{CirnoError, Result};
pub use handle::Handle;
pub use metrics::{ResourceMonitor, ResourceUsage, SysinfoMonitor};
pub use pool::{HealthPolicy, Pool, PoolConfig, PoolStats, Status, Thresholds};
pub use task::{Outcome, Task, TaskFailure};
pub use work::{Work, WorkRegistry, builtin_registry};
pub use worker::{Worker, WorkerProgram, WorkerState, run_worker_main};
