//! Worker processes.
//!
//! Every task attempt runs in its own OS process: a re-execution of the
//! worker program that reads one request and reports one outcome.
//!
//! # Architecture
//!
//! ```text
//!                     ┌─────────────────┐
//!                     │   Pool process  │
//!                     │ (control loop)  │
//!                     └────────┬────────┘
//!                              │ stdin: {"cirno":"run",...}
//!               ┌──────────────┼──────────────┐
//!               │              │              │
//!         ┌─────▼─────┐  ┌─────▼─────┐  ┌─────▼─────┐
//!         │ Worker 1  │  │ Worker 2  │  │ Worker N  │
//!         │ (process  │  │ (process  │  │ (process  │
//!         │  group)   │  │  group)   │  │  group)   │
//!         └───────────┘  └───────────┘  └───────────┘
//!                              │ stdout: {"cirno":"value",...}
//!                              ▼
//!             collector thread → latest frame at EOF
//! ```
//!
//! # Features
//!
//! - **Process isolation**: A crashing task takes down only its own worker
//! - **Crash reporting**: Workers that die silently get a `WorkerCrashed` failure
//! - **Tree termination**: Terminating a worker also kills every descendant
//! - **Private protocol channel**: A task's own stdout is redirected to stderr

mod ipc;
mod lifecycle;
mod proc;
mod protocol;
mod signals;
mod spawn;
mod tree;
pub mod worker_main;

pub use lifecycle::{TERMINATE_GRACE, Worker, WorkerState};
pub use protocol::{WorkRequest, WorkResponse};
pub use spawn::{INTERNAL_WORKER_ARG, WorkerProgram};
pub use worker_main::run_worker_main;
