//! Work items and the registry that resolves them inside a worker process.
//!
//! A worker process receives a [`Task`] by name, so everything it can run has
//! to be registered up front in a [`WorkRegistry`]. Closures with the right
//! signature implement [`Work`] directly.

use crate::task::{EXEC_WORK, Outcome, Task, TaskFailure};
use serde_json::{Map, Value, json};
use std::collections::HashMap;
use std::io::Write;
use std::panic::{self, AssertUnwindSafe};
use std::process::Command;
use std::sync::Arc;
use std::time::Duration;

/// A unit of business logic runnable in a worker process.
pub trait Work: Send + Sync {
    /// Run the work with the task's inputs.
    fn execute(&self, args: &[Value], kwargs: &Map<String, Value>) -> Result<Value, TaskFailure>;
}

impl<F> Work for F
where
    F: Fn(&[Value], &Map<String, Value>) -> Result<Value, TaskFailure> + Send + Sync,
{
    fn execute(&self, args: &[Value], kwargs: &Map<String, Value>) -> Result<Value, TaskFailure> {
        self(args, kwargs)
    }
}

/// Named work items available to worker processes.
#[derive(Clone, Default)]
pub struct WorkRegistry {
    works: HashMap<String, Arc<dyn Work>>,
}

impl WorkRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a work item, replacing any previous one with the same name.
    pub fn register(&mut self, name: impl Into<String>, work: impl Work + 'static) -> &mut Self {
        self.works.insert(name.into(), Arc::new(work));
        self
    }

    /// Builder-style variant of [`register`](Self::register).
    pub fn with(mut self, name: impl Into<String>, work: impl Work + 'static) -> Self {
        self.register(name, work);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Work>> {
        self.works.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.works.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.works.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Run a task to an outcome.
    ///
    /// Panics in the work body are caught and reported as
    /// [`TaskFailure::PANIC`]; nothing escapes as an unwinding panic.
    pub fn execute(&self, task: &Task) -> Outcome {
        let Some(work) = self.get(&task.work) else {
            return Outcome::from(Err(TaskFailure::new(
                TaskFailure::UNKNOWN_WORK,
                format!("no work item named '{}' is registered", task.work),
            )));
        };

        match panic::catch_unwind(AssertUnwindSafe(|| work.execute(&task.args, &task.kwargs))) {
            Ok(result) => Outcome::from(result),
            Err(payload) => Outcome::from(Err(TaskFailure::new(
                TaskFailure::PANIC,
                panic_message(payload.as_ref()),
            ))),
        }
    }
}

impl std::fmt::Debug for WorkRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkRegistry")
            .field("works", &self.names())
            .finish()
    }
}

/// Extract the message from a panic payload.
fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "task panicked with a non-string payload".to_string()
    }
}

/// Registry with the built-in work items used by the `cirno` binary.
///
/// - `echo`: returns the first positional input, or null.
/// - `sum`: sums numeric positional inputs.
/// - `sleep`: sleeps `args[0]` seconds, then returns `args[1]` (or null).
/// - `fail`: fails with kind `args[0]`, message `args[1]`, payload `kwargs.payload`.
/// - `panic`: panics with `args[0]`.
/// - `exec`: runs `args[0]` through `sh -c`.
/// - `print`: writes each input to stdout on its own line, returns the count.
pub fn builtin_registry() -> WorkRegistry {
    WorkRegistry::new()
        .with("echo", echo)
        .with("sum", sum)
        .with("sleep", sleep)
        .with("fail", fail)
        .with("panic", panic_work)
        .with(EXEC_WORK, exec)
        .with("print", print)
}

fn echo(args: &[Value], _kwargs: &Map<String, Value>) -> Result<Value, TaskFailure> {
    Ok(args.first().cloned().unwrap_or(Value::Null))
}

fn sum(args: &[Value], _kwargs: &Map<String, Value>) -> Result<Value, TaskFailure> {
    let mut int_total: i64 = 0;
    let mut float_total: f64 = 0.0;
    let mut saw_float = false;

    for (idx, arg) in args.iter().enumerate() {
        if let Some(n) = arg.as_i64() {
            int_total = int_total.checked_add(n).ok_or_else(|| {
                TaskFailure::new("OverflowError", format!("sum overflowed at argument {idx}"))
            })?;
        } else if let Some(n) = arg.as_f64() {
            float_total += n;
            saw_float = true;
        } else {
            return Err(TaskFailure::new(
                "TypeError",
                format!("argument {idx} is not a number: {arg}"),
            ));
        }
    }

    if saw_float {
        Ok(json!(int_total as f64 + float_total))
    } else {
        Ok(json!(int_total))
    }
}

fn sleep(args: &[Value], _kwargs: &Map<String, Value>) -> Result<Value, TaskFailure> {
    let secs = args.first().and_then(Value::as_f64).unwrap_or(0.0);
    if !secs.is_finite() || secs < 0.0 {
        return Err(TaskFailure::new(
            "ValueError",
            format!("sleep duration must be a non-negative number, got {secs}"),
        ));
    }
    std::thread::sleep(Duration::from_secs_f64(secs));
    Ok(args.get(1).cloned().unwrap_or(Value::Null))
}

fn fail(args: &[Value], kwargs: &Map<String, Value>) -> Result<Value, TaskFailure> {
    let kind = args.first().and_then(Value::as_str).unwrap_or("Error");
    let message = args.get(1).and_then(Value::as_str).unwrap_or("task failed");
    let mut failure = TaskFailure::new(kind, message);
    if let Some(payload) = kwargs.get("payload") {
        failure = failure.with_payload(payload.clone());
    }
    Err(failure)
}

fn panic_work(args: &[Value], _kwargs: &Map<String, Value>) -> Result<Value, TaskFailure> {
    let message = args
        .first()
        .and_then(Value::as_str)
        .unwrap_or("explicit panic");
    panic!("{}", message);
}

fn print(args: &[Value], _kwargs: &Map<String, Value>) -> Result<Value, TaskFailure> {
    let mut stdout = std::io::stdout().lock();
    for arg in args {
        let written = match arg {
            Value::String(s) => writeln!(stdout, "{}", s),
            other => writeln!(stdout, "{}", other),
        };
        written.map_err(|e| TaskFailure::new("OSError", format!("failed to print: {}", e)))?;
    }
    stdout
        .flush()
        .map_err(|e| TaskFailure::new("OSError", format!("failed to print: {}", e)))?;
    Ok(json!(args.len()))
}

fn exec(args: &[Value], _kwargs: &Map<String, Value>) -> Result<Value, TaskFailure> {
    let Some(cmd) = args.first().and_then(Value::as_str) else {
        return Err(TaskFailure::new(
            "TypeError",
            "exec expects a command string as its first argument",
        ));
    };

    let output = Command::new("sh")
        .arg("-c")
        .arg(cmd)
        .output()
        .map_err(|e| TaskFailure::new("OSError", format!("failed to run '{}': {}", cmd, e)))?;

    let result = json!({
        "code": output.status.code(),
        "stdout": String::from_utf8_lossy(&output.stdout),
        "stderr": String::from_utf8_lossy(&output.stderr),
    });

    if output.status.success() {
        Ok(result)
    } else {
        Err(TaskFailure::new(
            "ExitStatus",
            format!("'{}' exited with {}", cmd, output.status),
        )
        .with_payload(result))
    }
}
