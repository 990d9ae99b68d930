//! Pool configuration.

use crate::error::{CirnoError, Result};
use crate::worker::WorkerProgram;
use std::path::PathBuf;
use std::time::Duration;

/// A CPU% / memory% pair used as a low or high watermark.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    pub cpu: f64,
    pub mem: f64,
}

impl Thresholds {
    pub const fn new(cpu: f64, mem: f64) -> Self {
        Self { cpu, mem }
    }
}

/// Default low watermark: admit new workers below 80% CPU and memory.
pub const DEFAULT_LOW_THRESHOLD: Thresholds = Thresholds::new(80.0, 80.0);

/// Default high watermark: evict at or above 95% CPU or memory.
pub const DEFAULT_HIGH_THRESHOLD: Thresholds = Thresholds::new(95.0, 95.0);

/// Default control loop period.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(9);

/// Default time a timed-out task gets between SIGALRM and SIGKILL.
pub const DEFAULT_TIMEOUT_GRACE: Duration = Duration::from_secs(5);

/// Number of logical cores, or 1 if it cannot be determined.
pub fn default_max_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Configuration for the pool.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Upper bound on concurrently running workers.
    pub max_workers: usize,
    /// Workers admitted and kept regardless of host load.
    pub min_workers: usize,
    /// Whether admission and eviction follow host CPU and memory.
    pub smart: bool,
    /// Both metrics must be below these to admit a worker.
    pub low_threshold: Thresholds,
    /// Either metric at or above these evicts a worker.
    pub high_threshold: Thresholds,
    /// Five-minute load average per core at or above which a worker is
    /// evicted (`None` = load is not considered).
    pub max_load: Option<f64>,
    /// Share of memory (percent) kept free for everything else; caps the
    /// memory watermarks at `100 - reserved_mem`.
    pub reserved_mem: f64,
    /// Period of the control loop.
    pub poll_interval: Duration,
    /// Wall-clock limit per task attempt (`None` = unlimited).
    pub timeout: Option<Duration>,
    /// Time between the SIGALRM sent at the timeout and the final SIGKILL.
    pub timeout_grace: Duration,
    /// Directory receiving one output log per task (`None` = output is
    /// passed through to stderr).
    pub output_dir: Option<PathBuf>,
    /// Program run by each worker process (`None` = current executable).
    pub program: Option<WorkerProgram>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            min_workers: 0,
            smart: true,
            low_threshold: DEFAULT_LOW_THRESHOLD,
            high_threshold: DEFAULT_HIGH_THRESHOLD,
            max_load: None,
            reserved_mem: 0.0,
            poll_interval: DEFAULT_POLL_INTERVAL,
            timeout: None,
            timeout_grace: DEFAULT_TIMEOUT_GRACE,
            output_dir: None,
            program: None,
        }
    }
}

impl PoolConfig {
    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers;
        self
    }

    pub fn with_min_workers(mut self, min_workers: usize) -> Self {
        self.min_workers = min_workers;
        self
    }

    pub fn with_smart(mut self, smart: bool) -> Self {
        self.smart = smart;
        self
    }

    pub fn with_low_threshold(mut self, cpu: f64, mem: f64) -> Self {
        self.low_threshold = Thresholds::new(cpu, mem);
        self
    }

    pub fn with_high_threshold(mut self, cpu: f64, mem: f64) -> Self {
        self.high_threshold = Thresholds::new(cpu, mem);
        self
    }

    pub fn with_max_load(mut self, max_load: f64) -> Self {
        self.max_load = Some(max_load);
        self
    }

    pub fn with_reserved_mem(mut self, reserved_mem: f64) -> Self {
        self.reserved_mem = reserved_mem;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_timeout_grace(mut self, grace: Duration) -> Self {
        self.timeout_grace = grace;
        self
    }

    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = Some(dir.into());
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_program(mut self, program: WorkerProgram) -> Self {
        self.program = Some(program);
        self
    }

    /// Check the configuration for values the pool cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.max_workers == 0 {
            return Err(CirnoError::InvalidConfig(
                "max_workers must be at least 1".to_string(),
            ));
        }
        if self.min_workers > self.max_workers {
            return Err(CirnoError::InvalidConfig(format!(
                "min_workers ({}) exceeds max_workers ({})",
                self.min_workers, self.max_workers
            )));
        }
        if self.poll_interval.is_zero() {
            return Err(CirnoError::InvalidConfig(
                "poll_interval must be greater than zero".to_string(),
            ));
        }
        if self.timeout.is_some_and(|t| t.is_zero()) {
            return Err(CirnoError::InvalidConfig(
                "timeout must be greater than zero".to_string(),
            ));
        }
        if let Some(load) = self.max_load
            && !(load.is_finite() && load > 0.0)
        {
            return Err(CirnoError::InvalidConfig(format!(
                "max_load must be a positive number, got {load}"
            )));
        }
        if !(0.0..100.0).contains(&self.reserved_mem) {
            return Err(CirnoError::InvalidConfig(format!(
                "reserved_mem must be within 0-100 (exclusive), got {}",
                self.reserved_mem
            )));
        }

        for (name, t) in [("low", self.low_threshold), ("high", self.high_threshold)] {
            for (metric, value) in [("cpu", t.cpu), ("mem", t.mem)] {
                if !(0.0..=100.0).contains(&value) {
                    return Err(CirnoError::InvalidConfig(format!(
                        "{name} {metric} threshold must be within 0-100, got {value}"
                    )));
                }
            }
        }

        if self.low_threshold.cpu > self.high_threshold.cpu {
            return Err(CirnoError::InvalidConfig(format!(
                "low cpu threshold ({}) exceeds high cpu threshold ({})",
                self.low_threshold.cpu, self.high_threshold.cpu
            )));
        }
        if self.low_threshold.mem > self.high_threshold.mem {
            return Err(CirnoError::InvalidConfig(format!(
                "low mem threshold ({}) exceeds high mem threshold ({})",
                self.low_threshold.mem, self.high_threshold.mem
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = PoolConfig::default();
        assert_eq!(config.max_workers, default_max_workers());
        assert!(config.max_workers >= 1);
        assert!(config.smart);
        assert_eq!(config.low_threshold, Thresholds::new(80.0, 80.0));
        assert_eq!(config.high_threshold, Thresholds::new(95.0, 95.0));
        assert_eq!(config.poll_interval, Duration::from_secs(9));
        assert_eq!(config.min_workers, 0);
        assert!(config.max_load.is_none());
        assert_eq!(config.reserved_mem, 0.0);
        assert!(config.timeout.is_none());
        assert_eq!(config.timeout_grace, Duration::from_secs(5));
        assert!(config.output_dir.is_none());
        assert!(config.program.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builders() {
        let config = PoolConfig::default()
            .with_max_workers(2)
            .with_smart(false)
            .with_low_threshold(10.0, 20.0)
            .with_high_threshold(30.0, 40.0)
            .with_poll_interval(Duration::from_millis(50))
            .with_min_workers(1)
            .with_max_load(1.5)
            .with_reserved_mem(10.0)
            .with_timeout(Duration::from_secs(30))
            .with_timeout_grace(Duration::from_secs(1))
            .with_output_dir("/tmp/cirno-run")
            .with_program(WorkerProgram::new("/bin/true"));
        assert_eq!(config.min_workers, 1);
        assert_eq!(config.max_load, Some(1.5));
        assert_eq!(config.reserved_mem, 10.0);
        assert_eq!(config.timeout, Some(Duration::from_secs(30)));
        assert_eq!(config.timeout_grace, Duration::from_secs(1));
        assert_eq!(config.output_dir, Some(PathBuf::from("/tmp/cirno-run")));
        assert!(config.validate().is_ok());
        assert_eq!(config.max_workers, 2);
        assert!(!config.smart);
        assert_eq!(config.low_threshold, Thresholds::new(10.0, 20.0));
        assert_eq!(config.high_threshold, Thresholds::new(30.0, 40.0));
        assert_eq!(config.poll_interval, Duration::from_millis(50));
        assert!(config.program.is_some());
    }

    #[test]
    fn test_validate_rejects_zero_workers() {
        let err = PoolConfig::default().with_max_workers(0).validate().unwrap_err();
        assert!(err.to_string().contains("max_workers"));
    }

    #[test]
    fn test_validate_rejects_zero_poll() {
        let err = PoolConfig::default()
            .with_poll_interval(Duration::ZERO)
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("poll_interval"));
    }

    #[test]
    fn test_validate_rejects_out_of_range() {
        let err = PoolConfig::default()
            .with_high_threshold(101.0, 95.0)
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("high cpu"));

        assert!(
            PoolConfig::default()
                .with_low_threshold(-1.0, 80.0)
                .validate()
                .is_err()
        );
        assert!(
            PoolConfig::default()
                .with_low_threshold(f64::NAN, 80.0)
                .validate()
                .is_err()
        );
    }

    #[test]
    fn test_validate_rejects_inverted_thresholds() {
        let err = PoolConfig::default()
            .with_low_threshold(80.0, 96.0)
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("low mem"));
    }

    #[test]
    fn test_validate_rejects_floor_above_ceiling() {
        let err = PoolConfig::default()
            .with_max_workers(2)
            .with_min_workers(3)
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("min_workers"));
        assert!(
            PoolConfig::default()
                .with_max_workers(2)
                .with_min_workers(2)
                .validate()
                .is_ok()
        );
    }

    #[test]
    fn test_validate_rejects_bad_timeout_and_limits() {
        let err = PoolConfig::default()
            .with_timeout(Duration::ZERO)
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("timeout"));

        let err = PoolConfig::default().with_max_load(0.0).validate().unwrap_err();
        assert!(err.to_string().contains("max_load"));
        assert!(PoolConfig::default().with_max_load(f64::NAN).validate().is_err());

        let err = PoolConfig::default()
            .with_reserved_mem(100.0)
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("reserved_mem"));
        assert!(PoolConfig::default().with_reserved_mem(-5.0).validate().is_err());
    }
}
