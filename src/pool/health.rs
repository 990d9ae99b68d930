//! Health classification.
//!
//! Between the low and high watermarks lies a dead zone in which the pool
//! neither admits nor evicts, so it does not oscillate around a single limit.

use super::config::{PoolConfig, Thresholds};
use crate::metrics::ResourceUsage;
use serde::Serialize;
use std::fmt;

/// What the control loop should do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Status {
    /// Admit one pending worker.
    Healthy,
    /// Hold.
    MaybeOk,
    /// Evict the most recently admitted worker.
    Bad,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Healthy => "healthy",
            Self::MaybeOk => "maybe-ok",
            Self::Bad => "bad",
        };
        write!(f, "{}", s)
    }
}

/// The classification inputs that stay fixed for a pool's lifetime.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HealthPolicy {
    pub max_workers: usize,
    /// Below this many active workers the pool admits regardless of usage.
    pub min_workers: usize,
    pub smart: bool,
    pub low: Thresholds,
    pub high: Thresholds,
    pub max_load: Option<f64>,
}

impl HealthPolicy {
    /// Build the policy, capping the memory watermarks at
    /// `100 - reserved_mem` and keeping low at or below high.
    pub fn from_config(config: &PoolConfig) -> Self {
        let mut high = config.high_threshold;
        let mut low = config.low_threshold;
        high.mem = high.mem.min(100.0 - config.reserved_mem);
        low.mem = low.mem.min(high.mem);

        Self {
            max_workers: config.max_workers,
            min_workers: config.min_workers,
            smart: config.smart,
            low,
            high,
            max_load: config.max_load,
        }
    }

    /// Smallest active count eviction may leave behind.
    pub fn floor(&self) -> usize {
        self.min_workers.max(1)
    }

    fn overloaded(&self, usage: ResourceUsage) -> bool {
        usage.cpu >= self.high.cpu
            || usage.mem >= self.high.mem
            || self.max_load.is_some_and(|max| usage.load >= max)
    }

    /// Classify the pool given its active worker count and a host sample.
    ///
    /// `usage` is ignored unless the policy is smart.
    pub fn classify(&self, active: usize, usage: ResourceUsage) -> Status {
        if active > self.max_workers {
            return Status::Bad;
        }
        if active < self.min_workers {
            return Status::Healthy;
        }

        if !self.smart {
            return if active < self.max_workers {
                Status::Healthy
            } else {
                Status::MaybeOk
            };
        }

        if self.overloaded(usage) {
            Status::Bad
        } else if active == self.max_workers {
            Status::MaybeOk
        } else if usage.cpu < self.low.cpu && usage.mem < self.low.mem {
            Status::Healthy
        } else {
            Status::MaybeOk
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn smart(max_workers: usize) -> HealthPolicy {
        HealthPolicy {
            max_workers,
            min_workers: 0,
            smart: true,
            low: Thresholds::new(80.0, 80.0),
            high: Thresholds::new(95.0, 95.0),
            max_load: None,
        }
    }

    fn usage(cpu: f64, mem: f64) -> ResourceUsage {
        ResourceUsage::new(cpu, mem)
    }

    #[test]
    fn test_smart_healthy_below_low() {
        assert_eq!(smart(4).classify(1, usage(50.0, 50.0)), Status::Healthy);
    }

    #[test]
    fn test_smart_dead_zone() {
        assert_eq!(smart(4).classify(1, usage(90.0, 50.0)), Status::MaybeOk);
        assert_eq!(smart(4).classify(1, usage(50.0, 80.0)), Status::MaybeOk);
    }

    #[test]
    fn test_smart_bad_at_high() {
        assert_eq!(smart(4).classify(1, usage(96.0, 50.0)), Status::Bad);
        assert_eq!(smart(4).classify(1, usage(50.0, 95.0)), Status::Bad);
        // High watermark wins over the full-pool hold.
        assert_eq!(smart(4).classify(4, usage(99.0, 10.0)), Status::Bad);
    }

    #[test]
    fn test_smart_full_pool_holds() {
        assert_eq!(smart(4).classify(4, usage(1.0, 1.0)), Status::MaybeOk);
    }

    #[test]
    fn test_over_capacity_is_bad() {
        assert_eq!(smart(2).classify(3, usage(0.0, 0.0)), Status::Bad);
        let dumb = HealthPolicy {
            smart: false,
            ..smart(2)
        };
        assert_eq!(dumb.classify(3, usage(0.0, 0.0)), Status::Bad);
    }

    #[test]
    fn test_dumb_ignores_usage() {
        let dumb = HealthPolicy {
            smart: false,
            ..smart(2)
        };
        assert_eq!(dumb.classify(0, usage(100.0, 100.0)), Status::Healthy);
        assert_eq!(dumb.classify(1, usage(100.0, 100.0)), Status::Healthy);
        assert_eq!(dumb.classify(2, usage(0.0, 0.0)), Status::MaybeOk);
    }

    #[test]
    fn test_floor_admits_under_load() {
        let policy = HealthPolicy {
            min_workers: 2,
            ..smart(4)
        };
        assert_eq!(policy.classify(0, usage(100.0, 100.0)), Status::Healthy);
        assert_eq!(policy.classify(1, usage(100.0, 100.0)), Status::Healthy);
        assert_eq!(policy.classify(2, usage(100.0, 100.0)), Status::Bad);
        assert_eq!(policy.floor(), 2);
        assert_eq!(smart(4).floor(), 1);
    }

    #[test]
    fn test_load_average_limit() {
        let policy = HealthPolicy {
            max_load: Some(1.5),
            ..smart(4)
        };
        assert_eq!(
            policy.classify(1, usage(10.0, 10.0).with_load(1.4)),
            Status::Healthy
        );
        assert_eq!(
            policy.classify(1, usage(10.0, 10.0).with_load(1.5)),
            Status::Bad
        );
        // No limit configured: load is ignored.
        assert_eq!(
            smart(4).classify(1, usage(10.0, 10.0).with_load(50.0)),
            Status::Healthy
        );
    }

    #[test]
    fn test_reserved_memory_caps_watermarks() {
        let config = PoolConfig::default()
            .with_low_threshold(80.0, 80.0)
            .with_high_threshold(95.0, 95.0)
            .with_reserved_mem(30.0);
        let policy = HealthPolicy::from_config(&config);
        assert_eq!(policy.high, Thresholds::new(95.0, 70.0));
        assert_eq!(policy.low, Thresholds::new(80.0, 70.0));
        assert_eq!(policy.classify(1, usage(10.0, 72.0)), Status::Bad);
    }

    #[test]
    fn test_classify_is_pure() {
        let policy = smart(3);
        let first = policy.classify(2, usage(85.0, 20.0));
        for _ in 0..10 {
            assert_eq!(policy.classify(2, usage(85.0, 20.0)), first);
        }
    }

    #[test]
    fn test_from_config() {
        let config = PoolConfig::default()
            .with_max_workers(5)
            .with_smart(false)
            .with_low_threshold(10.0, 20.0);
        let policy = HealthPolicy::from_config(&config);
        assert_eq!(policy.max_workers, 5);
        assert!(!policy.smart);
        assert_eq!(policy.low, Thresholds::new(10.0, 20.0));
        assert_eq!(policy.high, config.high_threshold);
        assert_eq!(policy.min_workers, 0);
        assert!(policy.max_load.is_none());
    }

    #[test]
    fn test_status_display() {
        assert_eq!(Status::Healthy.to_string(), "healthy");
        assert_eq!(Status::MaybeOk.to_string(), "maybe-ok");
        assert_eq!(
            serde_json::to_string(&Status::MaybeOk).unwrap(),
            "\"maybe-ok\""
        );
    }
}
