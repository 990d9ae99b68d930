//! Host and per-process resource sampling.
//!
//! The pool needs CPU% and memory% per sample, either for the whole host or
//! for one worker process. Host samples also carry the load average.
//! [`ResourceMonitor`] is the seam; [`SysinfoMonitor`] is the production
//! implementation.

use std::sync::{Mutex, PoisonError};
use std::thread;
use sysinfo::{MINIMUM_CPU_UPDATE_INTERVAL, Pid, ProcessRefreshKind, ProcessesToUpdate, System};

/// A CPU/memory utilization sample, both in percent.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ResourceUsage {
    /// CPU utilization. For the host this is 0-100; for a process it may
    /// exceed 100 on multi-core hosts.
    pub cpu: f64,
    /// Memory in use as a share of total physical memory (0-100).
    pub mem: f64,
    /// Five-minute load average divided by the core count. Always 0 for
    /// process samples.
    pub load: f64,
}

impl ResourceUsage {
    pub fn new(cpu: f64, mem: f64) -> Self {
        Self { cpu, mem, load: 0.0 }
    }

    pub fn with_load(mut self, load: f64) -> Self {
        self.load = load;
        self
    }
}

/// Source of resource samples.
pub trait ResourceMonitor: Send + Sync {
    /// Sample host-wide CPU% and memory% (used / total × 100).
    fn system_usage(&self) -> ResourceUsage;

    /// Sample CPU% and memory% of one process.
    ///
    /// Returns `None` if the process does not exist.
    fn process_usage(&self, pid: u32) -> Option<ResourceUsage>;
}

/// [`ResourceMonitor`] backed by `sysinfo`.
///
/// CPU figures are deltas between two refreshes, so every sample blocks for
/// [`MINIMUM_CPU_UPDATE_INTERVAL`].
pub struct SysinfoMonitor {
    system: Mutex<System>,
}

impl SysinfoMonitor {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
        }
    }
}

impl Default for SysinfoMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceMonitor for SysinfoMonitor {
    fn system_usage(&self) -> ResourceUsage {
        let mut system = self.system.lock().unwrap_or_else(PoisonError::into_inner);

        system.refresh_cpu_usage();
        thread::sleep(MINIMUM_CPU_UPDATE_INTERVAL);
        system.refresh_cpu_usage();
        system.refresh_memory();

        let cpu = f64::from(system.global_cpu_usage());
        let mem = percent(system.used_memory(), system.total_memory());
        let load = per_core(System::load_average().five, system.cpus().len());

        tracing::trace!(cpu, mem, load, "Sampled system usage");
        ResourceUsage::new(cpu, mem).with_load(load)
    }

    fn process_usage(&self, pid: u32) -> Option<ResourceUsage> {
        let pid = Pid::from_u32(pid);
        let refresh = ProcessRefreshKind::new().with_cpu().with_memory();
        let mut system = self.system.lock().unwrap_or_else(PoisonError::into_inner);

        system.refresh_processes_specifics(ProcessesToUpdate::Some(&[pid]), true, refresh);
        thread::sleep(MINIMUM_CPU_UPDATE_INTERVAL);
        system.refresh_processes_specifics(ProcessesToUpdate::Some(&[pid]), true, refresh);
        system.refresh_memory();

        let total = system.total_memory();
        let process = system.process(pid)?;
        Some(ResourceUsage::new(
            f64::from(process.cpu_usage()),
            percent(process.memory(), total),
        ))
    }
}

fn percent(part: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64 * 100.0
    }
}

fn per_core(load: f64, cpus: usize) -> f64 {
    load / cpus.max(1) as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percent() {
        assert_eq!(percent(0, 0), 0.0);
        assert_eq!(percent(50, 200), 25.0);
        assert_eq!(percent(200, 200), 100.0);
    }

    #[test]
    fn test_per_core() {
        assert_eq!(per_core(4.0, 8), 0.5);
        assert_eq!(per_core(3.0, 0), 3.0);
        assert_eq!(ResourceUsage::new(1.0, 2.0).load, 0.0);
        assert_eq!(ResourceUsage::new(1.0, 2.0).with_load(0.7).load, 0.7);
    }

    #[test]
    fn test_system_usage_in_range() {
        let usage = SysinfoMonitor::new().system_usage();
        assert!((0.0..=100.0).contains(&usage.mem), "mem: {}", usage.mem);
        assert!(usage.cpu >= 0.0, "cpu: {}", usage.cpu);
        assert!(usage.load >= 0.0, "load: {}", usage.load);
    }

    #[test]
    fn test_process_usage_self() {
        let monitor = SysinfoMonitor::new();
        let usage = monitor
            .process_usage(std::process::id())
            .expect("own process should be visible");
        assert!(usage.mem > 0.0);
        assert!(usage.mem < 100.0);
    }

    #[test]
    fn test_process_usage_missing() {
        // PIDs are capped well below this on Linux and macOS.
        assert!(SysinfoMonitor::new().process_usage(u32::MAX - 1).is_none());
    }
}
