//! Runtime statistics sampler.
//!
//! Each poll produces one `PollCount` increment, a fresh `RandomValue`,
//! and system and process gauges read through `sysinfo`.

use sysinfo::{Pid, ProcessesToUpdate, System};
use tracing::{debug, warn};

use tally_state::{Metric, Repository, StateResult};

pub const POLL_COUNT: &str = "PollCount";
pub const RANDOM_VALUE: &str = "RandomValue";

pub struct Sampler {
    system: System,
    pid: Option<Pid>,
}

impl Default for Sampler {
    fn default() -> Self {
        Self::new()
    }
}

impl Sampler {
    pub fn new() -> Self {
        let pid = match sysinfo::get_current_pid() {
            Ok(pid) => Some(pid),
            Err(e) => {
                warn!(error = e, "process id unavailable, skipping process gauges");
                None
            }
        };
        Self {
            system: System::new(),
            pid,
        }
    }

    /// Read one round of statistics.
    ///
    /// CPU utilisation is measured between consecutive calls, so the first
    /// sample reports zero for every core.
    pub fn sample(&mut self) -> StateResult<Vec<Metric>> {
        self.system.refresh_memory();
        self.system.refresh_cpu_usage();

        let mut metrics = vec![
            Metric::counter(POLL_COUNT, 1)?,
            Metric::gauge(RANDOM_VALUE, random_unit())?,
            Metric::gauge("TotalMemory", self.system.total_memory() as f64)?,
            Metric::gauge("FreeMemory", self.system.free_memory() as f64)?,
            Metric::gauge("UsedMemory", self.system.used_memory() as f64)?,
            Metric::gauge("AvailableMemory", self.system.available_memory() as f64)?,
            Metric::gauge("TotalSwap", self.system.total_swap() as f64)?,
            Metric::gauge("UsedSwap", self.system.used_swap() as f64)?,
        ];

        for (i, cpu) in self.system.cpus().iter().enumerate() {
            let usage = f64::from(cpu.cpu_usage());
            if usage.is_finite() {
                metrics.push(Metric::gauge(format!("CPUutilization{}", i + 1), usage)?);
            }
        }

        if let Some(pid) = self.pid {
            self.system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
            if let Some(process) = self.system.process(pid) {
                metrics.push(Metric::gauge("Alloc", process.memory() as f64)?);
                metrics.push(Metric::gauge("Sys", process.virtual_memory() as f64)?);
            }
        }

        Ok(metrics)
    }

    /// Sample and aggregate into `repo`.
    pub fn poll(&mut self, repo: &Repository) {
        let metrics = match self.sample() {
            Ok(metrics) => metrics,
            Err(e) => {
                warn!(error = %e, "sampling failed");
                return;
            }
        };
        let count = metrics.len();
        for metric in metrics {
            if let Err(e) = repo.collect(metric) {
                warn!(error = %e, "failed to record sample");
            }
        }
        debug!(metrics = count, "poll complete");
    }
}

/// Uniform value in `[0, 1)` from the OS random source.
fn random_unit() -> f64 {
    let mut buf = [0u8; 8];
    if let Err(e) = getrandom::getrandom(&mut buf) {
        warn!(error = %e, "random source unavailable");
        return 0.0;
    }
    // Top 53 bits fill the f64 mantissa exactly.
    (u64::from_le_bytes(buf) >> 11) as f64 / (1u64 << 53) as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use tally_state::{MetricKey, MetricKind};

    #[test]
    fn random_unit_in_range() {
        for _ in 0..100 {
            let v = random_unit();
            assert!((0.0..1.0).contains(&v), "{v}");
        }
    }

    #[test]
    fn sample_contains_core_metrics() {
        let mut sampler = Sampler::new();
        let metrics = sampler.sample().unwrap();

        let poll = metrics.iter().find(|m| m.id() == POLL_COUNT).unwrap();
        assert_eq!(poll.kind(), MetricKind::Counter);
        assert_eq!(poll.delta(), Some(1));

        for name in [RANDOM_VALUE, "TotalMemory", "UsedMemory"] {
            let m = metrics.iter().find(|m| m.id() == name).unwrap();
            assert_eq!(m.kind(), MetricKind::Gauge, "{name}");
        }
    }

    #[test]
    fn poll_count_accumulates() {
        let mut sampler = Sampler::new();
        let repo = Repository::default();
        sampler.poll(&repo);
        sampler.poll(&repo);
        sampler.poll(&repo);

        let stored = repo.get(&MetricKey::counter(POLL_COUNT).unwrap()).unwrap();
        assert_eq!(stored.delta(), Some(3));
        assert!(repo.get(&MetricKey::gauge(RANDOM_VALUE).unwrap()).is_some());
    }
}
