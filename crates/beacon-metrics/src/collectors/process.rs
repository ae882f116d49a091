use std::time::Instant;

use beacon_common::Result;

use crate::{
    collector::Collector,
    types::{MetricDescriptor, MetricFamily, MetricKind, MetricSample, MetricValue},
};

/// Process-level resource statistics, computed at scrape time. Constant
/// labels are applied to every sample this collector emits.
pub struct ProcessCollector {
    started_at: Instant,
    constant_labels: Vec<(String, String)>,
}

impl ProcessCollector {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            constant_labels: Vec::new(),
        }
    }

    pub fn with_label(mut self, key: &str, value: &str) -> Self {
        self.constant_labels
            .push((key.to_string(), value.to_string()));
        self
    }

    fn gauge_family(&self, name: &str, help: &str, value: f64) -> MetricFamily {
        let mut descriptor = MetricDescriptor::new(name, help, MetricKind::Gauge, &[]);
        descriptor.label_keys = self
            .constant_labels
            .iter()
            .map(|(key, _)| key.clone())
            .collect();

        MetricFamily {
            descriptor,
            samples: vec![MetricSample {
                labels: self.constant_labels.clone(),
                value: MetricValue::Gauge(value),
            }],
        }
    }
}

impl Default for ProcessCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl Collector for ProcessCollector {
    fn name(&self) -> &str {
        "process"
    }

    fn collect(&self) -> Result<Vec<MetricFamily>> {
        let mut families = vec![self.gauge_family(
            "process_uptime_seconds",
            "Time since this collector was installed in seconds",
            self.started_at.elapsed().as_secs_f64(),
        )];

        if let Some(resident_bytes) = read_resident_memory_bytes() {
            families.push(self.gauge_family(
                "process_resident_memory_bytes",
                "Resident memory size of the process in bytes",
                resident_bytes as f64,
            ));
        }

        if let Some(open_fds) = count_open_fds() {
            families.push(self.gauge_family(
                "process_open_fds",
                "Number of open file descriptors",
                open_fds as f64,
            ));
        }

        if let Ok(parallelism) = std::thread::available_parallelism() {
            families.push(self.gauge_family(
                "process_worker_threads",
                "Number of worker threads available to the process",
                parallelism.get() as f64,
            ));
        }

        Ok(families)
    }
}

#[cfg(target_os = "linux")]
fn read_resident_memory_bytes() -> Option<u64> {
    let status = std::fs::read_to_string("/proc/self/status").ok()?;
    for line in status.lines() {
        if let Some(rest) = line.strip_prefix("VmRSS:") {
            let kb = rest
                .split_whitespace()
                .next()
                .and_then(|value| value.parse::<u64>().ok())?;
            return kb.checked_mul(1024);
        }
    }
    None
}

#[cfg(not(target_os = "linux"))]
fn read_resident_memory_bytes() -> Option<u64> {
    None
}

#[cfg(target_os = "linux")]
fn count_open_fds() -> Option<u64> {
    Some(std::fs::read_dir("/proc/self/fd").ok()?.count() as u64)
}

#[cfg(not(target_os = "linux"))]
fn count_open_fds() -> Option<u64> {
    None
}
