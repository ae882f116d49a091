use std::time::Duration;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Per-collector time budget for one scrape pass, in milliseconds.
    pub collector_timeout_ms: u64,
    /// Capacity of each summary series' sliding observation window.
    pub summary_window: usize,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            collector_timeout_ms: 2_000,
            summary_window: 1_024,
        }
    }
}

impl MetricsConfig {
    pub fn collector_budget(&self) -> Duration {
        Duration::from_millis(self.collector_timeout_ms)
    }
}
