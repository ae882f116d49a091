use std::{sync::Arc, time::Duration};

use beacon_common::{BeaconError, Result};
use tracing::warn;

use crate::types::MetricFamily;

/// A source of metrics computed on demand at scrape time rather than
/// updated incrementally. `collect` is invoked exactly once per scrape,
/// on a blocking worker under the registry's time budget.
pub trait Collector: Send + Sync {
    fn name(&self) -> &str;
    fn collect(&self) -> Result<Vec<MetricFamily>>;
}

#[derive(Debug)]
pub struct CollectorFailure {
    pub collector: String,
    pub error: BeaconError,
}

/// Runs every collector under its own timeout. A collector that fails or
/// exceeds the budget only loses its own contribution; its blocking call
/// keeps running detached until it returns on its own.
pub(crate) async fn run_all(
    collectors: &[Arc<dyn Collector>],
    budget: Duration,
) -> (Vec<MetricFamily>, Vec<CollectorFailure>) {
    let mut families = Vec::new();
    let mut failures = Vec::new();

    for collector in collectors {
        let name = collector.name().to_string();
        let task = tokio::task::spawn_blocking({
            let collector = collector.clone();
            move || collector.collect()
        });

        match tokio::time::timeout(budget, task).await {
            Ok(Ok(Ok(collected))) => families.extend(collected),
            Ok(Ok(Err(err))) => {
                warn!(collector = %name, error = %err, "collector failed during scrape");
                failures.push(CollectorFailure {
                    collector: name,
                    error: BeaconError::CollectorError(err.to_string()),
                });
            }
            Ok(Err(join_err)) => {
                warn!(collector = %name, error = %join_err, "collector task aborted during scrape");
                failures.push(CollectorFailure {
                    collector: name,
                    error: BeaconError::CollectorError(join_err.to_string()),
                });
            }
            Err(_) => {
                warn!(
                    collector = %name,
                    budget_ms = budget.as_millis() as u64,
                    "collector exceeded scrape budget"
                );
                failures.push(CollectorFailure {
                    collector: name.clone(),
                    error: BeaconError::CollectorTimeout(name),
                });
            }
        }
    }

    (families, failures)
}
