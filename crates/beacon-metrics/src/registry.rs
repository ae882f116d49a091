use std::{
    collections::HashMap,
    sync::{Arc, RwLock, RwLockWriteGuard},
};

use beacon_common::{BeaconError, Result};
use tracing::debug;

use crate::{
    collector::{self, Collector, CollectorFailure},
    config::MetricsConfig,
    instruments::{Counter, Gauge, Histogram, Summary},
    types::{MetricDescriptor, MetricFamily, MetricSample},
};

/// One registered metric. The set of kinds is closed so the exposition
/// encoder can handle every case exhaustively.
#[derive(Clone)]
pub enum Instrument {
    Counter(Arc<Counter>),
    Gauge(Arc<Gauge>),
    Histogram(Arc<Histogram>),
    Summary(Arc<Summary>),
}

impl Instrument {
    pub fn descriptor(&self) -> &MetricDescriptor {
        match self {
            Self::Counter(counter) => counter.descriptor(),
            Self::Gauge(gauge) => gauge.descriptor(),
            Self::Histogram(histogram) => histogram.descriptor(),
            Self::Summary(summary) => summary.descriptor(),
        }
    }

    fn collect(&self) -> Vec<MetricSample> {
        match self {
            Self::Counter(counter) => counter.collect(),
            Self::Gauge(gauge) => gauge.collect(),
            Self::Histogram(histogram) => histogram.collect(),
            Self::Summary(summary) => summary.collect(),
        }
    }
}

struct RegistryInner {
    by_name: HashMap<String, Instrument>,
    // registration order, the order families render in
    order: Vec<Instrument>,
}

/// Process-wide instrument registry. Constructed once at startup and
/// shared by reference; there is no ambient global instance.
pub struct Registry {
    config: MetricsConfig,
    inner: RwLock<RegistryInner>,
    collectors: RwLock<Vec<Arc<dyn Collector>>>,
}

pub struct Snapshot {
    pub families: Vec<MetricFamily>,
    pub failures: Vec<CollectorFailure>,
}

impl Registry {
    pub fn new() -> Self {
        Self::with_config(MetricsConfig::default())
    }

    pub fn with_config(config: MetricsConfig) -> Self {
        Self {
            config,
            inner: RwLock::new(RegistryInner {
                by_name: HashMap::new(),
                order: Vec::new(),
            }),
            collectors: RwLock::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &MetricsConfig {
        &self.config
    }

    pub fn register_counter(
        &self,
        name: &str,
        help: &str,
        label_keys: &[&str],
    ) -> Result<Arc<Counter>> {
        let candidate = Counter::new(name, help, label_keys);
        let mut inner = self.lock_inner()?;

        if let Some(existing) = inner.by_name.get(name) {
            return match existing {
                Instrument::Counter(counter)
                    if counter.descriptor() == candidate.descriptor() =>
                {
                    Ok(counter.clone())
                }
                other => Err(conflict(name, other.descriptor())),
            };
        }

        let counter = Arc::new(candidate);
        Self::insert(&mut inner, name, Instrument::Counter(counter.clone()));
        debug!(metric = name, "registered counter");
        Ok(counter)
    }

    pub fn register_gauge(
        &self,
        name: &str,
        help: &str,
        label_keys: &[&str],
    ) -> Result<Arc<Gauge>> {
        let candidate = Gauge::new(name, help, label_keys);
        let mut inner = self.lock_inner()?;

        if let Some(existing) = inner.by_name.get(name) {
            return match existing {
                Instrument::Gauge(gauge) if gauge.descriptor() == candidate.descriptor() => {
                    Ok(gauge.clone())
                }
                other => Err(conflict(name, other.descriptor())),
            };
        }

        let gauge = Arc::new(candidate);
        Self::insert(&mut inner, name, Instrument::Gauge(gauge.clone()));
        debug!(metric = name, "registered gauge");
        Ok(gauge)
    }

    pub fn register_histogram(
        &self,
        name: &str,
        help: &str,
        label_keys: &[&str],
        bounds: &[f64],
    ) -> Result<Arc<Histogram>> {
        let candidate = Histogram::new(name, help, label_keys, bounds)?;
        let mut inner = self.lock_inner()?;

        if let Some(existing) = inner.by_name.get(name) {
            return match existing {
                Instrument::Histogram(histogram)
                    if histogram.descriptor() == candidate.descriptor() =>
                {
                    Ok(histogram.clone())
                }
                other => Err(conflict(name, other.descriptor())),
            };
        }

        let histogram = Arc::new(candidate);
        Self::insert(&mut inner, name, Instrument::Histogram(histogram.clone()));
        debug!(metric = name, "registered histogram");
        Ok(histogram)
    }

    pub fn register_summary(
        &self,
        name: &str,
        help: &str,
        label_keys: &[&str],
        quantiles: &[f64],
    ) -> Result<Arc<Summary>> {
        let candidate = Summary::new(name, help, label_keys, quantiles, self.config.summary_window)?;
        let mut inner = self.lock_inner()?;

        if let Some(existing) = inner.by_name.get(name) {
            return match existing {
                Instrument::Summary(summary)
                    if summary.descriptor() == candidate.descriptor() =>
                {
                    Ok(summary.clone())
                }
                other => Err(conflict(name, other.descriptor())),
            };
        }

        let summary = Arc::new(candidate);
        Self::insert(&mut inner, name, Instrument::Summary(summary.clone()));
        debug!(metric = name, "registered summary");
        Ok(summary)
    }

    pub fn add_collector(&self, collector: Arc<dyn Collector>) {
        if let Ok(mut collectors) = self.collectors.write() {
            collectors.push(collector);
        }
    }

    /// Point-in-time copy of every registered instrument's series,
    /// families in registration order, series in first-observed order.
    pub fn gather(&self) -> Vec<MetricFamily> {
        let inner = match self.inner.read() {
            Ok(guard) => guard,
            Err(_) => return Vec::new(),
        };

        inner
            .order
            .iter()
            .map(|instrument| MetricFamily {
                descriptor: instrument.descriptor().clone(),
                samples: instrument.collect(),
            })
            .collect()
    }

    /// `gather` plus one fresh collection pass over every registered
    /// collector, each under the configured time budget. Collector
    /// failures are isolated; the rest of the snapshot is unaffected.
    pub async fn snapshot(&self) -> Snapshot {
        let mut families = self.gather();

        let collectors = match self.collectors.read() {
            Ok(guard) => guard.clone(),
            Err(_) => Vec::new(),
        };
        let (collected, failures) =
            collector::run_all(&collectors, self.config.collector_budget()).await;
        families.extend(collected);

        Snapshot { families, failures }
    }

    fn lock_inner(&self) -> Result<RwLockWriteGuard<'_, RegistryInner>> {
        self.inner
            .write()
            .map_err(|_| BeaconError::Internal("failed to acquire metrics registry lock".to_string()))
    }

    fn insert(inner: &mut RegistryInner, name: &str, instrument: Instrument) {
        inner.by_name.insert(name.to_string(), instrument.clone());
        inner.order.push(instrument);
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

fn conflict(name: &str, existing: &MetricDescriptor) -> BeaconError {
    BeaconError::DuplicateNameConflict(format!(
        "{name} is already registered as a {} with a different definition",
        existing.kind.as_exposition_type()
    ))
}

#[cfg(test)]
mod tests {
    use beacon_common::BeaconError;

    use super::Registry;

    #[test]
    fn identical_reregistration_is_idempotent() {
        let registry = Registry::new();
        let first = registry
            .register_counter("requests_total", "Total requests", &["method"])
            .unwrap();
        let second = registry
            .register_counter("requests_total", "Total requests", &["method"])
            .unwrap();

        first.inc_one(&["GET"]).unwrap();
        assert_eq!(second.value(&["GET"]).unwrap(), 1.0);
        assert_eq!(registry.gather().len(), 1);
    }

    #[test]
    fn conflicting_registration_fails_and_preserves_original() {
        let registry = Registry::new();
        let counter = registry
            .register_counter("requests_total", "Total requests", &["method"])
            .unwrap();
        counter.inc(&["GET"], 5.0).unwrap();

        let err = registry
            .register_gauge("requests_total", "Total requests", &["method"])
            .unwrap_err();
        assert!(matches!(err, BeaconError::DuplicateNameConflict(_)));

        // same kind with different labels or help is also a conflict
        assert!(registry
            .register_counter("requests_total", "Total requests", &["method", "status"])
            .is_err());
        assert!(registry
            .register_counter("requests_total", "Other help", &["method"])
            .is_err());

        assert_eq!(counter.value(&["GET"]).unwrap(), 5.0);
        assert_eq!(registry.gather().len(), 1);
    }

    #[test]
    fn histogram_reregistration_compares_bounds() {
        let registry = Registry::new();
        registry
            .register_histogram("latency", "Latency", &[], &[0.1, 0.5])
            .unwrap();

        assert!(registry
            .register_histogram("latency", "Latency", &[], &[0.1, 0.5])
            .is_ok());
        assert!(registry
            .register_histogram("latency", "Latency", &[], &[0.1, 0.5, 1.0])
            .is_err());
    }

    #[test]
    fn gather_preserves_registration_order() {
        let registry = Registry::new();
        registry.register_counter("zeta_total", "Z", &[]).unwrap();
        registry.register_gauge("alpha", "A", &[]).unwrap();
        registry
            .register_histogram("mid_seconds", "M", &[], &[1.0])
            .unwrap();

        let names: Vec<String> = registry
            .gather()
            .into_iter()
            .map(|family| family.descriptor.name)
            .collect();
        assert_eq!(names, vec!["zeta_total", "alpha", "mid_seconds"]);
    }
}
