use std::{
    collections::{HashMap, VecDeque},
    sync::{
        Arc, Mutex, RwLock,
        atomic::{AtomicU64, Ordering},
    },
};

use beacon_common::{BeaconError, Result};

use crate::{
    label::{self, LabelValues},
    types::{MetricDescriptor, MetricKind, MetricSample, MetricValue},
};

/// f64 stored as raw bits so counter and gauge updates stay lock-free.
pub(crate) struct AtomicF64 {
    bits: AtomicU64,
}

impl AtomicF64 {
    pub(crate) fn new(value: f64) -> Self {
        Self {
            bits: AtomicU64::new(value.to_bits()),
        }
    }

    pub(crate) fn get(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::Relaxed))
    }

    pub(crate) fn set(&self, value: f64) {
        self.bits.store(value.to_bits(), Ordering::Relaxed);
    }

    pub(crate) fn add(&self, delta: f64) {
        let mut current = self.bits.load(Ordering::Relaxed);
        loop {
            let next = (f64::from_bits(current) + delta).to_bits();
            match self
                .bits
                .compare_exchange_weak(current, next, Ordering::Relaxed, Ordering::Relaxed)
            {
                Ok(_) => return,
                Err(observed) => current = observed,
            }
        }
    }
}

struct SeriesSlot<S> {
    values: LabelValues,
    state: Arc<S>,
}

struct SeriesMapInner<S> {
    by_values: HashMap<LabelValues, Arc<S>>,
    // first-observed order, the order series render in
    order: Vec<SeriesSlot<S>>,
}

struct SeriesMap<S> {
    inner: RwLock<SeriesMapInner<S>>,
}

impl<S> SeriesMap<S> {
    fn new() -> Self {
        Self {
            inner: RwLock::new(SeriesMapInner {
                by_values: HashMap::new(),
                order: Vec::new(),
            }),
        }
    }

    fn get(&self, values: &[String]) -> Option<Arc<S>> {
        match self.inner.read() {
            Ok(guard) => guard.by_values.get(values).cloned(),
            Err(_) => None,
        }
    }

    fn get_or_create(&self, values: LabelValues, init: impl FnOnce() -> S) -> Arc<S> {
        if let Ok(guard) = self.inner.read()
            && let Some(existing) = guard.by_values.get(&values)
        {
            return existing.clone();
        }

        match self.inner.write() {
            Ok(mut guard) => {
                if let Some(existing) = guard.by_values.get(&values) {
                    return existing.clone();
                }
                let state = Arc::new(init());
                guard.by_values.insert(values.clone(), state.clone());
                guard.order.push(SeriesSlot {
                    values,
                    state: state.clone(),
                });
                state
            }
            Err(_) => Arc::new(init()),
        }
    }

    fn for_each(&self, mut visit: impl FnMut(&[String], &S)) {
        if let Ok(guard) = self.inner.read() {
            for slot in &guard.order {
                visit(&slot.values, &slot.state);
            }
        }
    }
}

pub struct Counter {
    descriptor: MetricDescriptor,
    series: SeriesMap<AtomicF64>,
}

impl Counter {
    pub(crate) fn new(name: &str, help: &str, label_keys: &[&str]) -> Self {
        Self {
            descriptor: MetricDescriptor::new(name, help, MetricKind::Counter, label_keys),
            series: SeriesMap::new(),
        }
    }

    pub fn descriptor(&self) -> &MetricDescriptor {
        &self.descriptor
    }

    pub fn inc(&self, labels: &[&str], delta: f64) -> Result<()> {
        if delta.is_nan() || delta < 0.0 {
            return Err(BeaconError::InvalidDelta(delta));
        }
        let values = label::checked_values(&self.descriptor, labels)?;
        self.series
            .get_or_create(values, || AtomicF64::new(0.0))
            .add(delta);
        Ok(())
    }

    pub fn inc_one(&self, labels: &[&str]) -> Result<()> {
        self.inc(labels, 1.0)
    }

    pub fn value(&self, labels: &[&str]) -> Result<f64> {
        let values = label::checked_values(&self.descriptor, labels)?;
        Ok(self
            .series
            .get(&values)
            .map(|state| state.get())
            .unwrap_or(0.0))
    }

    pub(crate) fn collect(&self) -> Vec<MetricSample> {
        let mut samples = Vec::new();
        self.series.for_each(|values, state| {
            samples.push(MetricSample {
                labels: label::materialize(&self.descriptor, values),
                value: MetricValue::Counter(state.get()),
            });
        });
        samples
    }
}

pub struct Gauge {
    descriptor: MetricDescriptor,
    series: SeriesMap<AtomicF64>,
}

impl std::fmt::Debug for Gauge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gauge")
            .field("descriptor", &self.descriptor)
            .finish()
    }
}

impl Gauge {
    pub(crate) fn new(name: &str, help: &str, label_keys: &[&str]) -> Self {
        Self {
            descriptor: MetricDescriptor::new(name, help, MetricKind::Gauge, label_keys),
            series: SeriesMap::new(),
        }
    }

    pub fn descriptor(&self) -> &MetricDescriptor {
        &self.descriptor
    }

    pub fn set(&self, labels: &[&str], value: f64) -> Result<()> {
        let values = label::checked_values(&self.descriptor, labels)?;
        self.series
            .get_or_create(values, || AtomicF64::new(0.0))
            .set(value);
        Ok(())
    }

    pub fn inc(&self, labels: &[&str], delta: f64) -> Result<()> {
        let values = label::checked_values(&self.descriptor, labels)?;
        self.series
            .get_or_create(values, || AtomicF64::new(0.0))
            .add(delta);
        Ok(())
    }

    pub fn dec(&self, labels: &[&str], delta: f64) -> Result<()> {
        self.inc(labels, -delta)
    }

    pub fn value(&self, labels: &[&str]) -> Result<f64> {
        let values = label::checked_values(&self.descriptor, labels)?;
        Ok(self
            .series
            .get(&values)
            .map(|state| state.get())
            .unwrap_or(0.0))
    }

    pub(crate) fn collect(&self) -> Vec<MetricSample> {
        let mut samples = Vec::new();
        self.series.for_each(|values, state| {
            samples.push(MetricSample {
                labels: label::materialize(&self.descriptor, values),
                value: MetricValue::Gauge(state.get()),
            });
        });
        samples
    }
}

pub struct Histogram {
    descriptor: MetricDescriptor,
    series: SeriesMap<HistogramSeries>,
}

struct HistogramSeries {
    // exclusive per-bucket counts, cumulated at snapshot time; the final
    // slot is the overflow bucket
    bucket_counts: Vec<AtomicU64>,
    count: AtomicU64,
    sum: AtomicF64,
}

impl HistogramSeries {
    fn new(bucket_len: usize) -> Self {
        Self {
            bucket_counts: (0..bucket_len + 1).map(|_| AtomicU64::new(0)).collect(),
            count: AtomicU64::new(0),
            sum: AtomicF64::new(0.0),
        }
    }
}

impl Histogram {
    pub(crate) fn new(name: &str, help: &str, label_keys: &[&str], bounds: &[f64]) -> Result<Self> {
        let mut descriptor = MetricDescriptor::new(name, help, MetricKind::Histogram, label_keys);
        descriptor.buckets = validated_bounds(name, bounds)?;
        Ok(Self {
            descriptor,
            series: SeriesMap::new(),
        })
    }

    pub fn descriptor(&self) -> &MetricDescriptor {
        &self.descriptor
    }

    pub fn observe(&self, labels: &[&str], value: f64) -> Result<()> {
        let values = label::checked_values(&self.descriptor, labels)?;
        let series = self
            .series
            .get_or_create(values, || HistogramSeries::new(self.descriptor.buckets.len()));

        let bucket_index = self
            .descriptor
            .buckets
            .iter()
            .position(|bound| value <= *bound)
            .unwrap_or(self.descriptor.buckets.len());

        series.bucket_counts[bucket_index].fetch_add(1, Ordering::Relaxed);
        series.count.fetch_add(1, Ordering::Relaxed);
        series.sum.add(value);
        Ok(())
    }

    pub(crate) fn collect(&self) -> Vec<MetricSample> {
        let mut samples = Vec::new();
        self.series.for_each(|values, series| {
            let mut cumulative = 0_u64;
            let mut buckets = Vec::with_capacity(self.descriptor.buckets.len() + 1);
            for (index, bound) in self.descriptor.buckets.iter().enumerate() {
                cumulative =
                    cumulative.saturating_add(series.bucket_counts[index].load(Ordering::Relaxed));
                buckets.push((*bound, cumulative));
            }
            cumulative = cumulative.saturating_add(
                series.bucket_counts[self.descriptor.buckets.len()].load(Ordering::Relaxed),
            );
            buckets.push((f64::INFINITY, cumulative));

            samples.push(MetricSample {
                labels: label::materialize(&self.descriptor, values),
                value: MetricValue::Histogram {
                    buckets,
                    sum: series.sum.get(),
                    count: series.count.load(Ordering::Relaxed),
                },
            });
        });
        samples
    }
}

fn validated_bounds(name: &str, bounds: &[f64]) -> Result<Vec<f64>> {
    let mut bounds = bounds.to_vec();
    // the overflow bucket always exists, an explicit trailing +Inf is redundant
    if bounds.last().copied() == Some(f64::INFINITY) {
        bounds.pop();
    }

    if bounds.is_empty() {
        return Err(BeaconError::InvalidBucketConfiguration(format!(
            "{name}: bucket bounds must not be empty"
        )));
    }
    if bounds.iter().any(|bound| !bound.is_finite()) {
        return Err(BeaconError::InvalidBucketConfiguration(format!(
            "{name}: bucket bounds must be finite"
        )));
    }
    for pair in bounds.windows(2) {
        if pair[1] <= pair[0] {
            return Err(BeaconError::InvalidBucketConfiguration(format!(
                "{name}: bucket bounds must be strictly ascending"
            )));
        }
    }

    Ok(bounds)
}

pub struct Summary {
    descriptor: MetricDescriptor,
    window_capacity: usize,
    series: SeriesMap<SummarySeries>,
}

struct SummarySeries {
    sum: AtomicF64,
    count: AtomicU64,
    window: Mutex<VecDeque<f64>>,
}

impl SummarySeries {
    fn new(capacity: usize) -> Self {
        Self {
            sum: AtomicF64::new(0.0),
            count: AtomicU64::new(0),
            window: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }
}

impl Summary {
    pub(crate) fn new(
        name: &str,
        help: &str,
        label_keys: &[&str],
        quantiles: &[f64],
        window_capacity: usize,
    ) -> Result<Self> {
        if window_capacity == 0 {
            return Err(BeaconError::InvalidQuantileConfiguration(format!(
                "{name}: observation window capacity must be positive"
            )));
        }

        let mut descriptor = MetricDescriptor::new(name, help, MetricKind::Summary, label_keys);
        descriptor.quantiles = validated_quantiles(name, quantiles)?;
        Ok(Self {
            descriptor,
            window_capacity,
            series: SeriesMap::new(),
        })
    }

    pub fn descriptor(&self) -> &MetricDescriptor {
        &self.descriptor
    }

    pub fn observe(&self, labels: &[&str], value: f64) -> Result<()> {
        let values = label::checked_values(&self.descriptor, labels)?;
        let series = self
            .series
            .get_or_create(values, || SummarySeries::new(self.window_capacity));

        series.sum.add(value);
        series.count.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut window) = series.window.lock() {
            if window.len() == self.window_capacity {
                window.pop_front();
            }
            window.push_back(value);
        }
        Ok(())
    }

    /// Answers from the current observation window; NaN when the window
    /// (or the series itself) is empty.
    pub fn quantile(&self, labels: &[&str], q: f64) -> Result<f64> {
        let values = label::checked_values(&self.descriptor, labels)?;
        let Some(series) = self.series.get(&values) else {
            return Ok(f64::NAN);
        };

        let window = match series.window.lock() {
            Ok(guard) => guard.iter().copied().collect::<Vec<_>>(),
            Err(_) => return Ok(f64::NAN),
        };
        Ok(window_quantile(&window, q))
    }

    pub(crate) fn collect(&self) -> Vec<MetricSample> {
        let mut samples = Vec::new();
        self.series.for_each(|values, series| {
            let window = match series.window.lock() {
                Ok(guard) => guard.iter().copied().collect::<Vec<_>>(),
                Err(_) => Vec::new(),
            };
            let quantiles = self
                .descriptor
                .quantiles
                .iter()
                .map(|q| (*q, window_quantile(&window, *q)))
                .collect();

            samples.push(MetricSample {
                labels: label::materialize(&self.descriptor, values),
                value: MetricValue::Summary {
                    quantiles,
                    sum: series.sum.get(),
                    count: series.count.load(Ordering::Relaxed),
                },
            });
        });
        samples
    }
}

fn validated_quantiles(name: &str, quantiles: &[f64]) -> Result<Vec<f64>> {
    if quantiles
        .iter()
        .any(|q| !q.is_finite() || *q < 0.0 || *q > 1.0)
    {
        return Err(BeaconError::InvalidQuantileConfiguration(format!(
            "{name}: quantiles must lie within [0, 1]"
        )));
    }

    let mut quantiles = quantiles.to_vec();
    quantiles.sort_by(|left, right| left.total_cmp(right));
    quantiles.dedup();
    Ok(quantiles)
}

// nearest-rank selection over the window
fn window_quantile(window: &[f64], q: f64) -> f64 {
    if window.is_empty() {
        return f64::NAN;
    }

    let mut scratch = window.to_vec();
    let rank = ((q * scratch.len() as f64).ceil() as usize)
        .saturating_sub(1)
        .min(scratch.len() - 1);
    let (_, selected, _) =
        scratch.select_nth_unstable_by(rank, |left, right| left.total_cmp(right));
    *selected
}
