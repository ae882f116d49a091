#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    Counter,
    Gauge,
    Histogram,
    Summary,
}

impl MetricKind {
    pub fn as_exposition_type(&self) -> &'static str {
        match self {
            Self::Counter => "counter",
            Self::Gauge => "gauge",
            Self::Histogram => "histogram",
            Self::Summary => "summary",
        }
    }
}

/// Complete definition of a metric. Two registrations of the same name are
/// compatible only when their descriptors are equal.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricDescriptor {
    pub name: String,
    pub help: String,
    pub kind: MetricKind,
    pub label_keys: Vec<String>,
    pub buckets: Vec<f64>,
    pub quantiles: Vec<f64>,
}

impl MetricDescriptor {
    pub fn new(name: &str, help: &str, kind: MetricKind, label_keys: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            help: help.to_string(),
            kind,
            label_keys: label_keys.iter().map(|key| (*key).to_string()).collect(),
            buckets: Vec::new(),
            quantiles: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub enum MetricValue {
    Counter(f64),
    Gauge(f64),
    Histogram {
        // cumulative (bound, count) pairs, +Inf last
        buckets: Vec<(f64, u64)>,
        sum: f64,
        count: u64,
    },
    Summary {
        quantiles: Vec<(f64, f64)>,
        sum: f64,
        count: u64,
    },
}

#[derive(Debug, Clone)]
pub struct MetricSample {
    pub labels: Vec<(String, String)>,
    pub value: MetricValue,
}

#[derive(Debug, Clone)]
pub struct MetricFamily {
    pub descriptor: MetricDescriptor,
    pub samples: Vec<MetricSample>,
}
