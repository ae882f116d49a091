pub mod api;
pub mod collector;
pub mod collectors;
pub mod config;
pub mod exposition;
pub mod instruments;
pub mod label;
pub mod registry;
pub mod types;

pub use api::ApiMetrics;
pub use collector::{Collector, CollectorFailure};
pub use collectors::ProcessCollector;
pub use config::MetricsConfig;
pub use exposition::{CONTENT_TYPE, ScrapePayload, encode, scrape};
pub use instruments::{Counter, Gauge, Histogram, Summary};
pub use registry::{Instrument, Registry, Snapshot};
pub use types::{MetricDescriptor, MetricFamily, MetricKind, MetricSample, MetricValue};
