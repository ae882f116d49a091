use std::{sync::Arc, time::Duration};

use beacon_common::Result;

use crate::{
    instruments::{Counter, Gauge, Histogram, Summary},
    registry::Registry,
};

pub const REQUEST_DURATION_BUCKETS: &[f64] = &[0.1, 0.5, 1.0, 3.0, 5.0];
pub const REQUEST_DURATION_QUANTILES: &[f64] = &[0.5, 0.9, 0.99];

/// Instrumentation bundle for the request-handling layer. Callers supply
/// the label values and must keep them bounded: method, route template and
/// status code are fine, raw user input is not.
pub struct ApiMetrics {
    requests_total: Arc<Counter>,
    request_duration_seconds: Arc<Histogram>,
    request_duration_quantiles: Arc<Summary>,
    active_requests: Arc<Gauge>,
}

impl ApiMetrics {
    pub fn register(registry: &Registry) -> Result<Self> {
        Ok(Self {
            requests_total: registry.register_counter(
                "requests_total",
                "Total number of API requests",
                &["method", "route", "status"],
            )?,
            request_duration_seconds: registry.register_histogram(
                "request_duration_seconds",
                "Duration of API requests in seconds",
                &["method", "route", "status"],
                REQUEST_DURATION_BUCKETS,
            )?,
            request_duration_quantiles: registry.register_summary(
                "request_duration_quantiles",
                "Recent API request duration quantiles in seconds",
                &["method", "route"],
                REQUEST_DURATION_QUANTILES,
            )?,
            active_requests: registry.register_gauge(
                "active_requests",
                "Number of requests currently being handled",
                &[],
            )?,
        })
    }

    pub fn record_request(
        &self,
        method: &str,
        route: &str,
        status: u16,
        duration: Duration,
    ) -> Result<()> {
        let status_value = status.to_string();
        let seconds = duration.as_secs_f64();

        self.requests_total
            .inc_one(&[method, route, &status_value])?;
        self.request_duration_seconds
            .observe(&[method, route, &status_value], seconds)?;
        self.request_duration_quantiles
            .observe(&[method, route], seconds)?;
        Ok(())
    }

    pub fn request_started(&self) -> Result<()> {
        self.active_requests.inc(&[], 1.0)
    }

    pub fn request_finished(&self) -> Result<()> {
        self.active_requests.dec(&[], 1.0)
    }
}
