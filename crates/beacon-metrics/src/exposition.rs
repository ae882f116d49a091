use std::fmt::Write as _;

use beacon_common::{BeaconError, Result};
use bytes::Bytes;

use crate::{
    registry::Registry,
    types::{MetricFamily, MetricValue},
};

pub const CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

pub struct ScrapePayload {
    pub content_type: &'static str,
    pub body: Bytes,
}

/// One scrape pass: snapshot the registry (including collectors), encode
/// the result. Collector failures have already been isolated and logged
/// by the snapshot; only an encoder fault fails the scrape.
pub async fn scrape(registry: &Registry) -> Result<ScrapePayload> {
    let snapshot = registry.snapshot().await;
    let body = encode(&snapshot.families)?;
    Ok(ScrapePayload {
        content_type: CONTENT_TYPE,
        body: Bytes::from(body),
    })
}

/// Renders families in the order given. Two calls over an unchanged
/// snapshot produce byte-identical output; nothing here consults a clock.
pub fn encode(families: &[MetricFamily]) -> Result<String> {
    let mut output = String::new();
    for family in families {
        encode_family(&mut output, family).map_err(|_| {
            BeaconError::EncoderFault(format!(
                "failed to render metric {}",
                family.descriptor.name
            ))
        })?;
    }
    Ok(output)
}

fn encode_family(output: &mut String, family: &MetricFamily) -> std::fmt::Result {
    let name = &family.descriptor.name;
    writeln!(output, "# HELP {name} {}", escape_help(&family.descriptor.help))?;
    writeln!(output, "# TYPE {name} {}", family.descriptor.kind.as_exposition_type())?;

    for sample in &family.samples {
        match &sample.value {
            MetricValue::Counter(value) | MetricValue::Gauge(value) => {
                write_sample(output, name, &sample.labels, None, *value)?;
            }
            MetricValue::Histogram { buckets, sum, count } => {
                let bucket_name = format!("{name}_bucket");
                for (bound, bucket_count) in buckets {
                    write_sample(
                        output,
                        &bucket_name,
                        &sample.labels,
                        Some(("le", format_bound(*bound))),
                        *bucket_count as f64,
                    )?;
                }
                write_sample(output, &format!("{name}_sum"), &sample.labels, None, *sum)?;
                write_sample(
                    output,
                    &format!("{name}_count"),
                    &sample.labels,
                    None,
                    *count as f64,
                )?;
            }
            MetricValue::Summary { quantiles, sum, count } => {
                for (q, value) in quantiles {
                    write_sample(
                        output,
                        name,
                        &sample.labels,
                        Some(("quantile", format_value(*q))),
                        *value,
                    )?;
                }
                write_sample(output, &format!("{name}_sum"), &sample.labels, None, *sum)?;
                write_sample(
                    output,
                    &format!("{name}_count"),
                    &sample.labels,
                    None,
                    *count as f64,
                )?;
            }
        }
    }
    Ok(())
}

fn write_sample(
    output: &mut String,
    name: &str,
    labels: &[(String, String)],
    extra: Option<(&str, String)>,
    value: f64,
) -> std::fmt::Result {
    output.push_str(name);

    if !labels.is_empty() || extra.is_some() {
        output.push('{');
        let mut first = true;
        for (key, label_value) in labels {
            if !first {
                output.push(',');
            }
            first = false;
            write!(output, "{key}=\"{}\"", escape_label_value(label_value))?;
        }
        if let Some((key, label_value)) = extra {
            if !first {
                output.push(',');
            }
            write!(output, "{key}=\"{label_value}\"")?;
        }
        output.push('}');
    }

    output.push(' ');
    output.push_str(&format_value(value));
    output.push('\n');
    Ok(())
}

fn format_value(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value.is_infinite() {
        if value > 0.0 { "+Inf" } else { "-Inf" }.to_string()
    } else if value.fract() == 0.0 {
        format!("{value:.0}")
    } else {
        value.to_string()
    }
}

fn format_bound(bound: f64) -> String {
    if bound.is_infinite() {
        "+Inf".to_string()
    } else {
        bound.to_string()
    }
}

fn escape_help(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\n', "\\n")
}

fn escape_label_value(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('\n', "\\n")
        .replace('"', "\\\"")
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use beacon_common::Result;

    use super::{CONTENT_TYPE, encode, scrape};
    use crate::{
        collector::Collector,
        config::MetricsConfig,
        registry::Registry,
        types::{MetricDescriptor, MetricFamily, MetricKind, MetricSample, MetricValue},
    };

    fn populated_registry() -> Registry {
        let registry = Registry::new();

        let requests = registry
            .register_counter("requests_total", "Total requests", &["method", "status"])
            .unwrap();
        requests.inc_one(&["GET", "200"]).unwrap();
        requests.inc_one(&["POST", "201"]).unwrap();

        let active = registry
            .register_gauge("active_requests", "In-flight requests", &[])
            .unwrap();
        active.set(&[], 3.0).unwrap();

        let duration = registry
            .register_histogram(
                "request_duration_seconds",
                "Request duration in seconds",
                &["method"],
                &[0.1, 0.5, 1.0, 5.0],
            )
            .unwrap();
        for value in [0.05, 0.3, 2.0, 10.0] {
            duration.observe(&["GET"], value).unwrap();
        }

        let latency = registry
            .register_summary("request_latency", "Recent latency quantiles", &[], &[0.5, 0.9])
            .unwrap();
        for value in 1..=10 {
            latency.observe(&[], value as f64).unwrap();
        }

        registry
    }

    #[test]
    fn encoding_is_deterministic() {
        let registry = populated_registry();
        let first = encode(&registry.gather()).unwrap();
        let second = encode(&registry.gather()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn families_render_in_registration_order() {
        let registry = populated_registry();
        let output = encode(&registry.gather()).unwrap();

        let requests_at = output.find("# HELP requests_total").unwrap();
        let active_at = output.find("# HELP active_requests").unwrap();
        let duration_at = output.find("# HELP request_duration_seconds").unwrap();
        let latency_at = output.find("# HELP request_latency").unwrap();
        assert!(requests_at < active_at);
        assert!(active_at < duration_at);
        assert!(duration_at < latency_at);
    }

    #[test]
    fn counter_series_render_in_first_observed_order() {
        let registry = populated_registry();
        let output = encode(&registry.gather()).unwrap();

        let get_line = output
            .find("requests_total{method=\"GET\",status=\"200\"} 1")
            .unwrap();
        let post_line = output
            .find("requests_total{method=\"POST\",status=\"201\"} 1")
            .unwrap();
        assert!(get_line < post_line);
    }

    #[test]
    fn histogram_expands_to_buckets_sum_count() {
        let registry = populated_registry();
        let output = encode(&registry.gather()).unwrap();

        assert!(output.contains("# TYPE request_duration_seconds histogram"));
        assert!(output.contains("request_duration_seconds_bucket{method=\"GET\",le=\"0.1\"} 1\n"));
        assert!(output.contains("request_duration_seconds_bucket{method=\"GET\",le=\"0.5\"} 2\n"));
        assert!(output.contains("request_duration_seconds_bucket{method=\"GET\",le=\"1\"} 2\n"));
        assert!(output.contains("request_duration_seconds_bucket{method=\"GET\",le=\"5\"} 3\n"));
        assert!(output.contains("request_duration_seconds_bucket{method=\"GET\",le=\"+Inf\"} 4\n"));
        assert!(output.contains("request_duration_seconds_sum{method=\"GET\"} 12.35\n"));
        assert!(output.contains("request_duration_seconds_count{method=\"GET\"} 4\n"));
    }

    #[test]
    fn summary_expands_to_quantiles_sum_count() {
        let registry = populated_registry();
        let output = encode(&registry.gather()).unwrap();

        assert!(output.contains("# TYPE request_latency summary"));
        assert!(output.contains("request_latency{quantile=\"0.5\"} 5\n"));
        assert!(output.contains("request_latency{quantile=\"0.9\"} 9\n"));
        assert!(output.contains("request_latency_sum 55\n"));
        assert!(output.contains("request_latency_count 10\n"));
    }

    #[test]
    fn summary_with_no_series_renders_header_lines_only() {
        let registry = Registry::new();
        registry
            .register_summary("latency", "Latency", &[], &[0.5])
            .unwrap();

        let output = encode(&registry.gather()).unwrap();
        assert_eq!(output, "# HELP latency Latency\n# TYPE latency summary\n");
    }

    #[test]
    fn nan_values_render_as_nan() {
        let family = MetricFamily {
            descriptor: MetricDescriptor::new("latency", "Latency", MetricKind::Summary, &[]),
            samples: vec![MetricSample {
                labels: Vec::new(),
                value: MetricValue::Summary {
                    quantiles: vec![(0.5, f64::NAN)],
                    sum: 0.0,
                    count: 0,
                },
            }],
        };

        let output = encode(&[family]).unwrap();
        assert!(output.contains("latency{quantile=\"0.5\"} NaN\n"));
        assert!(output.contains("latency_count 0\n"));
    }

    #[test]
    fn label_values_are_escaped() {
        let registry = Registry::new();
        registry
            .register_counter("lookups_total", "Lookups", &["path"])
            .unwrap()
            .inc_one(&["a\"b\\c\nd"])
            .unwrap();

        let output = encode(&registry.gather()).unwrap();
        assert!(output.contains(r#"lookups_total{path="a\"b\\c\nd"} 1"#));
    }

    struct StallingCollector;

    impl Collector for StallingCollector {
        fn name(&self) -> &str {
            "stalling"
        }

        fn collect(&self) -> Result<Vec<MetricFamily>> {
            std::thread::sleep(Duration::from_secs(2));
            Ok(vec![MetricFamily {
                descriptor: MetricDescriptor::new(
                    "stalling_gauge",
                    "Never arrives in time",
                    MetricKind::Gauge,
                    &[],
                ),
                samples: vec![MetricSample {
                    labels: Vec::new(),
                    value: MetricValue::Gauge(1.0),
                }],
            }])
        }
    }

    #[tokio::test]
    async fn scrape_keeps_instruments_when_a_collector_hangs() {
        let registry = Registry::with_config(MetricsConfig {
            collector_timeout_ms: 50,
            ..MetricsConfig::default()
        });
        registry
            .register_counter("requests_total", "Total requests", &[])
            .unwrap()
            .inc_one(&[])
            .unwrap();
        registry.add_collector(Arc::new(StallingCollector));

        let payload = scrape(&registry).await.unwrap();
        assert_eq!(payload.content_type, CONTENT_TYPE);

        let body = std::str::from_utf8(&payload.body).unwrap();
        assert!(body.contains("requests_total 1"));
        assert!(!body.contains("stalling_gauge"));
    }
}
