use beacon_common::{BeaconError, Result};

use crate::types::MetricDescriptor;

pub type LabelValues = Vec<String>;

/// Validates an update call's label values against the declared keys.
/// Updates must supply exactly the declared arity; nothing is padded.
pub fn checked_values(descriptor: &MetricDescriptor, labels: &[&str]) -> Result<LabelValues> {
    if labels.len() != descriptor.label_keys.len() {
        return Err(BeaconError::LabelArityMismatch {
            metric: descriptor.name.clone(),
            expected: descriptor.label_keys.len(),
            actual: labels.len(),
        });
    }

    Ok(labels.iter().map(|value| (*value).to_string()).collect())
}

pub fn materialize(descriptor: &MetricDescriptor, values: &[String]) -> Vec<(String, String)> {
    descriptor
        .label_keys
        .iter()
        .zip(values.iter())
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use crate::types::{MetricDescriptor, MetricKind};

    use super::{checked_values, materialize};

    #[test]
    fn rejects_wrong_arity() {
        let descriptor = MetricDescriptor::new(
            "requests_total",
            "Total requests",
            MetricKind::Counter,
            &["method", "status"],
        );

        assert!(checked_values(&descriptor, &["GET"]).is_err());
        assert!(checked_values(&descriptor, &["GET", "200", "extra"]).is_err());
        assert_eq!(
            checked_values(&descriptor, &["GET", "200"]).unwrap(),
            vec!["GET".to_string(), "200".to_string()]
        );
    }

    #[test]
    fn materialize_pairs_keys_with_values() {
        let descriptor = MetricDescriptor::new(
            "requests_total",
            "Total requests",
            MetricKind::Counter,
            &["method", "status"],
        );

        let pairs = materialize(&descriptor, &["GET".to_string(), "200".to_string()]);
        assert_eq!(
            pairs,
            vec![
                ("method".to_string(), "GET".to_string()),
                ("status".to_string(), "200".to_string()),
            ]
        );
    }
}
