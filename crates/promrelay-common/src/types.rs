use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Label set of a sample, including the `__name__` metric name label.
pub type Labels = BTreeMap<String, String>;

/// Accumulated samples keyed by source id, in ascending id order.
///
/// Serializes as a JSON object whose keys are the decimal source ids.
pub type ValueSet = BTreeMap<i64, Vec<Sample>>;

/// Label holding the metric name.
pub const METRIC_NAME_LABEL: &str = "__name__";

/// A single time-stamped, labeled scalar observation returned by a query.
///
/// The JSON form matches the Prometheus instant-vector element:
///
/// ```
/// use promrelay_common::types::Sample;
///
/// let json = r#"{"metric":{"__name__":"up","job":"node"},"value":[10,"1"]}"#;
/// let sample: Sample = serde_json::from_str(json).unwrap();
/// assert_eq!(sample.metric_name(), Some("up"));
/// assert_eq!(sample.timestamp_ms, 10_000);
/// assert_eq!(sample.value, 1.0);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "SampleWire", into = "SampleWire")]
pub struct Sample {
    pub labels: Labels,
    /// Milliseconds since the Unix epoch.
    pub timestamp_ms: i64,
    pub value: f64,
}

impl Sample {
    pub fn new(labels: Labels, at: DateTime<Utc>, value: f64) -> Self {
        Self {
            labels,
            timestamp_ms: at.timestamp_millis(),
            value,
        }
    }

    pub fn metric_name(&self) -> Option<&str> {
        self.labels.get(METRIC_NAME_LABEL).map(String::as_str)
    }
}

impl std::fmt::Display for Sample {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}{{{}}} => {} @[{}]",
            self.metric_name().unwrap_or_default(),
            format_labels(&self.labels),
            format_value(self.value),
            format_timestamp(self.timestamp_ms)
        )
    }
}

#[derive(Serialize, Deserialize)]
struct SampleWire {
    metric: Labels,
    value: (f64, String),
}

impl From<Sample> for SampleWire {
    fn from(sample: Sample) -> Self {
        Self {
            metric: sample.labels,
            value: (
                sample.timestamp_ms as f64 / 1000.0,
                format_value(sample.value),
            ),
        }
    }
}

impl TryFrom<SampleWire> for Sample {
    type Error = String;

    fn try_from(wire: SampleWire) -> Result<Self, Self::Error> {
        let (secs, raw) = wire.value;
        let value = raw
            .parse::<f64>()
            .map_err(|e| format!("invalid sample value {raw:?}: {e}"))?;
        Ok(Self {
            labels: wire.metric,
            timestamp_ms: (secs * 1000.0).round() as i64,
            value,
        })
    }
}

/// Render a sample value the way Prometheus does on the wire.
///
/// # Examples
///
/// ```
/// use promrelay_common::types::format_value;
///
/// assert_eq!(format_value(13.3), "13.3");
/// assert_eq!(format_value(f64::INFINITY), "+Inf");
/// assert_eq!(format_value(f64::NAN), "NaN");
/// ```
pub fn format_value(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value == f64::INFINITY {
        "+Inf".to_string()
    } else if value == f64::NEG_INFINITY {
        "-Inf".to_string()
    } else {
        value.to_string()
    }
}

fn format_timestamp(timestamp_ms: i64) -> String {
    let secs = timestamp_ms.div_euclid(1000);
    let millis = timestamp_ms.rem_euclid(1000);
    if millis == 0 {
        secs.to_string()
    } else {
        format!("{secs}.{millis:03}")
    }
}

/// `name="value"` pairs, skipping the metric name label.
fn format_labels(labels: &Labels) -> String {
    labels
        .iter()
        .filter(|(k, _)| k.as_str() != METRIC_NAME_LABEL)
        .map(|(k, v)| format!("{k}={v:?}"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Total number of samples held in a value set.
pub fn sample_count(values: &ValueSet) -> usize {
    values.values().map(Vec::len).sum()
}

/// One scrape target as published by the central API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSpec {
    pub id: i64,
    /// Base URL of the query backend.
    #[serde(rename = "sourceURL")]
    pub endpoint: String,
    pub query: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> Labels {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn sample_serializes_as_prometheus_vector_element() {
        let sample = Sample {
            labels: labels(&[("__name__", "joeblow")]),
            timestamp_ms: 10_500,
            value: 13.3,
        };
        let json = serde_json::to_value(&sample).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"metric": {"__name__": "joeblow"}, "value": [10.5, "13.3"]})
        );
    }

    #[test]
    fn sample_parses_special_values() {
        let json = r#"[
            {"metric":{},"value":[1,"NaN"]},
            {"metric":{},"value":[1,"+Inf"]},
            {"metric":{},"value":[1,"-Inf"]}
        ]"#;
        let samples: Vec<Sample> = serde_json::from_str(json).unwrap();
        assert!(samples[0].value.is_nan());
        assert_eq!(samples[1].value, f64::INFINITY);
        assert_eq!(samples[2].value, f64::NEG_INFINITY);
    }

    #[test]
    fn sample_rejects_non_numeric_value() {
        let json = r#"{"metric":{},"value":[1,"many"]}"#;
        let err = serde_json::from_str::<Sample>(json).unwrap_err();
        assert!(err.to_string().contains("invalid sample value"));
    }

    #[test]
    fn value_set_uses_source_ids_as_object_keys() {
        let mut values = ValueSet::new();
        values.insert(
            7,
            vec![Sample {
                labels: labels(&[("__name__", "up")]),
                timestamp_ms: 1_000,
                value: 1.0,
            }],
        );
        let json = serde_json::to_string(&values).unwrap();
        assert!(json.starts_with(r#"{"7":[{"#));

        let back: ValueSet = serde_json::from_str(&json).unwrap();
        assert_eq!(back, values);
        assert_eq!(sample_count(&back), 1);
    }

    #[test]
    fn source_spec_uses_api_field_names() {
        let json = r#"{"id":77,"sourceURL":"http://prom:9090","query":"up"}"#;
        let spec: SourceSpec = serde_json::from_str(json).unwrap();
        assert_eq!(
            spec,
            SourceSpec {
                id: 77,
                endpoint: "http://prom:9090".to_string(),
                query: "up".to_string(),
            }
        );
    }

    #[test]
    fn display_renders_prometheus_style() {
        let sample = Sample {
            labels: labels(&[("__name__", "up"), ("job", "node")]),
            timestamp_ms: 10_005,
            value: 1.0,
        };
        assert_eq!(sample.to_string(), r#"up{job="node"} => 1 @[10.005]"#);
    }
}
