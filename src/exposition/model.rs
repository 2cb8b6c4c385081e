//! Structured snapshot types produced by the exposition parser
//!
//! The serde field names match the JSON wire form served by the HTTP API
//! (`currentTime`, `metrics`, `type`, `values`, `measure`), so a snapshot can
//! be fed back into [`parse_payload`](super::parse_payload) unchanged.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Kind declared by a `# TYPE` line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    #[serde(alias = "COUNTER")]
    Counter,
    #[serde(alias = "GAUGE")]
    Gauge,
    #[serde(alias = "HISTOGRAM")]
    Histogram,
    #[serde(alias = "SUMMARY")]
    Summary,
    /// Absent, `untyped`, or anything we do not expand
    #[serde(alias = "UNHANDLED", alias = "untyped", alias = "UNTYPED")]
    Unhandled,
}

impl MetricKind {
    pub fn from_type_name(name: &str) -> Self {
        match name {
            "counter" => Self::Counter,
            "gauge" => Self::Gauge,
            "histogram" => Self::Histogram,
            "summary" => Self::Summary,
            _ => Self::Unhandled,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Counter => "counter",
            Self::Gauge => "gauge",
            Self::Histogram => "histogram",
            Self::Summary => "summary",
            Self::Unhandled => "unhandled",
        }
    }

    /// Histograms and summaries are assembled from several exposition lines
    pub fn is_composite(&self) -> bool {
        matches!(self, Self::Histogram | Self::Summary)
    }
}

/// What a single sample value measures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MeasureKind {
    Total,
    CurrentValue,
    Sum,
    Count,
    CumulativeCount,
    Quantile,
    #[serde(rename = "unhandled_metric_type")]
    Unhandled,
}

impl MeasureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Total => "total",
            Self::CurrentValue => "current_value",
            Self::Sum => "sum",
            Self::Count => "count",
            Self::CumulativeCount => "cumulative_count",
            Self::Quantile => "quantile",
            Self::Unhandled => "unhandled_metric_type",
        }
    }
}

/// One labeled value inside a family
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    #[serde(rename = "labels", default, skip_serializing_if = "BTreeMap::is_empty")]
    pub label_set: BTreeMap<String, String>,
    pub value: String,
    #[serde(rename = "measure")]
    pub measure_kind: MeasureKind,
}

/// A named group of samples sharing help text and kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricFamily {
    pub name: String,
    #[serde(default)]
    pub help: String,
    #[serde(rename = "type")]
    pub kind: MetricKind,
    #[serde(rename = "values", default)]
    pub samples: Vec<MetricSample>,
}

/// Everything collected from one pod in one poll cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(rename = "currentTime", default = "Utc::now")]
    pub collection_time: DateTime<Utc>,
    #[serde(rename = "metrics", default)]
    pub families: BTreeMap<String, MetricFamily>,
}

impl Snapshot {
    pub fn new(collection_time: DateTime<Utc>) -> Self {
        Self {
            collection_time,
            families: BTreeMap::new(),
        }
    }

    /// Total number of samples across all families
    pub fn sample_count(&self) -> usize {
        self.families.values().map(|f| f.samples.len()).sum()
    }
}

/// Canonical text form of a collection time as stored and returned by queries
///
/// Fixed width (millisecond precision, `Z` suffix) so that lexical order in
/// SQLite matches chronological order.
pub fn collection_time_key(time: &DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_kind_from_type_name() {
        assert_eq!(MetricKind::from_type_name("counter"), MetricKind::Counter);
        assert_eq!(MetricKind::from_type_name("histogram"), MetricKind::Histogram);
        assert_eq!(MetricKind::from_type_name("untyped"), MetricKind::Unhandled);
        assert_eq!(MetricKind::from_type_name("COUNTER"), MetricKind::Unhandled);
    }

    #[test]
    fn test_measure_kind_serializes_as_wire_name() {
        let json = serde_json::to_string(&MeasureKind::Unhandled).unwrap();
        assert_eq!(json, "\"unhandled_metric_type\"");
        let json = serde_json::to_string(&MeasureKind::CumulativeCount).unwrap();
        assert_eq!(json, "\"cumulative_count\"");
    }

    #[test]
    fn test_collection_time_key_is_sortable() {
        let early = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();
        let late = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 6).unwrap();
        assert_eq!(collection_time_key(&early), "2026-01-02T03:04:05.000Z");
        assert!(collection_time_key(&early) < collection_time_key(&late));
    }
}
