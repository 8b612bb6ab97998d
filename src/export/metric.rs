use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Serialize, Serializer};

use crate::normalize::Metric;
use crate::storage::aggregate::Statistics;
use crate::storage::{WindowKey, Windows};

/// Send frequencies below this are advertised at one-second resolution.
const HIGH_RESOLUTION_THRESHOLD: Duration = Duration::from_secs(60);

/// Document sent by one publish call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricData {
    pub namespace: String,
    pub metric_data: Vec<DataPoint>,
}

/// Summary of one metric within one window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DataPoint {
    pub metric_name: &'static str,
    pub storage_resolution: u64,
    pub statistic_values: StatisticValues,
    #[serde(serialize_with = "serialize_timestamp")]
    pub timestamp: WindowKey,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StatisticValues {
    pub sample_count: u64,
    pub sum: f64,
    pub minimum: f64,
    pub maximum: f64,
}

impl From<&Statistics> for StatisticValues {
    fn from(stats: &Statistics) -> Self {
        Self {
            sample_count: stats.count,
            sum: stats.sum,
            minimum: stats.min,
            maximum: stats.max,
        }
    }
}

/// Resolution hint in seconds for a given send frequency.
pub fn storage_resolution(send_frequency: Duration) -> u64 {
    if send_frequency < HIGH_RESOLUTION_THRESHOLD {
        1
    } else {
        send_frequency.as_secs()
    }
}

/// Flattens extracted windows into data points, oldest window first.
///
/// Accumulators that never recorded a value are skipped.
pub fn build_data_points(windows: &Windows, send_frequency: Duration) -> Vec<DataPoint> {
    let resolution = storage_resolution(send_frequency);

    windows
        .iter()
        .flat_map(|(&key, entry)| {
            entry
                .iter()
                .filter(|(_, stats)| !stats.is_empty())
                .map(move |(metric, stats)| data_point(*metric, stats, key, resolution))
        })
        .collect()
}

/// Builds the full publish document for a set of windows.
pub fn build_metric_data(namespace: &str, windows: &Windows, send_frequency: Duration) -> MetricData {
    MetricData {
        namespace: namespace.to_string(),
        metric_data: build_data_points(windows, send_frequency),
    }
}

fn data_point(metric: Metric, stats: &Statistics, key: WindowKey, resolution: u64) -> DataPoint {
    DataPoint {
        metric_name: metric.as_str(),
        storage_resolution: resolution,
        statistic_values: stats.into(),
        timestamp: key,
    }
}

/// Formats a window key as an RFC 3339 UTC timestamp.
pub fn format_timestamp(key: WindowKey) -> String {
    i64::try_from(key)
        .ok()
        .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Secs, true))
        .unwrap_or_else(|| key.to_string())
}

fn serialize_timestamp<S: Serializer>(key: &WindowKey, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&format_timestamp(*key))
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    fn stats(values: &[f64]) -> Statistics {
        let mut s = Statistics::new();
        s.record_all(values);
        s
    }

    #[test]
    fn test_storage_resolution() {
        assert_eq!(storage_resolution(Duration::from_secs(1)), 1);
        assert_eq!(storage_resolution(Duration::from_secs(59)), 1);
        assert_eq!(storage_resolution(Duration::from_secs(60)), 60);
        assert_eq!(storage_resolution(Duration::from_secs(300)), 300);
    }

    #[test]
    fn test_format_timestamp() {
        assert_eq!(format_timestamp(0), "1970-01-01T00:00:00Z");
        assert_eq!(format_timestamp(1_700_000_100), "2023-11-14T22:15:00Z");
    }

    #[test]
    fn test_build_data_points_flattens_windows() {
        let mut windows = Windows::new();
        windows.insert(
            60,
            BTreeMap::from([
                (Metric::Backlog, stats(&[0.0, 2.0])),
                (Metric::RequestsCount, stats(&[7.0])),
            ]),
        );
        windows.insert(120, BTreeMap::from([(Metric::Backlog, stats(&[1.0]))]));

        let points = build_data_points(&windows, Duration::from_secs(60));
        assert_eq!(points.len(), 3);

        assert_eq!(points[0].metric_name, "backlog");
        assert_eq!(points[0].timestamp, 60);
        assert_eq!(points[0].storage_resolution, 60);
        assert_eq!(
            points[0].statistic_values,
            StatisticValues {
                sample_count: 2,
                sum: 2.0,
                minimum: 0.0,
                maximum: 2.0,
            }
        );
        assert_eq!(points[1].metric_name, "requests_count");
        assert_eq!(points[2].timestamp, 120);
    }

    #[test]
    fn test_build_data_points_skips_empty_accumulators() {
        let mut windows = Windows::new();
        windows.insert(
            60,
            BTreeMap::from([
                (Metric::Backlog, Statistics::new()),
                (Metric::BusyThreads, stats(&[3.0])),
            ]),
        );

        let points = build_data_points(&windows, Duration::from_secs(10));
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].metric_name, "busy_threads");
        assert_eq!(points[0].storage_resolution, 1);
    }

    #[test]
    fn test_metric_data_serialization() {
        let mut windows = Windows::new();
        windows.insert(0, BTreeMap::from([(Metric::PoolCapacity, stats(&[8.0, 16.0]))]));

        let doc = build_metric_data("Puma", &windows, Duration::from_secs(60));
        let json = serde_json::to_value(&doc).expect("serialize");

        assert_eq!(
            json,
            serde_json::json!({
                "namespace": "Puma",
                "metric_data": [{
                    "metric_name": "pool_capacity",
                    "storage_resolution": 60,
                    "statistic_values": {
                        "sample_count": 2,
                        "sum": 24.0,
                        "minimum": 8.0,
                        "maximum": 16.0
                    },
                    "timestamp": "1970-01-01T00:00:00Z"
                }]
            })
        );
    }
}
