use std::time::Duration;

use tracing::info;

use super::metric::{build_data_points, format_timestamp};
use super::{Publish, PublishError};
use crate::storage::Windows;

/// Writes each data point to the log. Used when no backend is configured.
pub struct LogPublisher {
    namespace: String,
    send_frequency: Duration,
}

impl LogPublisher {
    pub fn new(namespace: &str, send_frequency: Duration) -> Self {
        Self {
            namespace: namespace.to_string(),
            send_frequency,
        }
    }
}

impl Publish for LogPublisher {
    fn name(&self) -> &str {
        "log"
    }

    async fn publish(&self, windows: &Windows) -> Result<usize, PublishError> {
        let points = build_data_points(windows, self.send_frequency);

        for point in &points {
            let stats = &point.statistic_values;
            info!(
                namespace = %self.namespace,
                metric = point.metric_name,
                timestamp = %format_timestamp(point.timestamp),
                resolution = point.storage_resolution,
                sample_count = stats.sample_count,
                sum = stats.sum,
                minimum = stats.minimum,
                maximum = stats.maximum,
                "data point",
            );
        }

        Ok(points.len())
    }
}
