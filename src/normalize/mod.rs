use std::collections::BTreeMap;
use std::fmt;

use serde_json::{Map, Value};
use thiserror::Error;

/// Key under which a clustered snapshot lists its workers.
const WORKER_STATUS_KEY: &str = "worker_status";

/// Key of a worker's most recent status record.
const LAST_STATUS_KEY: &str = "last_status";

/// Metrics extracted from every status record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Metric {
    /// Connections waiting in the accept backlog.
    Backlog,
    /// Threads currently busy serving or waiting on a request.
    BusyThreads,
    /// Threads available to take new work.
    PoolCapacity,
    /// Requests served since the worker booted.
    RequestsCount,
}

impl Metric {
    /// Every metric, in export order.
    pub const ALL: [Metric; 4] = [
        Metric::Backlog,
        Metric::BusyThreads,
        Metric::PoolCapacity,
        Metric::RequestsCount,
    ];

    /// Returns the canonical name used in status records and exports.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Backlog => "backlog",
            Self::BusyThreads => "busy_threads",
            Self::PoolCapacity => "pool_capacity",
            Self::RequestsCount => "requests_count",
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised when a raw snapshot cannot be normalized.
#[derive(Error, Debug)]
pub enum InvalidSnapshot {
    #[error("stats cannot be null")]
    Null,

    #[error("stats must be a JSON object, got {found}")]
    NotAnObject { found: &'static str },

    #[error("malformed worker_status: expected {expected}, got {found}")]
    MalformedWorkers {
        expected: &'static str,
        found: &'static str,
    },

    #[error("metric {metric} is not numeric: {value}")]
    NonNumeric { metric: Metric, value: String },
}

/// Samples collected by a single poll, keyed by metric.
///
/// Every metric in [`Metric::ALL`] is always present; a metric nobody
/// reported maps to an empty sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleBatch {
    samples: BTreeMap<Metric, Vec<f64>>,
}

impl SampleBatch {
    /// Creates a batch with an empty sequence for every metric.
    pub fn new() -> Self {
        Self {
            samples: Metric::ALL.into_iter().map(|m| (m, Vec::new())).collect(),
        }
    }

    /// Appends one observed value for a metric.
    pub fn push(&mut self, metric: Metric, value: f64) {
        self.samples.entry(metric).or_default().push(value);
    }

    /// Values observed for a metric, in insertion order.
    pub fn values(&self, metric: Metric) -> &[f64] {
        self.samples.get(&metric).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Iterates over every metric and its values.
    pub fn iter(&self) -> impl Iterator<Item = (Metric, &[f64])> {
        self.samples.iter().map(|(m, v)| (*m, v.as_slice()))
    }

    /// Total number of individual values across all metrics.
    pub fn sample_count(&self) -> usize {
        self.samples.values().map(Vec::len).sum()
    }

    /// Whether no metric carries any value.
    pub fn is_empty(&self) -> bool {
        self.sample_count() == 0
    }
}

impl Default for SampleBatch {
    fn default() -> Self {
        Self::new()
    }
}

impl FromIterator<(Metric, Vec<f64>)> for SampleBatch {
    fn from_iter<I: IntoIterator<Item = (Metric, Vec<f64>)>>(iter: I) -> Self {
        let mut batch = Self::new();
        for (metric, values) in iter {
            batch.samples.entry(metric).or_default().extend(values);
        }
        batch
    }
}

/// Converts a raw status snapshot into a [`SampleBatch`].
///
/// A snapshot carrying `worker_status` is clustered: each worker's
/// `last_status` record contributes one value per metric it reports, and
/// workers whose `last_status` is absent or null are skipped. Worker entries
/// and status records that are not objects are rejected. Any other object is
/// treated as a single status record.
pub fn normalize(snapshot: &Value) -> Result<SampleBatch, InvalidSnapshot> {
    let stats = match snapshot {
        Value::Null => return Err(InvalidSnapshot::Null),
        Value::Object(map) => map,
        other => {
            return Err(InvalidSnapshot::NotAnObject {
                found: json_type(other),
            })
        }
    };

    let mut batch = SampleBatch::new();

    match stats.get(WORKER_STATUS_KEY) {
        Some(workers) => {
            let Value::Array(workers) = workers else {
                return Err(InvalidSnapshot::MalformedWorkers {
                    expected: "array",
                    found: json_type(workers),
                });
            };

            for worker in workers {
                let Value::Object(worker) = worker else {
                    return Err(InvalidSnapshot::MalformedWorkers {
                        expected: "worker object",
                        found: json_type(worker),
                    });
                };

                match worker.get(LAST_STATUS_KEY) {
                    // Not checked in yet.
                    None | Some(Value::Null) => {}
                    Some(Value::Object(status)) => collect_status(&mut batch, status)?,
                    Some(other) => {
                        return Err(InvalidSnapshot::MalformedWorkers {
                            expected: "last_status object",
                            found: json_type(other),
                        })
                    }
                }
            }
        }
        None => collect_status(&mut batch, stats)?,
    }

    Ok(batch)
}

/// Appends every reported metric of one status record.
fn collect_status(
    batch: &mut SampleBatch,
    status: &Map<String, Value>,
) -> Result<(), InvalidSnapshot> {
    for metric in Metric::ALL {
        match status.get(metric.as_str()) {
            None | Some(Value::Null) => {}
            Some(Value::Number(n)) => {
                if let Some(v) = n.as_f64() {
                    batch.push(metric, v);
                }
            }
            Some(other) => {
                return Err(InvalidSnapshot::NonNumeric {
                    metric,
                    value: other.to_string(),
                })
            }
        }
    }

    Ok(())
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
