//! Named series and the metric family handed to the host.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The synthetic gauge streams, in emission order.
pub const SERIES_NAMES: [&str; 10] = [
    "alice", "bob", "carol", "dave", "eve", "malory", "oscar", "peggy", "trudy", "trent",
];

/// Kind of metric carried by a family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MetricType {
    /// Point-in-time reading.
    Gauge,
}

impl std::fmt::Display for MetricType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MetricType::Gauge => write!(f, "gauge"),
        }
    }
}

/// One emitted measurement: a single-metric family for one series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricFamily {
    /// Series name.
    pub name: String,

    /// Metric type, always [`MetricType::Gauge`] for this harness.
    pub metric_type: MetricType,

    /// Gauge reading.
    pub value: f64,

    /// When the family was built.
    pub time: DateTime<Utc>,
}

impl MetricFamily {
    /// Build a gauge family stamped with the current time.
    pub fn gauge(name: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            metric_type: MetricType::Gauge,
            value,
            time: Utc::now(),
        }
    }
}
