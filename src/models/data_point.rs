use crate::models::{LimitedLenString1024, LimitedLenString256};
use serde::{Deserialize, Serialize};

/// Metric data single measurement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct DataPoint {
    /// Namespace of the metric.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) ns: Option<LimitedLenString256>,

    /// Name of the metric.
    pub(crate) name: LimitedLenString1024,

    /// Metric type. Single measurement or the aggregated value.
    pub(crate) kind: DataPointType,

    /// Single value for measurement. Sum of individual measurements for the aggregation.
    pub(crate) value: f64,

    /// Metric weight of the aggregated metric. Should not be set for a measurement.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) count: Option<i32>,

    /// Minimum value of the aggregated metric. Should not be set for a measurement.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) min: Option<f64>,

    /// Maximum value of the aggregated metric. Should not be set for a measurement.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) max: Option<f64>,

    /// Standard deviation of the aggregated metric. Should not be set for a measurement.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) std_dev: Option<f64>,
}

/// Type of the metric data measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) enum DataPointType {
    Measurement,
    Aggregation,
}
