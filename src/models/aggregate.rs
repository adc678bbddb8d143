// Running aggregates: one host's rollup of a metric, or one metric across all hosts.
// Folds are pure: every update returns a new value.

use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// Shared fields of host and cluster aggregates. Extrema start at the infinities so the
/// first folded value always replaces them.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricAggregate {
    pub sum: f64,
    /// Carried through storage and the wire but never computed.
    pub deviation: Option<f64>,
    pub max: f64,
    pub min: f64,
}

impl MetricAggregate {
    pub const fn empty(deviation: Option<f64>) -> Self {
        Self {
            sum: 0.0,
            deviation,
            max: f64::NEG_INFINITY,
            min: f64::INFINITY,
        }
    }

    /// False until at least one value has been folded in.
    pub fn has_samples(&self) -> bool {
        self.min <= self.max
    }

    fn with_extrema(self, max: f64, min: f64) -> Self {
        Self {
            max: self.max.max(max),
            min: self.min.min(min),
            ..self
        }
    }
}

/// Per-host aggregate for one metric and one time bucket.
///
/// Within a bucket `sum` is a running total of the raw samples. When minute buckets are
/// rolled into an hour, `sum` is reused as a two-point running mean:
/// `new = (old + incoming) / 2`. That recurrence is not a true mean when there are more
/// than two buckets; it is kept so existing hourly values stay comparable.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricHostAggregate {
    #[serde(flatten)]
    pub aggregate: MetricAggregate,
}

impl Default for MetricHostAggregate {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricHostAggregate {
    pub const fn new() -> Self {
        Self {
            aggregate: MetricAggregate::empty(Some(0.0)),
        }
    }

    /// Rebuild from persisted columns; deviation is not stored so it comes back as 0.0.
    pub const fn from_stored(sum: f64, max: f64, min: f64) -> Self {
        Self {
            aggregate: MetricAggregate {
                sum,
                deviation: Some(0.0),
                max,
                min,
            },
        }
    }

    /// Intra-bucket fold of one raw sample. NaN is treated as a missing sample.
    pub fn fold_sample(self, value: f64) -> Self {
        if value.is_nan() {
            return self;
        }
        let aggregate = self.aggregate.with_extrema(value, value);
        Self {
            aggregate: MetricAggregate {
                sum: aggregate.sum + value,
                ..aggregate
            },
        }
    }

    /// Inter-bucket fold of a finer-grained aggregate (minute into hour).
    pub fn fold_bucket(self, bucket: &MetricHostAggregate) -> Self {
        let aggregate = self
            .aggregate
            .with_extrema(bucket.aggregate.max, bucket.aggregate.min);
        Self {
            aggregate: MetricAggregate {
                sum: (aggregate.sum + bucket.aggregate.sum) / 2.0,
                ..aggregate
            },
        }
    }

    pub fn has_samples(&self) -> bool {
        self.aggregate.has_samples()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Aggregate of one metric across every host reporting it at one timestamp.
/// The per-host mean is not stored; see [`MetricClusterAggregate::mean_per_host`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricClusterAggregate {
    #[serde(flatten)]
    pub aggregate: MetricAggregate,
    pub number_of_hosts: u32,
}

impl Default for MetricClusterAggregate {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricClusterAggregate {
    pub const fn new() -> Self {
        Self {
            aggregate: MetricAggregate::empty(None),
            number_of_hosts: 0,
        }
    }

    pub const fn from_stored(sum: f64, number_of_hosts: u32, max: f64, min: f64) -> Self {
        Self {
            aggregate: MetricAggregate {
                sum,
                deviation: None,
                max,
                min,
            },
            number_of_hosts,
        }
    }

    /// Fold one host's value for this timestamp. NaN is treated as a missing host value.
    pub fn fold_host_value(self, value: f64) -> Self {
        if value.is_nan() {
            return self;
        }
        let aggregate = self.aggregate.with_extrema(value, value);
        Self {
            aggregate: MetricAggregate {
                sum: aggregate.sum + value,
                ..aggregate
            },
            number_of_hosts: self.number_of_hosts + 1,
        }
    }

    /// Merge another cluster aggregate: sums and host counts add, extrema widen.
    pub fn merge(self, other: &MetricClusterAggregate) -> Self {
        let aggregate = self
            .aggregate
            .with_extrema(other.aggregate.max, other.aggregate.min);
        Self {
            aggregate: MetricAggregate {
                sum: aggregate.sum + other.aggregate.sum,
                ..aggregate
            },
            number_of_hosts: self.number_of_hosts + other.number_of_hosts,
        }
    }

    pub fn has_samples(&self) -> bool {
        self.number_of_hosts > 0 && self.aggregate.has_samples()
    }

    /// `sum / numberOfHosts`; zero hosts is an error rather than NaN or infinity.
    pub fn mean_per_host(&self) -> Result<f64, StoreError> {
        if self.number_of_hosts == 0 {
            return Err(StoreError::ZeroHostCount);
        }
        Ok(self.aggregate.sum / f64::from(self.number_of_hosts))
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_aggregates_report_no_samples() {
        assert!(!MetricHostAggregate::new().has_samples());
        assert!(!MetricClusterAggregate::new().has_samples());
    }

    #[test]
    fn nan_samples_are_skipped() {
        let agg = MetricHostAggregate::new().fold_sample(f64::NAN);
        assert!(!agg.has_samples());
        let agg = agg.fold_sample(3.0).fold_sample(f64::NAN);
        assert_eq!(agg.aggregate.sum, 3.0);
    }

    #[test]
    fn host_wire_format_includes_deviation() {
        let json = MetricHostAggregate::new().fold_sample(2.0).to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["sum"], 2.0);
        assert_eq!(value["deviation"], 0.0);
        assert_eq!(value["max"], 2.0);
        assert_eq!(value["min"], 2.0);
    }

    #[test]
    fn cluster_wire_format_uses_number_of_hosts() {
        let json = MetricClusterAggregate::new()
            .fold_host_value(1.0)
            .to_json()
            .unwrap();
        assert!(json.contains("\"numberOfHosts\":1"));
        assert!(json.contains("\"deviation\":null"));
    }
}
