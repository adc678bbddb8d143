// Timeline metric records (ingest + raw query results) and the series keys used by aggregation.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};

use super::{MetricClusterAggregate, MetricHostAggregate};

/// One series of samples for a metric on a host. `metric_values` maps sample time (epoch ms)
/// to value; null values in the input are dropped on deserialize.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineMetric {
    pub metric_name: String,
    pub app_id: String,
    #[serde(default)]
    pub instance_id: Option<String>,
    pub host_name: String,
    #[serde(default, rename = "type")]
    pub unit_type: String,
    /// Server-side time; set by the store on ingest, ignored in ingest payloads.
    #[serde(default)]
    pub timestamp: i64,
    pub start_time: i64,
    #[serde(default, deserialize_with = "non_null_values")]
    pub metric_values: BTreeMap<i64, f64>,
}

fn non_null_values<'de, D>(deserializer: D) -> Result<BTreeMap<i64, f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = BTreeMap::<i64, Option<f64>>::deserialize(deserializer)?;
    Ok(raw
        .into_iter()
        .filter_map(|(ts, v)| v.map(|v| (ts, v)))
        .collect())
}

impl TimelineMetric {
    pub fn host_key(&self) -> HostMetricKey {
        HostMetricKey {
            metric_name: self.metric_name.clone(),
            host_name: self.host_name.clone(),
            app_id: self.app_id.clone(),
            instance_id: self.instance_id.clone(),
        }
    }

    pub fn cluster_key(&self) -> ClusterMetricKey {
        ClusterMetricKey {
            metric_name: self.metric_name.clone(),
            app_id: self.app_id.clone(),
            instance_id: self.instance_id.clone(),
        }
    }

    /// (max, min, avg) over the sample values, each 0.0 when there are none.
    pub fn summary(&self) -> (f64, f64, f64) {
        let mut max = f64::NEG_INFINITY;
        let mut min = f64::INFINITY;
        let mut total = 0.0;
        let mut count = 0usize;
        for &v in self.metric_values.values().filter(|v| !v.is_nan()) {
            max = max.max(v);
            min = min.min(v);
            total += v;
            count += 1;
        }
        if count == 0 {
            return (0.0, 0.0, 0.0);
        }
        (max, min, total / count as f64)
    }
}

/// A batch of metrics: the ingest payload and the result of a raw query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimelineMetrics {
    #[serde(default)]
    pub metrics: Vec<TimelineMetric>,
}

impl TimelineMetrics {
    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }

    /// Merge `metric` into an existing series with the same host key (times ignored),
    /// or append it as a new series.
    pub fn add_or_merge(&mut self, metric: TimelineMetric) {
        match self.metrics.iter_mut().find(|m| {
            m.metric_name == metric.metric_name
                && m.host_name == metric.host_name
                && m.app_id == metric.app_id
                && m.instance_id == metric.instance_id
        }) {
            Some(existing) => {
                existing.start_time = existing.start_time.min(metric.start_time);
                existing.timestamp = existing.timestamp.max(metric.timestamp);
                existing.metric_values.extend(metric.metric_values);
            }
            None => self.metrics.push(metric),
        }
    }
}

/// Host series identity: a metric of one app instance on one host.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostMetricKey {
    pub metric_name: String,
    pub host_name: String,
    pub app_id: String,
    pub instance_id: Option<String>,
}

/// Cluster series identity: host excluded.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterMetricKey {
    pub metric_name: String,
    pub app_id: String,
    pub instance_id: Option<String>,
}

/// One row of host_aggregate_minute / host_aggregate_hour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostAggregateRow {
    pub key: HostMetricKey,
    pub unit_type: String,
    pub timestamp: i64,
    pub aggregate: MetricHostAggregate,
}

/// One row of cluster_aggregate_minute / cluster_aggregate_hour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterAggregateRow {
    pub key: ClusterMetricKey,
    pub unit_type: String,
    pub timestamp: i64,
    pub aggregate: MetricClusterAggregate,
}
