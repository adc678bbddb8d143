// Rollup logic: pure functions from input rows to aggregate rows, plus the host and
// cluster strategies that read/write them through the store for one window.
// Output is ordered by series key, so rerunning a window produces identical rows.

mod cluster;
mod host;

pub use cluster::ClusterAggregator;
pub use host::HostAggregator;

use std::collections::BTreeMap;

use crate::models::{
    ClusterAggregateRow, ClusterMetricKey, HostAggregateRow, HostMetricKey,
    MetricClusterAggregate, MetricHostAggregate, TimelineMetric,
};

/// Raw samples in [start, end) → one host aggregate per series, keyed at `start`.
/// Sums are running totals of the samples.
pub fn aggregate_host_samples(
    records: &[TimelineMetric],
    start: i64,
    end: i64,
) -> Vec<HostAggregateRow> {
    if start >= end {
        return Vec::new();
    }
    let mut by_key: BTreeMap<HostMetricKey, (&str, MetricHostAggregate)> = BTreeMap::new();
    for record in records {
        let entry = by_key
            .entry(record.host_key())
            .or_insert((record.unit_type.as_str(), MetricHostAggregate::new()));
        entry.0 = record.unit_type.as_str();
        for (_, &value) in record.metric_values.range(start..end) {
            entry.1 = entry.1.fold_sample(value);
        }
    }

    by_key
        .into_iter()
        .filter(|(_, (_, agg))| agg.has_samples())
        .map(|(key, (unit_type, aggregate))| HostAggregateRow {
            key,
            unit_type: unit_type.to_string(),
            timestamp: start,
            aggregate,
        })
        .collect()
}

/// Finer host aggregates (minute) → one coarser aggregate per series, keyed at `start`.
/// Buckets are folded in time order with the running-mean sum rule.
pub fn aggregate_host_buckets(rows: &[HostAggregateRow], start: i64) -> Vec<HostAggregateRow> {
    let mut by_key: BTreeMap<&HostMetricKey, Vec<&HostAggregateRow>> = BTreeMap::new();
    for row in rows {
        by_key.entry(&row.key).or_default().push(row);
    }

    let mut out = Vec::with_capacity(by_key.len());
    for (key, mut buckets) in by_key {
        buckets.sort_by_key(|r| r.timestamp);
        let aggregate = buckets
            .iter()
            .filter(|r| r.aggregate.has_samples())
            .fold(MetricHostAggregate::new(), |acc, r| {
                acc.fold_bucket(&r.aggregate)
            });
        if !aggregate.has_samples() {
            continue;
        }
        let unit_type = buckets
            .last()
            .map(|r| r.unit_type.clone())
            .unwrap_or_default();
        out.push(HostAggregateRow {
            key: key.clone(),
            unit_type,
            timestamp: start,
            aggregate,
        });
    }
    out
}

/// Raw samples in [start, end) → cluster aggregates per series and time slice.
/// Each host contributes one value per slice (the mean of its samples there), so
/// `number_of_hosts` counts distinct hosts.
pub fn aggregate_cluster_slices(
    records: &[TimelineMetric],
    start: i64,
    end: i64,
    slice_ms: i64,
) -> Vec<ClusterAggregateRow> {
    if start >= end {
        return Vec::new();
    }
    let slice_ms = slice_ms.max(1);
    // (series, slice start) -> host -> (total, count)
    let mut per_host: BTreeMap<(ClusterMetricKey, i64), BTreeMap<&str, (f64, u32)>> =
        BTreeMap::new();
    let mut units: BTreeMap<ClusterMetricKey, &str> = BTreeMap::new();

    for record in records {
        let key = record.cluster_key();
        units.insert(key.clone(), record.unit_type.as_str());
        for (&ts, &value) in record.metric_values.range(start..end) {
            if value.is_nan() {
                continue;
            }
            let slice = start + ((ts - start) / slice_ms) * slice_ms;
            let host = per_host
                .entry((key.clone(), slice))
                .or_default()
                .entry(record.host_name.as_str())
                .or_insert((0.0, 0));
            host.0 += value;
            host.1 += 1;
        }
    }

    per_host
        .into_iter()
        .filter_map(|((key, slice), hosts)| {
            let aggregate = hosts
                .values()
                .fold(MetricClusterAggregate::new(), |acc, &(total, count)| {
                    acc.fold_host_value(total / f64::from(count))
                });
            if !aggregate.has_samples() {
                return None;
            }
            let unit_type = units.get(&key).copied().unwrap_or_default().to_string();
            Some(ClusterAggregateRow {
                key,
                unit_type,
                timestamp: slice,
                aggregate,
            })
        })
        .collect()
}

/// Finer cluster aggregates → one coarser aggregate per series, keyed at `start`.
/// Sums and host counts add up; the per-host mean is recovered at query time.
pub fn aggregate_cluster_buckets(
    rows: &[ClusterAggregateRow],
    start: i64,
) -> Vec<ClusterAggregateRow> {
    let mut by_key: BTreeMap<&ClusterMetricKey, (&str, MetricClusterAggregate)> =
        BTreeMap::new();
    for row in rows {
        if !row.aggregate.has_samples() {
            continue;
        }
        let entry = by_key
            .entry(&row.key)
            .or_insert((row.unit_type.as_str(), MetricClusterAggregate::new()));
        entry.0 = row.unit_type.as_str();
        entry.1 = entry.1.merge(&row.aggregate);
    }

    by_key
        .into_iter()
        .map(|(key, (unit_type, aggregate))| ClusterAggregateRow {
            key: key.clone(),
            unit_type: unit_type.to_string(),
            timestamp: start,
            aggregate,
        })
        .collect()
}
