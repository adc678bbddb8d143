// Rollup tests: raw -> host minute, minute -> hour, raw -> cluster slices, cluster merge

mod common;

use common::metric;
use metrics_collector::aggregation::{
    aggregate_cluster_buckets, aggregate_cluster_slices, aggregate_host_buckets,
    aggregate_host_samples,
};
use metrics_collector::error::StoreError;
use metrics_collector::models::{
    ClusterAggregateRow, ClusterMetricKey, HostAggregateRow, HostMetricKey,
    MetricClusterAggregate, MetricHostAggregate,
};

const T0: i64 = 1_700_000_000_000;
const MINUTE: i64 = 60_000;

fn host_key(name: &str, host: &str) -> HostMetricKey {
    HostMetricKey {
        metric_name: name.into(),
        host_name: host.into(),
        app_id: "HOST".into(),
        instance_id: None,
    }
}

fn host_bucket(timestamp: i64, sum: f64, max: f64, min: f64) -> HostAggregateRow {
    HostAggregateRow {
        key: host_key("cpu_user", "h1"),
        unit_type: "float".into(),
        timestamp,
        aggregate: MetricHostAggregate::from_stored(sum, max, min),
    }
}

#[test]
fn host_samples_sum_is_running_total() {
    let records = vec![metric(
        "cpu_user",
        "h1",
        "HOST",
        T0,
        &[(T0, 1.0), (T0 + 1_000, 2.0), (T0 + 2_000, 3.0)],
    )];
    let rows = aggregate_host_samples(&records, T0, T0 + 5 * MINUTE);
    assert_eq!(rows.len(), 1);
    let row = &rows[0];
    assert_eq!(row.key, host_key("cpu_user", "h1"));
    assert_eq!(row.timestamp, T0);
    assert_eq!(row.aggregate.aggregate.sum, 6.0);
    assert_eq!(row.aggregate.aggregate.max, 3.0);
    assert_eq!(row.aggregate.aggregate.min, 1.0);
    assert_eq!(row.aggregate.aggregate.deviation, Some(0.0));
}

#[test]
fn host_samples_outside_window_are_ignored() {
    let records = vec![metric(
        "cpu_user",
        "h1",
        "HOST",
        T0 - MINUTE,
        &[(T0 - 1, 100.0), (T0, 4.0), (T0 + MINUTE, 200.0)],
    )];
    let rows = aggregate_host_samples(&records, T0, T0 + MINUTE);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].aggregate.aggregate.sum, 4.0);
    assert_eq!(rows[0].aggregate.aggregate.max, 4.0);
}

#[test]
fn host_samples_without_values_emit_nothing() {
    let records = vec![
        metric("cpu_user", "h1", "HOST", T0, &[(T0, f64::NAN)]),
        metric("cpu_idle", "h1", "HOST", T0, &[]),
    ];
    assert!(aggregate_host_samples(&records, T0, T0 + MINUTE).is_empty());
}

#[test]
fn host_samples_empty_window() {
    let records = vec![metric("cpu_user", "h1", "HOST", T0, &[(T0, 1.0)])];
    assert!(aggregate_host_samples(&records, T0, T0).is_empty());
    assert!(aggregate_host_samples(&records, T0 + 1, T0).is_empty());
}

#[test]
fn host_samples_one_row_per_series() {
    let records = vec![
        metric("cpu_user", "h2", "HOST", T0, &[(T0, 1.0)]),
        metric("cpu_user", "h1", "HOST", T0, &[(T0, 2.0)]),
        metric("cpu_user", "h1", "HOST", T0 + 10_000, &[(T0 + 10_000, 5.0)]),
    ];
    let rows = aggregate_host_samples(&records, T0, T0 + MINUTE);
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].key.host_name, "h1");
    assert_eq!(rows[0].aggregate.aggregate.sum, 7.0);
    assert_eq!(rows[1].key.host_name, "h2");
}

#[test]
fn hour_fold_uses_running_mean_of_bucket_sums() {
    // Buckets arrive out of order; the fold still runs in time order.
    let minutes = vec![
        host_bucket(T0 + 2 * MINUTE, 30.0, 30.0, 30.0),
        host_bucket(T0, 10.0, 12.0, 1.0),
        host_bucket(T0 + MINUTE, 20.0, 25.0, 5.0),
    ];
    let rows = aggregate_host_buckets(&minutes, T0);
    assert_eq!(rows.len(), 1);
    let agg = rows[0].aggregate.aggregate;
    // (0+10)/2 = 5, (5+20)/2 = 12.5, (12.5+30)/2 = 21.25
    assert_eq!(agg.sum, 21.25);
    assert_eq!(agg.max, 30.0);
    assert_eq!(agg.min, 1.0);
    assert_eq!(rows[0].timestamp, T0);
}

#[test]
fn running_mean_recurrence_is_exact() {
    let hour = [10.0, 20.0, 30.0]
        .iter()
        .map(|&sum| MetricHostAggregate::from_stored(sum, sum, sum))
        .fold(MetricHostAggregate::new(), |acc, bucket| acc.fold_bucket(&bucket));
    assert_eq!(hour.aggregate.sum, (((0.0 + 10.0) / 2.0 + 20.0) / 2.0 + 30.0) / 2.0);
}

#[test]
fn extrema_fold_is_associative() {
    let split = [9.0, 2.0].iter().fold(
        [1.0, 5.0, 3.0]
            .iter()
            .fold(MetricHostAggregate::new(), |acc, &v| acc.fold_sample(v)),
        |acc, &v| acc.fold_sample(v),
    );
    let whole = [1.0, 5.0, 3.0, 9.0, 2.0]
        .iter()
        .fold(MetricHostAggregate::new(), |acc, &v| acc.fold_sample(v));
    assert_eq!(split.aggregate.max, 9.0);
    assert_eq!(split.aggregate.min, 1.0);
    assert_eq!(split, whole);
}

#[test]
fn cluster_host_values_sum_and_count() {
    let agg = MetricClusterAggregate::new()
        .fold_host_value(4.0)
        .fold_host_value(6.0);
    assert_eq!(agg.aggregate.sum, 10.0);
    assert_eq!(agg.number_of_hosts, 2);
    assert_eq!(agg.mean_per_host().unwrap(), 5.0);
}

#[test]
fn hour_fold_of_empty_input_emits_nothing() {
    assert!(aggregate_host_buckets(&[], T0).is_empty());
}

#[test]
fn cluster_slice_counts_distinct_hosts() {
    let records = vec![
        metric(
            "load",
            "h1",
            "HOST",
            T0,
            &[(T0, 2.0), (T0 + 5_000, 4.0), (T0 + 15_000, 1.0)],
        ),
        metric("load", "h2", "HOST", T0, &[(T0 + 1_000, 5.0)]),
    ];
    let rows = aggregate_cluster_slices(&records, T0, T0 + 2 * MINUTE, 15_000);
    assert_eq!(rows.len(), 2);

    let first = &rows[0];
    assert_eq!(first.timestamp, T0);
    assert_eq!(first.aggregate.number_of_hosts, 2);
    // h1 contributes its slice mean 3.0, h2 contributes 5.0
    assert_eq!(first.aggregate.aggregate.sum, 8.0);
    assert_eq!(first.aggregate.aggregate.max, 5.0);
    assert_eq!(first.aggregate.aggregate.min, 3.0);
    assert_eq!(first.aggregate.aggregate.deviation, None);
    assert_eq!(first.aggregate.mean_per_host().unwrap(), 4.0);

    let second = &rows[1];
    assert_eq!(second.timestamp, T0 + 15_000);
    assert_eq!(second.aggregate.number_of_hosts, 1);
    assert_eq!(second.aggregate.aggregate.sum, 1.0);
}

#[test]
fn cluster_slice_ignores_host_dimension_in_key() {
    let records = vec![
        metric("load", "h1", "HOST", T0, &[(T0, 1.0)]),
        metric("load", "h2", "HOST", T0, &[(T0, 3.0)]),
    ];
    let rows = aggregate_cluster_slices(&records, T0, T0 + MINUTE, 15_000);
    assert_eq!(rows.len(), 1);
    assert_eq!(
        rows[0].key,
        ClusterMetricKey {
            metric_name: "load".into(),
            app_id: "HOST".into(),
            instance_id: None,
        }
    );
}

#[test]
fn cluster_hour_merge_adds_sums_and_hosts() {
    let key = ClusterMetricKey {
        metric_name: "load".into(),
        app_id: "HOST".into(),
        instance_id: None,
    };
    let minutes = vec![
        ClusterAggregateRow {
            key: key.clone(),
            unit_type: "float".into(),
            timestamp: T0,
            aggregate: MetricClusterAggregate::from_stored(8.0, 2, 5.0, 3.0),
        },
        ClusterAggregateRow {
            key: key.clone(),
            unit_type: "float".into(),
            timestamp: T0 + 15_000,
            aggregate: MetricClusterAggregate::from_stored(1.0, 1, 1.0, 1.0),
        },
    ];
    let rows = aggregate_cluster_buckets(&minutes, T0);
    assert_eq!(rows.len(), 1);
    let agg = rows[0].aggregate;
    assert_eq!(agg.aggregate.sum, 9.0);
    assert_eq!(agg.number_of_hosts, 3);
    assert_eq!(agg.aggregate.max, 5.0);
    assert_eq!(agg.aggregate.min, 1.0);
    assert_eq!(agg.mean_per_host().unwrap(), 3.0);
}

#[test]
fn zero_host_mean_is_an_error() {
    let agg = MetricClusterAggregate::from_stored(10.0, 0, 5.0, 1.0);
    assert!(matches!(agg.mean_per_host(), Err(StoreError::ZeroHostCount)));
}
