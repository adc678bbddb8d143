// Cluster rollups: raw samples across hosts -> cluster minute slices,
// cluster minute -> cluster hour.

use std::sync::Arc;

use tracing::debug;

use super::{aggregate_cluster_buckets, aggregate_cluster_slices};
use crate::scheduler::AggregationStrategy;
use crate::store::{Granularity, MetricStore, WriteReport};

pub struct ClusterAggregator {
    store: Arc<MetricStore>,
    granularity: Granularity,
    time_slice_ms: i64,
}

impl ClusterAggregator {
    /// Folds raw samples across hosts into `cluster_aggregate_minute`, one row per slice.
    pub fn minute(store: Arc<MetricStore>, time_slice_ms: u64) -> Self {
        Self {
            store,
            granularity: Granularity::Minutes,
            time_slice_ms: i64::try_from(time_slice_ms).unwrap_or(i64::MAX),
        }
    }

    /// Merges cluster minute rows into `cluster_aggregate_hour`.
    pub fn hourly(store: Arc<MetricStore>) -> Self {
        Self {
            store,
            granularity: Granularity::Hours,
            time_slice_ms: 0,
        }
    }
}

impl AggregationStrategy for ClusterAggregator {
    fn name(&self) -> &'static str {
        match self.granularity {
            Granularity::Minutes => "cluster_minute",
            Granularity::Hours => "cluster_hour",
        }
    }

    async fn aggregate_window(&self, start_time: i64, end_time: i64) -> anyhow::Result<WriteReport> {
        let rows = match self.granularity {
            Granularity::Minutes => {
                let lookback = start_time - (end_time - start_time);
                let records = self
                    .store
                    .get_raw_records_in_window(lookback, end_time)
                    .await?;
                aggregate_cluster_slices(&records, start_time, end_time, self.time_slice_ms)
            }
            Granularity::Hours => {
                let minutes = self
                    .store
                    .get_cluster_aggregates_in_window(Granularity::Minutes, start_time, end_time)
                    .await?;
                aggregate_cluster_buckets(&minutes, start_time)
            }
        };

        let report = self
            .store
            .save_cluster_aggregate_records(self.granularity, &rows)
            .await?;
        debug!(
            aggregator = self.name(),
            start_time,
            end_time,
            rows_written = report.rows_written,
            rows_failed = report.rows_failed,
            "cluster aggregation window saved"
        );
        Ok(report)
    }
}
