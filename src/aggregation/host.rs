// Host rollups: raw samples -> host minute, host minute -> host hour.

use std::sync::Arc;

use tracing::debug;

use super::{aggregate_host_buckets, aggregate_host_samples};
use crate::scheduler::AggregationStrategy;
use crate::store::{Granularity, MetricStore, WriteReport};

pub struct HostAggregator {
    store: Arc<MetricStore>,
    granularity: Granularity,
}

impl HostAggregator {
    /// Folds raw samples into `host_aggregate_minute`.
    pub fn minute(store: Arc<MetricStore>) -> Self {
        Self {
            store,
            granularity: Granularity::Minutes,
        }
    }

    /// Folds minute rows into `host_aggregate_hour`.
    pub fn hourly(store: Arc<MetricStore>) -> Self {
        Self {
            store,
            granularity: Granularity::Hours,
        }
    }
}

impl AggregationStrategy for HostAggregator {
    fn name(&self) -> &'static str {
        match self.granularity {
            Granularity::Minutes => "host_minute",
            Granularity::Hours => "host_hour",
        }
    }

    async fn aggregate_window(&self, start_time: i64, end_time: i64) -> anyhow::Result<WriteReport> {
        let rows = match self.granularity {
            Granularity::Minutes => {
                // Records that started one window back may still carry samples for this one.
                let lookback = start_time - (end_time - start_time);
                let records = self
                    .store
                    .get_raw_records_in_window(lookback, end_time)
                    .await?;
                aggregate_host_samples(&records, start_time, end_time)
            }
            Granularity::Hours => {
                let minutes = self
                    .store
                    .get_host_aggregates_in_window(Granularity::Minutes, start_time, end_time)
                    .await?;
                aggregate_host_buckets(&minutes, start_time)
            }
        };

        let report = self
            .store
            .save_host_aggregate_records(self.granularity, &rows)
            .await?;
        debug!(
            aggregator = self.name(),
            start_time,
            end_time,
            rows_written = report.rows_written,
            rows_failed = report.rows_failed,
            "host aggregation window saved"
        );
        Ok(report)
    }
}
