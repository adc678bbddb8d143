// Domain models: timeline metrics, series keys, and running aggregates

mod aggregate;
mod metric;

pub use aggregate::{MetricAggregate, MetricClusterAggregate, MetricHostAggregate};
pub use metric::{
    ClusterAggregateRow, ClusterMetricKey, HostAggregateRow, HostMetricKey, TimelineMetric,
    TimelineMetrics,
};
