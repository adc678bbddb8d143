// Metric store: facade over SQLite for raw records and the four aggregate tables.
// Every logical operation acquires its own pooled connection and returns it on drop,
// and runs under the configured operation timeout.

mod batch;
mod blob;
mod condition;
mod schema;

pub use batch::{MAX_MUTATION_STATE_SIZE, RowFailurePolicy, WriteReport};
pub use blob::ValueEncoding;
pub use condition::Condition;
pub use schema::MetricTable;

use std::future::Future;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use futures_util::TryStreamExt;
use serde::Deserialize;
use sqlx::query::Query;
use sqlx::sqlite::{
    Sqlite, SqliteArguments, SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow,
};
use sqlx::{QueryBuilder, Row};
use tracing::{debug, info, instrument, warn};

use crate::config::StoreConfig;
use crate::error::StoreError;
use crate::models::{
    ClusterAggregateRow, ClusterMetricKey, HostAggregateRow, HostMetricKey,
    MetricClusterAggregate, MetricHostAggregate, TimelineMetric, TimelineMetrics,
};
use batch::UpsertRow;

/// Aggregate resolution: selects between the minute and hour tables.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Granularity {
    #[default]
    Minutes,
    Hours,
}

impl Granularity {
    pub fn host_table(self) -> MetricTable {
        match self {
            Self::Minutes => MetricTable::HostMinute,
            Self::Hours => MetricTable::HostHour,
        }
    }

    pub fn cluster_table(self) -> MetricTable {
        match self {
            Self::Minutes => MetricTable::ClusterMinute,
            Self::Hours => MetricTable::ClusterHour,
        }
    }
}

const UPSERT_RECORD_SQL: &str = "INSERT OR REPLACE INTO metric_record (metric_name, hostname, app_id, instance_id, server_time, start_time, units, metric_max, metric_min, metric_avg, metric_values) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)";

fn upsert_host_aggregate_sql(table: MetricTable) -> String {
    format!(
        "INSERT OR REPLACE INTO {} (metric_name, hostname, app_id, instance_id, server_time, units, metric_sum, metric_max, metric_min) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        table.name()
    )
}

fn upsert_cluster_aggregate_sql(table: MetricTable) -> String {
    format!(
        "INSERT OR REPLACE INTO {} (metric_name, app_id, instance_id, server_time, units, metric_sum, hosts_count, metric_max, metric_min) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        table.name()
    )
}

/// Raw record prepared for insert: summary columns and the encoded values blob.
struct RecordRow<'a> {
    metric: &'a TimelineMetric,
    server_time: i64,
    max: f64,
    min: f64,
    avg: f64,
    values: Vec<u8>,
}

impl UpsertRow for RecordRow<'_> {
    fn bind<'q>(
        &'q self,
        query: Query<'q, Sqlite, SqliteArguments<'q>>,
    ) -> Query<'q, Sqlite, SqliteArguments<'q>> {
        query
            .bind(self.metric.metric_name.as_str())
            .bind(self.metric.host_name.as_str())
            .bind(self.metric.app_id.as_str())
            .bind(self.metric.instance_id.as_deref().unwrap_or(""))
            .bind(self.server_time)
            .bind(self.metric.start_time)
            .bind(self.metric.unit_type.as_str())
            .bind(self.max)
            .bind(self.min)
            .bind(self.avg)
            .bind(self.values.as_slice())
    }
}

impl UpsertRow for HostAggregateRow {
    fn bind<'q>(
        &'q self,
        query: Query<'q, Sqlite, SqliteArguments<'q>>,
    ) -> Query<'q, Sqlite, SqliteArguments<'q>> {
        query
            .bind(self.key.metric_name.as_str())
            .bind(self.key.host_name.as_str())
            .bind(self.key.app_id.as_str())
            .bind(self.key.instance_id.as_deref().unwrap_or(""))
            .bind(self.timestamp)
            .bind(self.unit_type.as_str())
            .bind(self.aggregate.aggregate.sum)
            .bind(self.aggregate.aggregate.max)
            .bind(self.aggregate.aggregate.min)
    }
}

impl UpsertRow for ClusterAggregateRow {
    fn bind<'q>(
        &'q self,
        query: Query<'q, Sqlite, SqliteArguments<'q>>,
    ) -> Query<'q, Sqlite, SqliteArguments<'q>> {
        query
            .bind(self.key.metric_name.as_str())
            .bind(self.key.app_id.as_str())
            .bind(self.key.instance_id.as_deref().unwrap_or(""))
            .bind(self.timestamp)
            .bind(self.unit_type.as_str())
            .bind(self.aggregate.aggregate.sum)
            .bind(i64::from(self.aggregate.number_of_hosts))
            .bind(self.aggregate.aggregate.max)
            .bind(self.aggregate.aggregate.min)
    }
}

pub struct MetricStore {
    pool: SqlitePool,
    config: StoreConfig,
}

impl MetricStore {
    /// Connect to SQLite at `config.path`, creating the parent dir and DB if missing.
    pub async fn connect(config: &StoreConfig) -> anyhow::Result<Self> {
        anyhow::ensure!(!config.path.is_empty(), "store path must be non-empty");
        if let Some(parent) = Path::new(&config.path).parent() {
            std::fs::create_dir_all(parent)?;
        }
        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}", config.path))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5))
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);
        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_pool_size)
            .connect_with(opts)
            .await?;
        Ok(Self {
            pool,
            config: config.clone(),
        })
    }

    async fn timed<T, F>(&self, operation: &'static str, fut: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        let timeout_ms = self.config.operation_timeout_ms;
        tokio::time::timeout(Duration::from_millis(timeout_ms), fut)
            .await
            .map_err(|_| StoreError::Timeout {
                operation,
                timeout_ms,
            })?
    }

    /// Create the record table, the four aggregate tables and the schema catalog.
    /// Existing tables are left as they are.
    #[instrument(skip(self), fields(store = "metrics", operation = "init_schema"))]
    pub async fn init_schema(&self) -> Result<(), StoreError> {
        self.timed("init_schema", async {
            let mut conn = self.pool.acquire().await?;
            info!("initializing metrics schema");
            schema::create_tables(&mut conn, &self.config).await?;
            Ok(())
        })
        .await
    }

    /// Insert raw records with their (max, min, avg) summary. `server_time` is now.
    #[instrument(skip(self, metrics), fields(store = "metrics", operation = "insert_metric_records", metrics_count = metrics.metrics.len()))]
    pub async fn insert_metric_records(
        &self,
        metrics: &TimelineMetrics,
    ) -> Result<WriteReport, StoreError> {
        if metrics.is_empty() {
            debug!("empty metrics insert request");
            return Ok(WriteReport::default());
        }
        let server_time = now_ms();
        let mut encode_failures = 0usize;
        let mut rows = Vec::with_capacity(metrics.metrics.len());
        for metric in &metrics.metrics {
            match blob::encode_values(self.config.value_encoding, &metric.metric_values) {
                Ok(values) => {
                    let (max, min, avg) = metric.summary();
                    rows.push(RecordRow {
                        metric,
                        server_time,
                        max,
                        min,
                        avg,
                        values,
                    });
                }
                Err(e) => {
                    warn!(error = %e, metric = %metric.metric_name, "metric values encode failed, skipping");
                    encode_failures += 1;
                }
            }
        }

        let table = MetricTable::Record.name();
        let mut report = self
            .timed("insert_metric_records", async {
                let mut conn = self.pool.acquire().await?;
                batch::upsert_batched(
                    &mut conn,
                    table,
                    UPSERT_RECORD_SQL,
                    &rows,
                    self.config.mutation_ceiling,
                )
                .await
            })
            .await?;
        report.rows_failed += encode_failures;
        self.config.row_failure_policy.check(table, report)
    }

    #[instrument(skip(self, rows), fields(store = "metrics", operation = "save_host_aggregate_records", rows_count = rows.len()))]
    pub async fn save_host_aggregate_records(
        &self,
        granularity: Granularity,
        rows: &[HostAggregateRow],
    ) -> Result<WriteReport, StoreError> {
        if rows.is_empty() {
            debug!("empty host aggregate records");
            return Ok(WriteReport::default());
        }
        let table = granularity.host_table();
        let sql = upsert_host_aggregate_sql(table);
        self.save_batched("save_host_aggregate_records", table, &sql, rows)
            .await
    }

    #[instrument(skip(self, rows), fields(store = "metrics", operation = "save_cluster_aggregate_records", rows_count = rows.len()))]
    pub async fn save_cluster_aggregate_records(
        &self,
        granularity: Granularity,
        rows: &[ClusterAggregateRow],
    ) -> Result<WriteReport, StoreError> {
        if rows.is_empty() {
            debug!("empty cluster aggregate records");
            return Ok(WriteReport::default());
        }
        let table = granularity.cluster_table();
        let sql = upsert_cluster_aggregate_sql(table);
        self.save_batched("save_cluster_aggregate_records", table, &sql, rows)
            .await
    }

    async fn save_batched<R: UpsertRow>(
        &self,
        operation: &'static str,
        table: MetricTable,
        sql: &str,
        rows: &[R],
    ) -> Result<WriteReport, StoreError> {
        let started = std::time::Instant::now();
        let report = self
            .timed(operation, async {
                let mut conn = self.pool.acquire().await?;
                batch::upsert_batched(
                    &mut conn,
                    table.name(),
                    sql,
                    rows,
                    self.config.mutation_ceiling,
                )
                .await
            })
            .await?;
        let elapsed = started.elapsed();
        if elapsed > Duration::from_secs(60) {
            info!(
                table = table.name(),
                elapsed_ms = elapsed.as_millis() as u64,
                "slow aggregate save"
            );
        }
        self.config.row_failure_policy.check(table.name(), report)
    }

    /// Raw record query. Rejects an empty condition; no match is an empty result.
    #[instrument(skip(self), fields(store = "metrics", operation = "get_metric_records"))]
    pub async fn get_metric_records(
        &self,
        condition: &Condition,
    ) -> Result<TimelineMetrics, StoreError> {
        if condition.is_empty() {
            return Err(StoreError::EmptyCondition);
        }
        self.timed("get_metric_records", async {
            let mut conn = self.pool.acquire().await?;
            let mut qb = QueryBuilder::<Sqlite>::new(
                "SELECT metric_name, hostname, app_id, instance_id, server_time, start_time, units, metric_values FROM metric_record",
            );
            condition.push_where(&mut qb, "start_time", true);
            qb.push(" ORDER BY metric_name, hostname, app_id, instance_id, start_time LIMIT ")
                .push_bind(condition.row_limit(self.config.result_fetch_size));

            let mut metrics = TimelineMetrics::default();
            let mut rows = qb.build().fetch(&mut *conn);
            while let Some(row) = rows.try_next().await? {
                let metric = match parse_record_row(&row) {
                    Ok(m) => m,
                    Err(StoreError::Codec(e)) => {
                        warn!(error = %e, "undecodable metric values, skipping row");
                        continue;
                    }
                    Err(e) => return Err(e),
                };
                if condition.grouped {
                    metrics.add_or_merge(metric);
                } else {
                    metrics.metrics.push(metric);
                }
            }
            Ok(metrics)
        })
        .await
    }

    /// Cluster aggregate query. Each value is the per-host mean `sum / hosts_count`.
    #[instrument(skip(self), fields(store = "metrics", operation = "get_cluster_aggregate_records"))]
    pub async fn get_cluster_aggregate_records(
        &self,
        condition: &Condition,
        granularity: Granularity,
    ) -> Result<TimelineMetrics, StoreError> {
        if condition.is_empty_for_cluster() {
            return Err(StoreError::EmptyCondition);
        }
        let table = granularity.cluster_table();
        let metrics = self
            .timed("get_cluster_aggregate_records", async {
                let mut conn = self.pool.acquire().await?;
                let mut qb = QueryBuilder::<Sqlite>::new(format!(
                    "SELECT metric_name, app_id, instance_id, server_time, units, metric_sum, hosts_count, metric_max, metric_min FROM {}",
                    table.name()
                ));
                condition.push_where(&mut qb, "server_time", false);
                qb.push(" ORDER BY metric_name, app_id, instance_id, server_time LIMIT ")
                    .push_bind(condition.row_limit(self.config.result_fetch_size));

                let mut metrics = TimelineMetrics::default();
                let mut rows = qb.build().fetch(&mut *conn);
                while let Some(row) = rows.try_next().await? {
                    let agg = parse_cluster_row(&row)?;
                    let mean = agg.aggregate.mean_per_host()?;
                    let metric = TimelineMetric {
                        metric_name: agg.key.metric_name,
                        app_id: agg.key.app_id,
                        instance_id: agg.key.instance_id,
                        host_name: String::new(),
                        unit_type: agg.unit_type,
                        timestamp: agg.timestamp,
                        start_time: agg.timestamp,
                        metric_values: [(agg.timestamp, mean)].into(),
                    };
                    if condition.grouped {
                        metrics.add_or_merge(metric);
                    } else {
                        metrics.metrics.push(metric);
                    }
                }
                Ok(metrics)
            })
            .await?;
        info!(
            records = metrics.metrics.len(),
            table = table.name(),
            "aggregate records fetched"
        );
        Ok(metrics)
    }

    /// Raw records with start_time in [from_ts, to_ts), grouped by series then time.
    #[instrument(skip(self), fields(store = "metrics", operation = "get_raw_records_in_window"))]
    pub async fn get_raw_records_in_window(
        &self,
        from_ts: i64,
        to_ts: i64,
    ) -> Result<Vec<TimelineMetric>, StoreError> {
        self.timed("get_raw_records_in_window", async {
            let mut conn = self.pool.acquire().await?;
            let rows = sqlx::query(
                "SELECT metric_name, hostname, app_id, instance_id, server_time, start_time, units, metric_values
                 FROM metric_record WHERE start_time >= $1 AND start_time < $2
                 ORDER BY metric_name, hostname, app_id, instance_id, start_time",
            )
            .bind(from_ts)
            .bind(to_ts)
            .fetch_all(&mut *conn)
            .await?;

            let mut out = Vec::with_capacity(rows.len());
            for row in rows {
                match parse_record_row(&row) {
                    Ok(m) => out.push(m),
                    Err(StoreError::Codec(e)) => {
                        warn!(error = %e, "undecodable metric values, skipping row");
                    }
                    Err(e) => return Err(e),
                }
            }
            Ok(out)
        })
        .await
    }

    /// Host aggregates with server_time in [from_ts, to_ts), grouped by series then time.
    #[instrument(skip(self), fields(store = "metrics", operation = "get_host_aggregates_in_window"))]
    pub async fn get_host_aggregates_in_window(
        &self,
        granularity: Granularity,
        from_ts: i64,
        to_ts: i64,
    ) -> Result<Vec<HostAggregateRow>, StoreError> {
        let table = granularity.host_table();
        self.timed("get_host_aggregates_in_window", async {
            let mut conn = self.pool.acquire().await?;
            let sql = format!(
                "SELECT metric_name, hostname, app_id, instance_id, server_time, units, metric_sum, metric_max, metric_min
                 FROM {} WHERE server_time >= $1 AND server_time < $2
                 ORDER BY metric_name, hostname, app_id, instance_id, server_time",
                table.name()
            );
            let rows = sqlx::query(&sql)
                .bind(from_ts)
                .bind(to_ts)
                .fetch_all(&mut *conn)
                .await?;
            rows.iter().map(parse_host_row).collect()
        })
        .await
    }

    /// Cluster aggregates with server_time in [from_ts, to_ts), grouped by series then time.
    #[instrument(skip(self), fields(store = "metrics", operation = "get_cluster_aggregates_in_window"))]
    pub async fn get_cluster_aggregates_in_window(
        &self,
        granularity: Granularity,
        from_ts: i64,
        to_ts: i64,
    ) -> Result<Vec<ClusterAggregateRow>, StoreError> {
        let table = granularity.cluster_table();
        self.timed("get_cluster_aggregates_in_window", async {
            let mut conn = self.pool.acquire().await?;
            let sql = format!(
                "SELECT metric_name, app_id, instance_id, server_time, units, metric_sum, hosts_count, metric_max, metric_min
                 FROM {} WHERE server_time >= $1 AND server_time < $2
                 ORDER BY metric_name, app_id, instance_id, server_time",
                table.name()
            );
            let rows = sqlx::query(&sql)
                .bind(from_ts)
                .bind(to_ts)
                .fetch_all(&mut *conn)
                .await?;
            rows.iter().map(parse_cluster_row).collect()
        })
        .await
    }

    /// Delete rows older than each table's TTL. Returns rows removed.
    #[instrument(skip(self), fields(store = "metrics", operation = "prune_expired"))]
    pub async fn prune_expired(&self, now_ms: i64) -> Result<u64, StoreError> {
        self.timed("prune_expired", async {
            let mut conn = self.pool.acquire().await?;
            let mut removed = 0u64;
            for table in MetricTable::ALL {
                let column = match table {
                    MetricTable::Record => "start_time",
                    _ => "server_time",
                };
                let ttl_ms = (table.ttl_secs(&self.config.ttl) as i64).saturating_mul(1000);
                let cutoff = now_ms.saturating_sub(ttl_ms);
                let r = sqlx::query(&format!(
                    "DELETE FROM {} WHERE {} < $1",
                    table.name(),
                    column
                ))
                .bind(cutoff)
                .execute(&mut *conn)
                .await?;
                removed += r.rows_affected();
            }
            Ok(removed)
        })
        .await
    }

    /// Reclaim space after deletes (run periodically after pruning).
    #[instrument(skip(self), fields(store = "metrics", operation = "vacuum"))]
    pub async fn vacuum(&self) -> Result<(), StoreError> {
        self.timed("vacuum", async {
            let mut conn = self.pool.acquire().await?;
            sqlx::query("VACUUM").execute(&mut *conn).await?;
            Ok(())
        })
        .await
    }

    /// Row count of one table (inspection and tests).
    pub async fn count_rows(&self, table: MetricTable) -> Result<i64, StoreError> {
        self.timed("count_rows", async {
            let mut conn = self.pool.acquire().await?;
            let n = sqlx::query_scalar::<_, i64>(&format!("SELECT COUNT(*) FROM {}", table.name()))
                .fetch_one(&mut *conn)
                .await?;
            Ok(n)
        })
        .await
    }
}

pub(crate) fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// '' is how a missing instance id is stored (it is part of the primary key).
fn instance_from_column(value: String) -> Option<String> {
    if value.is_empty() { None } else { Some(value) }
}

fn parse_record_row(row: &SqliteRow) -> Result<TimelineMetric, StoreError> {
    let values: Vec<u8> = row.try_get("metric_values")?;
    Ok(TimelineMetric {
        metric_name: row.try_get("metric_name")?,
        host_name: row.try_get("hostname")?,
        app_id: row.try_get("app_id")?,
        instance_id: instance_from_column(row.try_get("instance_id")?),
        timestamp: row.try_get("server_time")?,
        start_time: row.try_get("start_time")?,
        unit_type: row.try_get("units")?,
        metric_values: blob::decode_values(&values)?,
    })
}

fn parse_host_row(row: &SqliteRow) -> Result<HostAggregateRow, StoreError> {
    Ok(HostAggregateRow {
        key: HostMetricKey {
            metric_name: row.try_get("metric_name")?,
            host_name: row.try_get("hostname")?,
            app_id: row.try_get("app_id")?,
            instance_id: instance_from_column(row.try_get("instance_id")?),
        },
        unit_type: row.try_get("units")?,
        timestamp: row.try_get("server_time")?,
        aggregate: MetricHostAggregate::from_stored(
            row.try_get("metric_sum")?,
            row.try_get("metric_max")?,
            row.try_get("metric_min")?,
        ),
    })
}

fn parse_cluster_row(row: &SqliteRow) -> Result<ClusterAggregateRow, StoreError> {
    let hosts_count: i64 = row.try_get("hosts_count")?;
    Ok(ClusterAggregateRow {
        key: ClusterMetricKey {
            metric_name: row.try_get("metric_name")?,
            app_id: row.try_get("app_id")?,
            instance_id: instance_from_column(row.try_get("instance_id")?),
        },
        unit_type: row.try_get("units")?,
        timestamp: row.try_get("server_time")?,
        aggregate: MetricClusterAggregate::from_stored(
            row.try_get("metric_sum")?,
            u32::try_from(hosts_count).map_err(|_| {
                StoreError::Codec(format!("hosts_count out of range: {}", hosts_count))
            })?,
            row.try_get("metric_max")?,
            row.try_get("metric_min")?,
        ),
    })
}
