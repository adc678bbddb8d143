// Schema bootstrap: the raw record table, four aggregate tables, and the catalog that
// records each table's TTL, value encoding and compression.

use sqlx::SqliteConnection;

use crate::config::{StoreConfig, TtlConfig};

/// Every table the store manages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricTable {
    Record,
    HostMinute,
    HostHour,
    ClusterMinute,
    ClusterHour,
}

impl MetricTable {
    pub const ALL: [MetricTable; 5] = [
        MetricTable::Record,
        MetricTable::HostMinute,
        MetricTable::HostHour,
        MetricTable::ClusterMinute,
        MetricTable::ClusterHour,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Record => "metric_record",
            Self::HostMinute => "host_aggregate_minute",
            Self::HostHour => "host_aggregate_hour",
            Self::ClusterMinute => "cluster_aggregate_minute",
            Self::ClusterHour => "cluster_aggregate_hour",
        }
    }

    pub fn ttl_secs(self, ttl: &TtlConfig) -> u64 {
        match self {
            Self::Record => ttl.precision_secs,
            Self::HostMinute => ttl.host_minute_secs,
            Self::HostHour => ttl.host_hour_secs,
            Self::ClusterMinute => ttl.cluster_minute_secs,
            Self::ClusterHour => ttl.cluster_hour_secs,
        }
    }

    fn create_sql(self) -> String {
        match self {
            Self::Record => format!(
                r#"
                CREATE TABLE IF NOT EXISTS {} (
                    metric_name TEXT NOT NULL,
                    hostname TEXT NOT NULL,
                    app_id TEXT NOT NULL,
                    instance_id TEXT NOT NULL DEFAULT '',
                    server_time INTEGER NOT NULL,
                    start_time INTEGER NOT NULL,
                    units TEXT NOT NULL DEFAULT '',
                    metric_max REAL NOT NULL,
                    metric_min REAL NOT NULL,
                    metric_avg REAL NOT NULL,
                    metric_values BLOB NOT NULL,
                    PRIMARY KEY (metric_name, hostname, app_id, instance_id, start_time)
                )
                "#,
                self.name()
            ),
            Self::HostMinute | Self::HostHour => format!(
                r#"
                CREATE TABLE IF NOT EXISTS {} (
                    metric_name TEXT NOT NULL,
                    hostname TEXT NOT NULL,
                    app_id TEXT NOT NULL,
                    instance_id TEXT NOT NULL DEFAULT '',
                    server_time INTEGER NOT NULL,
                    units TEXT NOT NULL DEFAULT '',
                    metric_sum REAL NOT NULL,
                    metric_max REAL NOT NULL,
                    metric_min REAL NOT NULL,
                    PRIMARY KEY (metric_name, hostname, app_id, instance_id, server_time)
                )
                "#,
                self.name()
            ),
            Self::ClusterMinute | Self::ClusterHour => format!(
                r#"
                CREATE TABLE IF NOT EXISTS {} (
                    metric_name TEXT NOT NULL,
                    app_id TEXT NOT NULL,
                    instance_id TEXT NOT NULL DEFAULT '',
                    server_time INTEGER NOT NULL,
                    units TEXT NOT NULL DEFAULT '',
                    metric_sum REAL NOT NULL,
                    hosts_count INTEGER NOT NULL,
                    metric_max REAL NOT NULL,
                    metric_min REAL NOT NULL,
                    PRIMARY KEY (metric_name, app_id, instance_id, server_time)
                )
                "#,
                self.name()
            ),
        }
    }

    /// Time column used for window reads and TTL pruning.
    fn time_index_sql(self) -> String {
        let column = match self {
            Self::Record => "start_time",
            _ => "server_time",
        };
        format!(
            "CREATE INDEX IF NOT EXISTS idx_{table}_{column} ON {table}({column})",
            table = self.name(),
            column = column
        )
    }
}

/// Creates every table, its time index, and the catalog entry. Safe to rerun.
pub(super) async fn create_tables(
    conn: &mut SqliteConnection,
    config: &StoreConfig,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS metric_schema (
            table_name TEXT PRIMARY KEY,
            ttl_secs INTEGER NOT NULL,
            encoding TEXT NOT NULL,
            compression TEXT NOT NULL
        )
        "#,
    )
    .execute(&mut *conn)
    .await?;

    for table in MetricTable::ALL {
        sqlx::query(&table.create_sql()).execute(&mut *conn).await?;
        sqlx::query(&table.time_index_sql())
            .execute(&mut *conn)
            .await?;
        sqlx::query(
            "INSERT OR REPLACE INTO metric_schema (table_name, ttl_secs, encoding, compression) VALUES ($1, $2, $3, $4)",
        )
        .bind(table.name())
        .bind(table.ttl_secs(&config.ttl) as i64)
        .bind(config.value_encoding.as_str())
        .bind(&config.compression)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}
