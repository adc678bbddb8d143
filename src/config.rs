use std::str::FromStr;

use serde::Deserialize;

use crate::store::{RowFailurePolicy, ValueEncoding};

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub store: StoreConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
    #[serde(default)]
    pub aggregators: AggregatorsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    pub path: String,
    pub max_pool_size: u32,
    /// Upper bound on any single store operation; expiry is a soft failure.
    #[serde(default = "default_operation_timeout_ms")]
    pub operation_timeout_ms: u64,
    /// Row limit for non-grouped queries without an explicit limit.
    #[serde(default = "default_result_fetch_size")]
    pub result_fetch_size: usize,
    /// Pending writes per transaction before a forced intermediate commit.
    #[serde(default = "default_mutation_ceiling")]
    pub mutation_ceiling: usize,
    #[serde(default)]
    pub row_failure_policy: RowFailurePolicy,
    #[serde(default)]
    pub value_encoding: ValueEncoding,
    /// Recorded in the schema catalog; the SQLite backend stores pages uncompressed.
    #[serde(default = "default_compression")]
    pub compression: String,
    #[serde(default)]
    pub ttl: TtlConfig,
}

fn default_operation_timeout_ms() -> u64 {
    30_000
}

/// 4 metrics/min * 60 * 24: one day of data.
fn default_result_fetch_size() -> usize {
    5760
}

fn default_mutation_ceiling() -> usize {
    crate::store::MAX_MUTATION_STATE_SIZE
}

fn default_compression() -> String {
    "NONE".into()
}

/// Per-table retention in seconds.
#[derive(Debug, Clone, Deserialize)]
pub struct TtlConfig {
    #[serde(default = "default_precision_ttl")]
    pub precision_secs: u64,
    #[serde(default = "default_host_minute_ttl")]
    pub host_minute_secs: u64,
    #[serde(default = "default_host_hour_ttl")]
    pub host_hour_secs: u64,
    #[serde(default = "default_cluster_minute_ttl")]
    pub cluster_minute_secs: u64,
    #[serde(default = "default_cluster_hour_ttl")]
    pub cluster_hour_secs: u64,
}

fn default_precision_ttl() -> u64 {
    86_400
}
fn default_host_minute_ttl() -> u64 {
    604_800
}
fn default_host_hour_ttl() -> u64 {
    2_592_000
}
fn default_cluster_minute_ttl() -> u64 {
    2_592_000
}
fn default_cluster_hour_ttl() -> u64 {
    31_536_000
}

impl Default for TtlConfig {
    fn default() -> Self {
        Self {
            precision_secs: default_precision_ttl(),
            host_minute_secs: default_host_minute_ttl(),
            host_hour_secs: default_host_hour_ttl(),
            cluster_minute_secs: default_cluster_minute_ttl(),
            cluster_hour_secs: default_cluster_hour_ttl(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetentionConfig {
    /// How often expired rows are deleted (real seconds).
    #[serde(default = "default_prune_interval_secs")]
    pub prune_interval_secs: u64,
    /// Optional cron expression for VACUUM (e.g. "0 0 3 * * *"). Uses local time.
    #[serde(default)]
    pub vacuum_schedule: Option<String>,
    /// Run VACUUM every N seconds when vacuum_schedule is not set.
    #[serde(default = "default_vacuum_interval_secs")]
    pub vacuum_interval_secs: u64,
}

fn default_prune_interval_secs() -> u64 {
    3600
}

fn default_vacuum_interval_secs() -> u64 {
    86_400
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            prune_interval_secs: default_prune_interval_secs(),
            vacuum_schedule: None,
            vacuum_interval_secs: default_vacuum_interval_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AggregatorsConfig {
    #[serde(default = "default_checkpoint_dir")]
    pub checkpoint_dir: String,
    /// First-run checkpoint is placed this far in the past so producers can catch up.
    #[serde(default = "default_checkpoint_delay_ms")]
    pub checkpoint_delay_ms: u64,
    #[serde(default = "AggregatorConfig::host_minute")]
    pub host_minute: AggregatorConfig,
    #[serde(default = "AggregatorConfig::host_hour")]
    pub host_hour: AggregatorConfig,
    #[serde(default = "AggregatorConfig::cluster_minute")]
    pub cluster_minute: AggregatorConfig,
    #[serde(default = "AggregatorConfig::cluster_hour")]
    pub cluster_hour: AggregatorConfig,
}

fn default_checkpoint_dir() -> String {
    "data/checkpoints".into()
}

fn default_checkpoint_delay_ms() -> u64 {
    120_000
}

impl Default for AggregatorsConfig {
    fn default() -> Self {
        Self {
            checkpoint_dir: default_checkpoint_dir(),
            checkpoint_delay_ms: default_checkpoint_delay_ms(),
            host_minute: AggregatorConfig::host_minute(),
            host_hour: AggregatorConfig::host_hour(),
            cluster_minute: AggregatorConfig::cluster_minute(),
            cluster_hour: AggregatorConfig::cluster_hour(),
        }
    }
}

/// One scheduled aggregator. The preset applies only when the whole table is omitted;
/// a table given in the config file must set interval, multiplier and checkpoint file.
#[derive(Debug, Clone, Deserialize)]
pub struct AggregatorConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub sleep_interval_ms: u64,
    pub checkpoint_cutoff_multiplier: u32,
    pub checkpoint_file: String,
    /// Cluster minute only: width of the timestamp slices hosts are grouped into.
    #[serde(default = "default_time_slice_ms")]
    pub time_slice_ms: u64,
}

fn default_enabled() -> bool {
    true
}

fn default_time_slice_ms() -> u64 {
    15_000
}

impl AggregatorConfig {
    fn preset(sleep_interval_ms: u64, multiplier: u32, checkpoint_file: &str) -> Self {
        Self {
            enabled: true,
            sleep_interval_ms,
            checkpoint_cutoff_multiplier: multiplier,
            checkpoint_file: checkpoint_file.into(),
            time_slice_ms: default_time_slice_ms(),
        }
    }

    pub fn host_minute() -> Self {
        Self::preset(300_000, 3, "timeline-metrics-host-aggregator-checkpoint")
    }

    pub fn host_hour() -> Self {
        Self::preset(
            3_600_000,
            2,
            "timeline-metrics-host-aggregator-hourly-checkpoint",
        )
    }

    pub fn cluster_minute() -> Self {
        Self::preset(120_000, 2, "timeline-metrics-cluster-aggregator-checkpoint")
    }

    pub fn cluster_hour() -> Self {
        Self::preset(
            3_600_000,
            2,
            "timeline-metrics-cluster-aggregator-hourly-checkpoint",
        )
    }
}

impl AppConfig {
    pub fn load() -> anyhow::Result<Self> {
        let path = std::env::var("CONFIG_FILE").unwrap_or_else(|_| "config.toml".into());
        let s = std::fs::read_to_string(&path)?;
        Self::load_from_str(&s)
    }

    /// Parse and validate config from a string (e.g. for tests).
    pub fn load_from_str(s: &str) -> anyhow::Result<Self> {
        let config: AppConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.server.port > 0,
            "server.port must be between 1 and 65535, got {}",
            self.server.port
        );
        anyhow::ensure!(!self.store.path.is_empty(), "store.path must be non-empty");
        anyhow::ensure!(
            self.store.max_pool_size > 0,
            "store.max_pool_size must be > 0, got {}",
            self.store.max_pool_size
        );
        anyhow::ensure!(
            self.store.operation_timeout_ms > 0,
            "store.operation_timeout_ms must be > 0, got {}",
            self.store.operation_timeout_ms
        );
        anyhow::ensure!(
            self.store.result_fetch_size > 0,
            "store.result_fetch_size must be > 0, got {}",
            self.store.result_fetch_size
        );
        anyhow::ensure!(
            self.store.mutation_ceiling > 0,
            "store.mutation_ceiling must be > 0, got {}",
            self.store.mutation_ceiling
        );
        anyhow::ensure!(
            self.retention.prune_interval_secs > 0,
            "retention.prune_interval_secs must be > 0, got {}",
            self.retention.prune_interval_secs
        );
        anyhow::ensure!(
            self.retention.vacuum_interval_secs > 0,
            "retention.vacuum_interval_secs must be > 0, got {}",
            self.retention.vacuum_interval_secs
        );
        anyhow::ensure!(
            !self.aggregators.checkpoint_dir.is_empty(),
            "aggregators.checkpoint_dir must be non-empty"
        );
        for (name, agg) in [
            ("host_minute", &self.aggregators.host_minute),
            ("host_hour", &self.aggregators.host_hour),
            ("cluster_minute", &self.aggregators.cluster_minute),
            ("cluster_hour", &self.aggregators.cluster_hour),
        ] {
            anyhow::ensure!(
                agg.sleep_interval_ms > 0,
                "aggregators.{}.sleep_interval_ms must be > 0, got {}",
                name,
                agg.sleep_interval_ms
            );
            anyhow::ensure!(
                agg.checkpoint_cutoff_multiplier > 0,
                "aggregators.{}.checkpoint_cutoff_multiplier must be > 0, got {}",
                name,
                agg.checkpoint_cutoff_multiplier
            );
            anyhow::ensure!(
                !agg.checkpoint_file.is_empty(),
                "aggregators.{}.checkpoint_file must be non-empty",
                name
            );
        }
        let cluster_minute = &self.aggregators.cluster_minute;
        anyhow::ensure!(
            cluster_minute.time_slice_ms > 0
                && cluster_minute.time_slice_ms <= cluster_minute.sleep_interval_ms,
            "aggregators.cluster_minute.time_slice_ms must be in 1..=sleep_interval_ms, got {}",
            cluster_minute.time_slice_ms
        );
        if let Some(ref cron_str) = self.retention.vacuum_schedule {
            anyhow::ensure!(
                cron::Schedule::from_str(cron_str).is_ok(),
                "retention.vacuum_schedule is not a valid cron expression: {}",
                cron_str
            );
        }
        Ok(())
    }
}
