// Config loading and validation tests

use metrics_collector::config::AppConfig;
use metrics_collector::store::{MAX_MUTATION_STATE_SIZE, RowFailurePolicy, ValueEncoding};

const VALID_CONFIG: &str = r#"
[server]
port = 8081
host = "0.0.0.0"

[store]
path = "data/metrics.db"
max_pool_size = 10

[retention]
prune_interval_secs = 600

[aggregators]
checkpoint_dir = "data/checkpoints"

[aggregators.cluster_minute]
sleep_interval_ms = 120000
checkpoint_cutoff_multiplier = 2
checkpoint_file = "cluster-minute-checkpoint"
time_slice_ms = 15000
"#;

#[test]
fn test_config_loads_from_str() {
    let config = AppConfig::load_from_str(VALID_CONFIG).expect("load_from_str");
    assert_eq!(config.server.port, 8081);
    assert_eq!(config.server.host, "0.0.0.0");
    assert_eq!(config.store.path, "data/metrics.db");
    assert_eq!(config.store.max_pool_size, 10);
    assert_eq!(config.retention.prune_interval_secs, 600);
    assert_eq!(
        config.aggregators.cluster_minute.checkpoint_file,
        "cluster-minute-checkpoint"
    );
}

#[test]
fn test_store_defaults() {
    let config = AppConfig::load_from_str(VALID_CONFIG).unwrap();
    assert_eq!(config.store.operation_timeout_ms, 30_000);
    assert_eq!(config.store.result_fetch_size, 5760);
    assert_eq!(config.store.mutation_ceiling, MAX_MUTATION_STATE_SIZE);
    assert_eq!(config.store.row_failure_policy, RowFailurePolicy::Log);
    assert_eq!(config.store.value_encoding, ValueEncoding::Wincode);
    assert_eq!(config.store.compression, "NONE");
    assert_eq!(config.store.ttl.precision_secs, 86_400);
    assert_eq!(config.store.ttl.cluster_hour_secs, 31_536_000);
}

#[test]
fn test_aggregator_presets() {
    let config = AppConfig::load_from_str(VALID_CONFIG).unwrap();
    let aggs = &config.aggregators;
    assert_eq!(aggs.checkpoint_delay_ms, 120_000);

    assert_eq!(aggs.host_minute.sleep_interval_ms, 300_000);
    assert_eq!(aggs.host_minute.checkpoint_cutoff_multiplier, 3);
    assert_eq!(
        aggs.host_minute.checkpoint_file,
        "timeline-metrics-host-aggregator-checkpoint"
    );

    assert_eq!(aggs.host_hour.sleep_interval_ms, 3_600_000);
    assert_eq!(aggs.host_hour.checkpoint_cutoff_multiplier, 2);

    assert_eq!(aggs.cluster_hour.sleep_interval_ms, 3_600_000);
    assert_eq!(
        aggs.cluster_hour.checkpoint_file,
        "timeline-metrics-cluster-aggregator-hourly-checkpoint"
    );
    assert!(aggs.cluster_hour.enabled);
}

#[test]
fn test_store_policy_and_encoding_parse() {
    let toml = VALID_CONFIG.replace(
        "max_pool_size = 10",
        "max_pool_size = 10\nrow_failure_policy = \"fail_pass\"\nvalue_encoding = \"json\"",
    );
    let config = AppConfig::load_from_str(&toml).unwrap();
    assert_eq!(config.store.row_failure_policy, RowFailurePolicy::FailPass);
    assert_eq!(config.store.value_encoding, ValueEncoding::Json);
}

#[test]
fn test_config_validation_rejects_invalid_port() {
    let bad = VALID_CONFIG.replace("port = 8081", "port = 0");
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("server.port"));
}

#[test]
fn test_config_validation_rejects_empty_store_path() {
    let bad = VALID_CONFIG.replace("path = \"data/metrics.db\"", "path = \"\"");
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("store.path"));
}

#[test]
fn test_config_validation_rejects_max_pool_size_zero() {
    let bad = VALID_CONFIG.replace("max_pool_size = 10", "max_pool_size = 0");
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("max_pool_size"));
}

#[test]
fn test_config_validation_rejects_mutation_ceiling_zero() {
    let bad = VALID_CONFIG.replace("max_pool_size = 10", "max_pool_size = 10\nmutation_ceiling = 0");
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("mutation_ceiling"));
}

#[test]
fn test_config_validation_rejects_interval_zero() {
    let bad = VALID_CONFIG.replace("sleep_interval_ms = 120000", "sleep_interval_ms = 0");
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("aggregators.cluster_minute.sleep_interval_ms"));
}

#[test]
fn test_config_validation_rejects_multiplier_zero() {
    let bad = VALID_CONFIG.replace(
        "checkpoint_cutoff_multiplier = 2",
        "checkpoint_cutoff_multiplier = 0",
    );
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("checkpoint_cutoff_multiplier"));
}

#[test]
fn test_config_validation_rejects_slice_wider_than_interval() {
    let bad = VALID_CONFIG.replace("time_slice_ms = 15000", "time_slice_ms = 240000");
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("time_slice_ms"));
}

#[test]
fn test_config_validation_rejects_bad_cron() {
    let bad = VALID_CONFIG.replace(
        "prune_interval_secs = 600",
        "prune_interval_secs = 600\nvacuum_schedule = \"not a cron\"",
    );
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("vacuum_schedule"));
}

#[test]
fn test_config_accepts_cron_schedule() {
    let toml = VALID_CONFIG.replace(
        "prune_interval_secs = 600",
        "prune_interval_secs = 600\nvacuum_schedule = \"0 0 3 * * *\"",
    );
    let config = AppConfig::load_from_str(&toml).unwrap();
    assert_eq!(config.retention.vacuum_schedule.as_deref(), Some("0 0 3 * * *"));
}
