// Shared test helpers
#![allow(dead_code)]

use std::collections::BTreeMap;
use std::path::Path;

use metrics_collector::config::{AppConfig, StoreConfig};
use metrics_collector::models::{TimelineMetric, TimelineMetrics};
use metrics_collector::store::MetricStore;

pub const TEST_CONFIG: &str = r#"
[server]
port = 8081
host = "0.0.0.0"

[store]
path = "data/test.db"
max_pool_size = 4
"#;

/// Store config for a database at `db_path`, with `extra` appended to the `[store]` table.
pub fn store_config(db_path: &Path, extra: &str) -> StoreConfig {
    let toml = TEST_CONFIG.replace(
        "path = \"data/test.db\"",
        &format!("path = '{}'\n{}", db_path.display(), extra),
    );
    AppConfig::load_from_str(&toml).unwrap().store
}

pub async fn open_store(db_path: &Path, extra: &str) -> MetricStore {
    let store = MetricStore::connect(&store_config(db_path, extra))
        .await
        .unwrap();
    store.init_schema().await.unwrap();
    store
}

pub fn metric(
    name: &str,
    host: &str,
    app: &str,
    start_time: i64,
    values: &[(i64, f64)],
) -> TimelineMetric {
    TimelineMetric {
        metric_name: name.into(),
        app_id: app.into(),
        instance_id: None,
        host_name: host.into(),
        unit_type: "float".into(),
        timestamp: 0,
        start_time,
        metric_values: values.iter().copied().collect::<BTreeMap<_, _>>(),
    }
}

pub fn batch(metrics: Vec<TimelineMetric>) -> TimelineMetrics {
    TimelineMetrics { metrics }
}
