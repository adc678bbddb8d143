use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use metrics_collector::aggregation::{ClusterAggregator, HostAggregator};
use metrics_collector::config::{AggregatorConfig, AggregatorsConfig};
use metrics_collector::scheduler::{self, AggregationStrategy, Scheduler, SchedulerConfig};
use metrics_collector::*;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::time::FormatTime;

struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> std::fmt::Result {
        write!(
            w,
            "{}",
            chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.3f%:z")
        )
    }
}

fn spawn_aggregator<S: AggregationStrategy>(
    strategy: S,
    aggregators: &AggregatorsConfig,
    agg: &AggregatorConfig,
    shutdown: &watch::Receiver<bool>,
    handles: &mut Vec<JoinHandle<()>>,
) {
    if !agg.enabled {
        tracing::info!(aggregator = strategy.name(), "aggregator disabled");
        return;
    }
    let checkpoint_path = Path::new(&aggregators.checkpoint_dir).join(&agg.checkpoint_file);
    let scheduler = Scheduler::new(
        strategy,
        SchedulerConfig::from_aggregator(aggregators, agg),
        checkpoint_path,
    );
    handles.push(scheduler::spawn(scheduler, shutdown.clone()));
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_timer(LocalTimer)
        .with_env_filter(filter)
        .init();

    let app_config = config::AppConfig::load()?;

    let store = Arc::new(store::MetricStore::connect(&app_config.store).await?);
    if let Err(e) = store.init_schema().await {
        // Tables may already exist from an earlier run; keep serving.
        tracing::warn!(error = %e, "schema initialization failed");
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let aggregators = &app_config.aggregators;
    let mut handles = Vec::new();
    spawn_aggregator(
        HostAggregator::minute(store.clone()),
        aggregators,
        &aggregators.host_minute,
        &shutdown_rx,
        &mut handles,
    );
    spawn_aggregator(
        HostAggregator::hourly(store.clone()),
        aggregators,
        &aggregators.host_hour,
        &shutdown_rx,
        &mut handles,
    );
    spawn_aggregator(
        ClusterAggregator::minute(store.clone(), aggregators.cluster_minute.time_slice_ms),
        aggregators,
        &aggregators.cluster_minute,
        &shutdown_rx,
        &mut handles,
    );
    spawn_aggregator(
        ClusterAggregator::hourly(store.clone()),
        aggregators,
        &aggregators.cluster_hour,
        &shutdown_rx,
        &mut handles,
    );
    handles.push(retention::spawn(
        store.clone(),
        app_config.retention.clone(),
        shutdown_rx.clone(),
    ));

    let app = routes::app(store);
    let addr = format!("{}:{}", app_config.server.host, app_config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on http://{}", addr);

    tokio::select! {
        result = axum::serve(listener, app) => {
            result?;
        }
        _ = async {
            #[cfg(unix)]
            {
                let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                    Ok(s) => s,
                    Err(_) => {
                        let _ = tokio::signal::ctrl_c().await;
                        return;
                    }
                };
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = sigterm.recv() => {}
                }
            }
            #[cfg(not(unix))]
            {
                let _ = tokio::signal::ctrl_c().await;
            }
        } => {
            tracing::info!("Received shutdown signal");
            let _ = shutdown_tx.send(true);
            for handle in handles {
                let _ = handle.await;
            }
        }
    }

    Ok(())
}
