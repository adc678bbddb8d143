// Retention worker: deletes rows past their table TTL every prune_interval_secs,
// and runs VACUUM on a cron schedule (local time) or every vacuum_interval_secs.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::config::RetentionConfig;
use crate::store::MetricStore;

/// Wait used when a cron expression has no upcoming fire time.
const IDLE_RECHECK: Duration = Duration::from_secs(3600);

/// When VACUUM runs next.
#[derive(Debug, Clone)]
pub enum VacuumSchedule {
    Cron(Box<cron::Schedule>),
    Every(Duration),
}

impl VacuumSchedule {
    /// `None` when the configured cron expression does not parse.
    pub fn from_config(config: &RetentionConfig) -> Option<Self> {
        match config.vacuum_schedule.as_deref() {
            Some(expr) => match cron::Schedule::from_str(expr) {
                Ok(schedule) => Some(Self::Cron(Box::new(schedule))),
                Err(e) => {
                    warn!(cron = %expr, error = %e, "invalid vacuum_schedule; VACUUM will not run");
                    None
                }
            },
            None => Some(Self::Every(Duration::from_secs(config.vacuum_interval_secs))),
        }
    }

    pub fn next_delay(&self, now: DateTime<Local>) -> Duration {
        match self {
            Self::Every(interval) => *interval,
            Self::Cron(schedule) => schedule
                .after(&now)
                .next()
                .and_then(|next| (next - now).to_std().ok())
                .unwrap_or(IDLE_RECHECK),
        }
    }
}

/// Spawns the retention worker. Returns a join handle.
pub fn spawn(
    store: Arc<MetricStore>,
    config: RetentionConfig,
    shutdown: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        run(store, config, shutdown).await;
    })
}

#[instrument(skip_all, fields(prune_interval_secs = config.prune_interval_secs))]
async fn run(store: Arc<MetricStore>, config: RetentionConfig, mut shutdown: watch::Receiver<bool>) {
    let mut prune_interval = tokio::time::interval(Duration::from_secs(config.prune_interval_secs));
    prune_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    let vacuum = VacuumSchedule::from_config(&config);
    let first_delay = vacuum
        .as_ref()
        .map_or(IDLE_RECHECK, |s| s.next_delay(Local::now()));
    let vacuum_sleep = tokio::time::sleep(first_delay);
    tokio::pin!(vacuum_sleep);

    loop {
        tokio::select! {
            _ = prune_interval.tick() => {
                match store.prune_expired(crate::store::now_ms()).await {
                    Ok(0) => {}
                    Ok(deleted) => info!(deleted, "pruned expired metric rows"),
                    Err(e) => warn!(error = %e, "prune failed"),
                }
            }
            () = &mut vacuum_sleep, if vacuum.is_some() => {
                match store.vacuum().await {
                    Ok(()) => info!("vacuum complete"),
                    Err(e) => warn!(error = %e, "vacuum failed"),
                }
                if let Some(schedule) = &vacuum {
                    let delay = schedule.next_delay(Local::now());
                    debug!(delay_secs = delay.as_secs(), "next vacuum scheduled");
                    vacuum_sleep.as_mut().reset(Instant::now() + delay);
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
    info!("retention worker stopped");
}
