// Checkpointed aggregation scheduler: one task per aggregator.
// Each cycle reads the checkpoint file, aggregates [checkpoint, checkpoint + interval),
// advances the checkpoint on success, then sleeps for what is left of the interval.

use std::future::Future;
use std::path::Path;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

use crate::checkpoint::CheckpointFile;
use crate::config::{AggregatorConfig, AggregatorsConfig};
use crate::store::WriteReport;

/// Shortest sleep between cycles when a cycle overruns its interval.
pub const MIN_SLEEP: Duration = Duration::from_millis(1);

/// Reads one window of input and writes the rolled-up rows.
pub trait AggregationStrategy: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    fn aggregate_window(
        &self,
        start_time: i64,
        end_time: i64,
    ) -> impl Future<Output = anyhow::Result<WriteReport>> + Send;
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub sleep_interval_ms: u64,
    pub checkpoint_cutoff_multiplier: u32,
    pub checkpoint_delay_ms: u64,
}

impl SchedulerConfig {
    pub fn from_aggregator(aggregators: &AggregatorsConfig, agg: &AggregatorConfig) -> Self {
        Self {
            sleep_interval_ms: agg.sleep_interval_ms,
            checkpoint_cutoff_multiplier: agg.checkpoint_cutoff_multiplier,
            checkpoint_delay_ms: aggregators.checkpoint_delay_ms,
        }
    }

    fn interval_ms(&self) -> i64 {
        i64::try_from(self.sleep_interval_ms).unwrap_or(i64::MAX)
    }

    fn cutoff_ms(&self) -> i64 {
        self.interval_ms()
            .saturating_mul(i64::from(self.checkpoint_cutoff_multiplier))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    /// No usable checkpoint: one was seeded in the past and nothing was aggregated.
    Seeded { checkpoint: i64, saved: bool },
    /// The window was aggregated; the checkpoint moved to `end` if `checkpoint_saved`.
    Aggregated {
        start: i64,
        end: i64,
        report: WriteReport,
        checkpoint_saved: bool,
    },
    /// The window failed; the checkpoint was left where it was.
    Failed { start: i64, end: i64 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Cycle {
    pub outcome: CycleOutcome,
    pub sleep: Duration,
}

/// Sleep for the rest of the interval, or `MIN_SLEEP` if the cycle used it all.
pub fn sleep_after(interval: Duration, elapsed: Duration) -> Duration {
    interval.saturating_sub(elapsed).max(MIN_SLEEP)
}

pub struct Scheduler<S> {
    strategy: S,
    config: SchedulerConfig,
    checkpoint: CheckpointFile,
}

impl<S: AggregationStrategy> Scheduler<S> {
    pub fn new(strategy: S, config: SchedulerConfig, checkpoint_path: impl AsRef<Path>) -> Self {
        Self {
            strategy,
            config,
            checkpoint: CheckpointFile::new(checkpoint_path.as_ref()),
        }
    }

    pub fn checkpoint(&self) -> &CheckpointFile {
        &self.checkpoint
    }

    /// Runs one scheduling cycle as of `now_ms`. Never fails: errors are logged and
    /// reflected in the outcome.
    pub async fn run_cycle(&self, now_ms: i64) -> Cycle {
        let name = self.strategy.name();
        let interval = Duration::from_millis(self.config.sleep_interval_ms);

        let mut last = match self.checkpoint.read().await {
            Ok(cp) => cp,
            Err(e) => {
                warn!(aggregator = name, error = %e, "unable to read checkpoint, treating as absent");
                None
            }
        };
        if let Some(cp) = last
            && now_ms - cp > self.config.cutoff_ms()
        {
            warn!(
                aggregator = name,
                checkpoint = cp,
                cutoff_ms = self.config.cutoff_ms(),
                "checkpoint too old, discarding"
            );
            last = None;
        }

        let Some(start) = last else {
            let seed = now_ms - i64::try_from(self.config.checkpoint_delay_ms).unwrap_or(0);
            let saved = match self.checkpoint.save(seed).await {
                Ok(()) => true,
                Err(e) => {
                    warn!(aggregator = name, error = %e, "unable to save initial checkpoint");
                    false
                }
            };
            info!(aggregator = name, checkpoint = seed, "seeded checkpoint, nothing to aggregate yet");
            return Cycle {
                outcome: CycleOutcome::Seeded {
                    checkpoint: seed,
                    saved,
                },
                sleep: interval,
            };
        };

        let end = start.saturating_add(self.config.interval_ms());
        info!(
            aggregator = name,
            checkpoint = start,
            lag_secs = (now_ms - start) / 1000,
            "aggregating window"
        );

        let started = Instant::now();
        let result = self.strategy.aggregate_window(start, end).await;
        let elapsed = started.elapsed();

        let outcome = match result {
            Ok(report) => {
                let checkpoint_saved = match self.checkpoint.save(end).await {
                    Ok(()) => true,
                    Err(e) => {
                        warn!(aggregator = name, error = %e, checkpoint = end, "unable to save checkpoint");
                        false
                    }
                };
                info!(
                    aggregator = name,
                    start_time = start,
                    end_time = end,
                    rows_written = report.rows_written,
                    rows_failed = report.rows_failed,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "aggregation window complete"
                );
                CycleOutcome::Aggregated {
                    start,
                    end,
                    report,
                    checkpoint_saved,
                }
            }
            Err(e) => {
                warn!(aggregator = name, error = %e, start_time = start, end_time = end, "aggregation window failed");
                CycleOutcome::Failed { start, end }
            }
        };

        let sleep = sleep_after(interval, elapsed);
        if sleep == MIN_SLEEP {
            info!(aggregator = name, elapsed_ms = elapsed.as_millis() as u64, "cycle overran interval, not sleeping");
        }
        Cycle { outcome, sleep }
    }

    /// Cycles until `shutdown` flips to true or its sender is dropped.
    #[instrument(skip_all, fields(aggregator = self.strategy.name()))]
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(interval_ms = self.config.sleep_interval_ms, "aggregator started");
        loop {
            if *shutdown.borrow() {
                break;
            }
            let cycle = self.run_cycle(crate::store::now_ms()).await;
            debug!(sleep_ms = cycle.sleep.as_millis() as u64, "aggregator sleeping");
            tokio::select! {
                _ = tokio::time::sleep(cycle.sleep) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        info!("aggregator stopped");
    }
}

/// Spawns a scheduler loop. Returns a join handle.
pub fn spawn<S: AggregationStrategy>(
    scheduler: Scheduler<S>,
    shutdown: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        scheduler.run(shutdown).await;
    })
}
