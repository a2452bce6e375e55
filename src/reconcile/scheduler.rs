// Reconciliation Scheduler
//
// One cycle per tick:
// 1. fetch the reference value and read the stored value concurrently
// 2. on a throttled fetch, wait out the provider's delay and start over
// 3. evaluate the deviation
// 4. hand the candidate to the submission controller if an update is needed
//
// `cycle_timeout` bounds steps 1-3. A submission that has started is left to
// reach its own outcome, bounded by the fee policy's attempts and timeouts.
//
// Ticks that land while a cycle is still running are dropped, never queued.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::error::{AppError, FetchError};
use crate::execution::ledger::LedgerClient;
use crate::execution::submission::{Outcome, SubmissionController};
use crate::price_feed::{Decision, ReferenceSource, Threshold, UpdatePolicy};
use crate::reconcile::shutdown::ShutdownSignal;
use crate::reconcile::state::{CycleToken, EngineState};

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Provider network id, e.g. `ethereum`
    pub network: String,
    /// Asset id at the provider (token address)
    pub asset: String,
    /// Display label for log lines
    pub token_label: String,
    pub period: Duration,
    pub cycle_timeout: Duration,
    pub max_throttle_retries: u32,
    pub threshold: Threshold,
    pub policy: UpdatePolicy,
}

/// How a single cycle ended
#[derive(Debug)]
pub enum CycleReport {
    NoAction,
    Updated(Outcome),
    /// Fetch, read or evaluation failed; the next tick starts from scratch
    Aborted(AppError),
    TimedOut,
    Interrupted,
}

pub struct Scheduler {
    config: SchedulerConfig,
    source: Arc<dyn ReferenceSource>,
    ledger: Arc<dyn LedgerClient>,
    controller: Arc<SubmissionController>,
    state: Arc<EngineState>,
    shutdown: ShutdownSignal,
}

impl Scheduler {
    pub fn new(
        config: SchedulerConfig,
        source: Arc<dyn ReferenceSource>,
        ledger: Arc<dyn LedgerClient>,
        controller: Arc<SubmissionController>,
        state: Arc<EngineState>,
        shutdown: ShutdownSignal,
    ) -> Self {
        Self {
            config,
            source,
            ledger,
            controller,
            state,
            shutdown,
        }
    }

    /// Start the reconciliation loop (runs in background until shutdown)
    pub fn start(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move { self.run().await })
    }

    async fn run(self: Arc<Self>) {
        info!(
            "⏰ Reconciliation loop started for {} (every {}s, threshold {})",
            self.config.token_label,
            self.config.period.as_secs(),
            self.config.threshold
        );

        let mut ticker = interval(self.config.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut in_flight: Option<JoinHandle<()>> = None;

        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.triggered() => break,
                _ = ticker.tick() => {
                    match self.state.try_begin_cycle() {
                        Some(token) => {
                            let this = self.clone();
                            in_flight = Some(tokio::spawn(async move { this.execute(token).await }));
                        }
                        None => {
                            let dropped = self.state.record_dropped_tick();
                            warn!("⏭️ Previous cycle still running, tick dropped ({} so far)", dropped);
                        }
                    }
                }
            }
        }

        info!("🛑 Shutdown requested, waiting for the in-flight cycle");
        if let Some(handle) = in_flight {
            if let Err(e) = handle.await {
                error!("❌ Reconciliation cycle task failed: {}", e);
            }
        }
        info!("✓ Reconciliation loop stopped");
    }

    async fn execute(&self, token: CycleToken) {
        let report = self.run_cycle().await;
        debug!("Cycle finished: {:?}", report);
        drop(token);
    }

    /// One full cycle
    #[instrument(skip(self), fields(cycle_id = %Uuid::new_v4(), token = %self.config.token_label))]
    pub async fn run_cycle(&self) -> CycleReport {
        info!("🔄 Starting reconciliation cycle");
        let report = match tokio::time::timeout(self.config.cycle_timeout, self.observe()).await {
            Ok(Ok(Decision::NoActionNeeded)) => {
                info!("✓ Price change within threshold, no update needed");
                CycleReport::NoAction
            }
            Ok(Ok(Decision::UpdateRequired { candidate })) => {
                if self.shutdown.is_triggered() {
                    CycleReport::Interrupted
                } else {
                    info!("📈 Price change exceeds threshold, updating to {}", candidate);
                    CycleReport::Updated(self.controller.submit(candidate).await)
                }
            }
            Ok(Err(report)) => report,
            Err(_) => {
                error!(
                    "❌ Cycle exceeded {}s and was abandoned",
                    self.config.cycle_timeout.as_secs()
                );
                CycleReport::TimedOut
            }
        };

        let label = match &report {
            CycleReport::NoAction => "no action".to_string(),
            CycleReport::Updated(outcome) => outcome.label(),
            CycleReport::Aborted(err) => format!("aborted: {}", err),
            CycleReport::TimedOut => "timed out".to_string(),
            CycleReport::Interrupted => "interrupted".to_string(),
        };
        self.state.observe(|o| o.last_outcome = Some(label));
        report
    }

    /// Fetch, read and evaluate; `Err` carries the report of a cycle that ends here
    async fn observe(&self) -> Result<Decision, CycleReport> {
        let mut throttled: u32 = 0;

        loop {
            let (fetched, read) = tokio::select! {
                biased;
                _ = self.shutdown.triggered() => return Err(CycleReport::Interrupted),
                pair = async {
                    tokio::join!(
                        self.source.fetch(&self.config.network, &self.config.asset),
                        self.ledger.read_value()
                    )
                } => pair,
            };

            let reference = match fetched {
                Ok(reference) => reference,
                Err(FetchError::Throttled { retry_after }) => {
                    if throttled >= self.config.max_throttle_retries {
                        error!(
                            "❌ Still throttled after {} waits, giving up this cycle",
                            throttled
                        );
                        return Err(CycleReport::Aborted(
                            FetchError::Throttled { retry_after }.into(),
                        ));
                    }
                    throttled += 1;
                    warn!(
                        "⏳ Waiting {}s before retrying the fetch ({}/{})",
                        retry_after.as_secs(),
                        throttled,
                        self.config.max_throttle_retries
                    );
                    tokio::select! {
                        biased;
                        _ = self.shutdown.triggered() => return Err(CycleReport::Interrupted),
                        _ = tokio::time::sleep(retry_after) => continue,
                    }
                }
                Err(e) => {
                    error!("❌ Failed to fetch reference price: {}", e);
                    return Err(CycleReport::Aborted(e.into()));
                }
            };

            let stored = match read {
                Ok(stored) => stored,
                Err(e) => {
                    error!("❌ Failed to read on-chain price: {}", e);
                    return Err(CycleReport::Aborted(e.into()));
                }
            };

            let threshold_value = self
                .config
                .threshold
                .value_for(&reference.value)
                .map(|v| v.to_string())
                .unwrap_or_else(|e| format!("n/a ({})", e));

            self.state.observe(|o| {
                o.last_reference = Some(reference.value.to_string());
                o.last_reference_at = Some(reference.fetched_at);
                o.last_stored = Some(stored.value.to_string());
                o.last_threshold_value = Some(threshold_value.clone());
            });

            info!(
                "📊 {} | live: {} | on-chain: {} | threshold: {} ({}) | session txs: {}",
                self.config.token_label,
                reference.value,
                stored.value,
                threshold_value,
                self.config.threshold,
                self.state.transactions.get()
            );

            return self
                .config
                .policy
                .decide(&reference, &stored, &self.config.threshold)
                .map_err(|e| {
                    error!("❌ Could not compare values: {}", e);
                    CycleReport::Aborted(e.into())
                });
        }
    }
}
