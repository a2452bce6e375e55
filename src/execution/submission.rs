// Submission Controller
//
// Gets one candidate value durably written to the ledger:
// 1. Take the single-slot guard (or skip if another submission holds it)
// 2. Read the operator nonce
// 3. Send + await confirmation
// 4. Classify failures and retry under the fee policy:
//    - FeeTooLow          -> bump fee by one increment, same nonce
//    - SequenceStale      -> re-read nonce, same fee
//    - UnsupportedFeeMode -> legacy fallback price, once
//    - anything else      -> give up for this cycle
// 5. On failure, remember the fee reached so the next cycle resumes from it
//    if it retries the same value

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, error, info, instrument, warn};

use crate::error::SubmitError;
use crate::execution::fees::FeePolicy;
use crate::execution::ledger::{AttemptStatus, FeeMode, LedgerClient, UpdateAttempt};
use crate::price_feed::FixedPoint;
use crate::reconcile::shutdown::ShutdownSignal;
use crate::reconcile::state::EngineState;

/// Terminal result of one `submit` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Confirmed(Confirmation),
    Failed(SubmitError),
    /// Another submission already held the guard
    Skipped,
}

impl Outcome {
    pub fn label(&self) -> String {
        match self {
            Outcome::Confirmed(c) => format!("confirmed {}", c.tx_hash),
            Outcome::Failed(e) => format!("failed: {}", e),
            Outcome::Skipped => "skipped".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Confirmation {
    pub tx_hash: String,
    pub value: FixedPoint,
    pub nonce: u64,
    pub fee_price: u128,
    pub fee_mode: FeeMode,
    pub attempts: u32,
}

/// Fee position of one logical update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Ladder {
    fee_price: u128,
    fee_mode: FeeMode,
}

/// Fee reached by the last failed update, kept until it confirms or the value changes
#[derive(Debug, Clone, Copy)]
struct Carried {
    candidate: FixedPoint,
    ladder: Ladder,
}

pub struct SubmissionController {
    ledger: Arc<dyn LedgerClient>,
    policy: FeePolicy,
    state: Arc<EngineState>,
    shutdown: ShutdownSignal,
    carried: Mutex<Option<Carried>>,
}

impl SubmissionController {
    pub fn new(
        ledger: Arc<dyn LedgerClient>,
        policy: FeePolicy,
        state: Arc<EngineState>,
        shutdown: ShutdownSignal,
    ) -> Self {
        Self {
            ledger,
            policy,
            state,
            shutdown,
            carried: Mutex::new(None),
        }
    }

    /// Where the fee ladder starts for `candidate`
    fn starting_ladder(&self, candidate: FixedPoint) -> Ladder {
        let mut carried = self.carried.lock();
        match *carried {
            Some(prior) if prior.candidate == candidate => {
                info!(
                    "⛽ Resuming {} at {} wei ({:?}) from the previous failed attempt",
                    candidate, prior.ladder.fee_price, prior.ladder.fee_mode
                );
                prior.ladder
            }
            _ => {
                *carried = None;
                Ladder {
                    fee_price: self.policy.base_price,
                    fee_mode: self.policy.mode,
                }
            }
        }
    }

    /// Push `candidate` on-chain. At most one call is active at any time;
    /// a concurrent call returns `Skipped` without touching the ledger.
    #[instrument(skip(self, candidate), fields(candidate = %candidate))]
    pub async fn submit(&self, candidate: FixedPoint) -> Outcome {
        let Some(_permit) = self.state.guard.try_acquire() else {
            warn!("⏭️ Submission already in flight, skipping update");
            return Outcome::Skipped;
        };

        let mut ladder = self.starting_ladder(candidate);
        let outcome = self.run_attempts(candidate, &mut ladder).await;

        match &outcome {
            Outcome::Confirmed(confirmation) => {
                *self.carried.lock() = None;
                let total = self.state.transactions.record_confirmed();
                info!(
                    "✓ Update confirmed: {} (tx: {}, nonce: {}, fee: {} wei, attempts: {}, session total: {})",
                    confirmation.value,
                    confirmation.tx_hash,
                    confirmation.nonce,
                    confirmation.fee_price,
                    confirmation.attempts,
                    total
                );
            }
            Outcome::Failed(err) => {
                *self.carried.lock() = Some(Carried { candidate, ladder });
                error!("❌ Failed to update value on-chain: {}", err);
            }
            Outcome::Skipped => {}
        }

        outcome
    }

    async fn run_attempts(&self, candidate: FixedPoint, ladder: &mut Ladder) -> Outcome {
        let mut nonce = match self.ledger.sequence().await {
            Ok(nonce) => nonce,
            Err(err) => return Outcome::Failed(err),
        };
        let mut fell_back = ladder.fee_mode != self.policy.mode;
        let mut attempts: u32 = 0;

        loop {
            attempts += 1;
            let Ladder { fee_price, fee_mode } = *ladder;
            let mut attempt = UpdateAttempt {
                candidate,
                nonce,
                fee_price,
                priority_fee: self.policy.priority_for(fee_price),
                fee_mode,
                gas_limit: self.policy.gas_limit,
                status: AttemptStatus::Pending,
            };

            info!(
                "📤 Sending update #{}: value={} nonce={} fee={} wei mode={:?}",
                attempts, candidate, nonce, fee_price, fee_mode
            );

            let err = match self.ledger.send_update(&attempt).await {
                Ok(receipt) => {
                    attempt.status = AttemptStatus::Confirmed {
                        tx_hash: receipt.tx_hash.clone(),
                    };
                    debug!("attempt {} -> {:?}", attempts, attempt.status);
                    return Outcome::Confirmed(Confirmation {
                        tx_hash: receipt.tx_hash,
                        value: candidate,
                        nonce,
                        fee_price,
                        fee_mode,
                        attempts,
                    });
                }
                Err(err) => err,
            };
            attempt.status = AttemptStatus::Rejected(err.clone());
            debug!("attempt {} -> {:?}", attempts, attempt.status);

            if !err.is_retryable() {
                return Outcome::Failed(err);
            }

            match &err {
                SubmitError::FeeTooLow(reason) => match self.policy.escalate(fee_price) {
                    Some(next) => {
                        warn!(
                            "⛽ Fee too low ({}), raising {} -> {} wei",
                            reason, fee_price, next
                        );
                        ladder.fee_price = next;
                    }
                    None => return Outcome::Failed(self.ceiling_reached()),
                },
                SubmitError::SequenceStale(reason) => {
                    warn!("🔁 Nonce {} stale ({}), re-reading", nonce, reason);
                    nonce = match self.ledger.sequence().await {
                        Ok(fresh) => fresh,
                        Err(read_err) => return Outcome::Failed(read_err),
                    };
                }
                SubmitError::UnsupportedFeeMode(reason) => {
                    if fell_back {
                        return Outcome::Failed(err);
                    }
                    let Some(fallback) = self.policy.fallback(fee_price) else {
                        warn!(
                            "⚠️ Fee mode {:?} unsupported ({}), legacy fallback is above the fee ceiling",
                            fee_mode, reason
                        );
                        return Outcome::Failed(self.ceiling_reached());
                    };
                    warn!(
                        "⚠️ Fee mode {:?} unsupported ({}), falling back to legacy at {} wei",
                        fee_mode, reason, fallback
                    );
                    fell_back = true;
                    *ladder = Ladder {
                        fee_price: fallback,
                        fee_mode: FeeMode::Legacy,
                    };
                }
                _ => return Outcome::Failed(err),
            }

            if attempts >= self.policy.max_attempts {
                return Outcome::Failed(SubmitError::RetryBudgetExhausted { attempts });
            }
            if self.shutdown.is_triggered() {
                warn!("🛑 Shutdown requested, abandoning retries for {}", candidate);
                return Outcome::Failed(SubmitError::Interrupted);
            }
        }
    }

    fn ceiling_reached(&self) -> SubmitError {
        SubmitError::FeeCeilingReached {
            ceiling: self.policy.max_price.unwrap_or(u128::MAX),
        }
    }
}
