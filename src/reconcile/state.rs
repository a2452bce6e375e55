use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;

use crate::execution::guard::SubmissionGuard;

/// Confirmed updates since process start
#[derive(Debug, Default)]
pub struct TransactionCounter(AtomicU64);

impl TransactionCounter {
    pub fn record_confirmed(&self) -> u64 {
        self.0.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Acquire)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerPhase {
    Idle,
    CycleInFlight,
}

const IDLE: u8 = 0;
const IN_FLIGHT: u8 = 1;

/// Last observations, kept for the status API and the per-cycle log line
#[derive(Debug, Clone, Default, Serialize)]
pub struct Observations {
    pub last_reference: Option<String>,
    pub last_reference_at: Option<DateTime<Utc>>,
    pub last_stored: Option<String>,
    pub last_threshold_value: Option<String>,
    pub last_outcome: Option<String>,
    pub last_cycle_started_at: Option<DateTime<Utc>>,
    pub last_cycle_finished_at: Option<DateTime<Utc>>,
    pub cycles_completed: u64,
}

/// Mutable state of the reconciliation engine.
///
/// Everything shared between cycles lives here: the submission guard, the
/// transaction counter and the scheduler phase.
#[derive(Debug)]
pub struct EngineState {
    pub guard: SubmissionGuard,
    pub transactions: TransactionCounter,
    phase: AtomicU8,
    dropped_ticks: AtomicU64,
    observations: RwLock<Observations>,
}

impl Default for EngineState {
    fn default() -> Self {
        Self {
            guard: SubmissionGuard::new(),
            transactions: TransactionCounter::default(),
            phase: AtomicU8::new(IDLE),
            dropped_ticks: AtomicU64::new(0),
            observations: RwLock::new(Observations::default()),
        }
    }
}

impl EngineState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn phase(&self) -> SchedulerPhase {
        match self.phase.load(Ordering::Acquire) {
            IN_FLIGHT => SchedulerPhase::CycleInFlight,
            _ => SchedulerPhase::Idle,
        }
    }

    /// Idle -> CycleInFlight; `None` if a cycle is already running
    pub fn try_begin_cycle(self: &Arc<Self>) -> Option<CycleToken> {
        self.phase
            .compare_exchange(IDLE, IN_FLIGHT, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| {
                self.observations.write().last_cycle_started_at = Some(Utc::now());
                CycleToken {
                    state: Arc::clone(self),
                }
            })
    }

    pub fn record_dropped_tick(&self) -> u64 {
        self.dropped_ticks.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn dropped_ticks(&self) -> u64 {
        self.dropped_ticks.load(Ordering::Acquire)
    }

    pub fn observe(&self, update: impl FnOnce(&mut Observations)) {
        update(&mut self.observations.write());
    }

    pub fn observations(&self) -> Observations {
        self.observations.read().clone()
    }
}

/// Held for the duration of one cycle; returns the scheduler to Idle on drop
#[derive(Debug)]
pub struct CycleToken {
    state: Arc<EngineState>,
}

impl Drop for CycleToken {
    fn drop(&mut self) {
        {
            let mut observations = self.state.observations.write();
            observations.last_cycle_finished_at = Some(Utc::now());
            observations.cycles_completed += 1;
        }
        self.state.phase.store(IDLE, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_increments() {
        let counter = TransactionCounter::default();
        assert_eq!(counter.get(), 0);
        assert_eq!(counter.record_confirmed(), 1);
        assert_eq!(counter.record_confirmed(), 2);
        assert_eq!(counter.get(), 2);
    }

    #[test]
    fn test_cycle_token_round_trip() {
        let state = EngineState::new();
        assert_eq!(state.phase(), SchedulerPhase::Idle);

        let token = state.try_begin_cycle().expect("idle engine accepts a cycle");
        assert_eq!(state.phase(), SchedulerPhase::CycleInFlight);
        assert!(state.try_begin_cycle().is_none());

        drop(token);
        assert_eq!(state.phase(), SchedulerPhase::Idle);
        let observations = state.observations();
        assert_eq!(observations.cycles_completed, 1);
        assert!(observations.last_cycle_finished_at.is_some());
    }

    #[test]
    fn test_observe_updates_snapshot() {
        let state = EngineState::new();
        state.observe(|o| o.last_reference = Some("105.00000000".to_string()));
        assert_eq!(
            state.observations().last_reference.as_deref(),
            Some("105.00000000")
        );
        assert_eq!(state.record_dropped_tick(), 1);
        assert_eq!(state.dropped_ticks(), 1);
    }
}
