use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::reconcile::state::{Observations, SchedulerPhase};

// ========== RESPONSE MODELS ==========

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: DateTime<Utc>,
    pub last_cycle_finished_at: Option<DateTime<Utc>>,
}

/// Everything the keeper knows about its own progress
#[derive(Debug, Serialize)]
pub struct EngineSnapshot {
    pub token: String,
    pub operator: String,
    pub threshold: String,
    pub check_interval_secs: u64,
    pub phase: SchedulerPhase,
    pub submission_in_flight: bool,
    pub transactions_confirmed: u64,
    pub dropped_ticks: u64,
    pub started_at: DateTime<Utc>,
    #[serde(flatten)]
    pub observations: Observations,
}
