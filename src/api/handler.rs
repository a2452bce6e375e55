use axum::{extract::State, Json};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use super::models::*;
use crate::{
    error::{AppError, AppResult},
    price_feed::Threshold,
    reconcile::state::EngineState,
};

#[derive(Clone)]
pub struct StatusState {
    pub engine: Arc<EngineState>,
    pub token: String,
    pub operator: String,
    pub threshold: Threshold,
    pub check_interval: Duration,
    pub started_at: DateTime<Utc>,
}

impl StatusState {
    /// Loop is considered stalled after this long without a finished cycle
    fn stale_after(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.check_interval * 3).unwrap_or_else(|_| chrono::Duration::weeks(52))
    }
}

/// Liveness of the reconciliation loop
/// GET /health
pub async fn health_check(State(state): State<StatusState>) -> AppResult<Json<HealthResponse>> {
    let now = Utc::now();
    let last_finished = state.engine.observations().last_cycle_finished_at;
    let since = last_finished.unwrap_or(state.started_at);

    if now.signed_duration_since(since) > state.stale_after() {
        warn!("⚠️ Health check: no cycle finished since {}", since);
        return Err(AppError::Stale(format!("no cycle finished since {}", since)));
    }

    Ok(Json(HealthResponse {
        status: "healthy".to_string(),
        timestamp: now,
        last_cycle_finished_at: last_finished,
    }))
}

/// Snapshot of the engine state
/// GET /api/v1/status
pub async fn get_status(State(state): State<StatusState>) -> Json<EngineSnapshot> {
    let engine = &state.engine;
    Json(EngineSnapshot {
        token: state.token.clone(),
        operator: state.operator.clone(),
        threshold: state.threshold.to_string(),
        check_interval_secs: state.check_interval.as_secs(),
        phase: engine.phase(),
        submission_in_flight: engine.guard.is_held(),
        transactions_confirmed: engine.transactions.get(),
        dropped_ticks: engine.dropped_ticks(),
        started_at: state.started_at,
        observations: engine.observations(),
    })
}
