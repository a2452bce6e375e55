use std::time::Duration;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Top-level error type for the keeper
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Reference fetch failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("Ledger read failed: {0}")]
    Read(#[from] ReadError),

    #[error("Submission failed: {0}")]
    Submit(#[from] SubmitError),

    #[error("Value error: {0}")]
    Value(#[from] ValueError),

    #[error("Reconciliation stalled: {0}")]
    Stale(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Reference fetch failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("Reference source unavailable: {0}")]
    Unavailable(String),

    #[error("Malformed reference payload: {0}")]
    Malformed(String),

    #[error("Reference source throttled, retry after {}s", .retry_after.as_secs())]
    Throttled { retry_after: Duration },
}

/// Ledger read failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReadError {
    #[error("Ledger unavailable: {0}")]
    Unavailable(String),
}

/// Submission failures, classified so the controller can pick a retry strategy
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SubmitError {
    #[error("Fee too low for replacement: {0}")]
    FeeTooLow(String),

    #[error("Sequence number already consumed: {0}")]
    SequenceStale(String),

    #[error("Fee mode not supported by network: {0}")]
    UnsupportedFeeMode(String),

    #[error("Transaction rejected: {0}")]
    Other(String),

    #[error("Timed out waiting for {0}")]
    Timeout(String),

    #[error("Gave up after {attempts} attempts")]
    RetryBudgetExhausted { attempts: u32 },

    #[error("Fee escalation would exceed ceiling of {ceiling} wei")]
    FeeCeilingReached { ceiling: u128 },

    #[error("Shutdown requested before retry")]
    Interrupted,
}

impl SubmitError {
    /// True for failures the escalation policy knows how to retry
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SubmitError::FeeTooLow(_)
                | SubmitError::SequenceStale(_)
                | SubmitError::UnsupportedFeeMode(_)
        )
    }
}

/// Fixed-point parsing and arithmetic errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValueError {
    #[error("Invalid decimal literal: {0:?}")]
    InvalidLiteral(String),

    #[error("Scale {0} exceeds maximum supported scale")]
    ScaleTooLarge(u32),

    #[error("Value overflows 256 bits")]
    Overflow,

    #[error("Threshold must be positive, got {0}")]
    NonPositiveThreshold(String),
}

/// API error response structure
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub error_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_code, message, details) = match self {
            AppError::Stale(reason) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "RECONCILIATION_STALE",
                "Reconciliation loop has not completed a cycle recently".to_string(),
                Some(serde_json::json!({ "reason": reason })),
            ),
            AppError::Read(err) => (
                StatusCode::BAD_GATEWAY,
                "LEDGER_UNAVAILABLE",
                err.to_string(),
                None,
            ),
            _ => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "An internal error occurred".to_string(),
                None,
            ),
        };

        let body = Json(ErrorResponse {
            error: message,
            error_code: error_code.to_string(),
            details,
        });

        (status, body).into_response()
    }
}

impl From<config::ConfigError> for AppError {
    fn from(error: config::ConfigError) -> Self {
        AppError::Config(error.to_string())
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(error: validator::ValidationErrors) -> Self {
        let fields = error
            .field_errors()
            .into_iter()
            .map(|(field, errors)| {
                let codes: Vec<String> = errors.iter().map(|e| e.code.to_string()).collect();
                format!("{}: {}", field, codes.join(", "))
            })
            .collect::<Vec<String>>()
            .join("; ");
        AppError::Config(format!("Validation failed: {}", fields))
    }
}

impl From<reqwest::Error> for AppError {
    fn from(error: reqwest::Error) -> Self {
        AppError::Internal(format!("HTTP client error: {:?}", error))
    }
}

/// Result type alias for the keeper
pub type AppResult<T> = Result<T, AppError>;
