//! Error taxonomy for the tutoring runtime.

use thiserror::Error;

/// Transport-level failures from the completion service, setup generator,
/// or objective evaluator.
///
/// HTTP 429 and 402 get their own variants because the UI reacts to them
/// differently; every other non-2xx status and network failure collapses
/// into `Upstream`.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("rate limited by upstream service")]
    RateLimited,

    #[error("payment required by upstream service")]
    PaymentRequired,

    #[error("upstream service error: {0}")]
    Upstream(String),
}

impl ServiceError {
    /// Map an HTTP status code to the taxonomy.
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            429 => Self::RateLimited,
            402 => Self::PaymentRequired,
            _ => Self::Upstream(format!("HTTP {}: {}", status, body)),
        }
    }
}

impl From<reqwest::Error> for ServiceError {
    fn from(e: reqwest::Error) -> Self {
        Self::Upstream(e.to_string())
    }
}

/// Failures surfaced by `TutorOrchestrator::send_turn`.
///
/// Validation failures are returned directly to the caller; service and
/// persistence failures during a running turn are converted to a single
/// user-visible `TurnEvent::Error` instead.
#[derive(Debug, Error)]
pub enum TurnError {
    /// Local precondition failed: empty input or a turn already in flight.
    #[error("{0}")]
    Validation(String),

    #[error(transparent)]
    Service(#[from] ServiceError),

    #[error("persistence failure: {0}")]
    Persistence(#[source] anyhow::Error),
}
