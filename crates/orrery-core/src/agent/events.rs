//! Turn event protocol between the orchestrator and its caller.

use serde::{Deserialize, Serialize};

use crate::error::{ServiceError, TurnError};

/// Points granted when a user first hits a learning objective.
pub const REWARD_POINTS: u32 = 50;

/// Coarse failure category carried on [`TurnEvent::Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    RateLimited,
    PaymentRequired,
    Upstream,
    Persistence,
}

impl ErrorKind {
    /// Short student-facing notice. Never exposes upstream detail.
    pub fn user_notice(&self) -> &'static str {
        match self {
            Self::Validation => "That message can't be sent. Check it and try again.",
            Self::RateLimited => "The tutor is busy right now. Try again in a moment.",
            Self::PaymentRequired => "This planet is out of credits. Add credits to keep chatting.",
            Self::Upstream | Self::Persistence => {
                "Something went wrong on our side. Try again in a moment."
            }
        }
    }

    pub fn from_turn_error(err: &TurnError) -> Self {
        match err {
            TurnError::Validation(_) => Self::Validation,
            TurnError::Service(ServiceError::RateLimited) => Self::RateLimited,
            TurnError::Service(ServiceError::PaymentRequired) => Self::PaymentRequired,
            TurnError::Service(ServiceError::Upstream(_)) => Self::Upstream,
            TurnError::Persistence(_) => Self::Persistence,
        }
    }
}

/// Events emitted over the per-turn channel, in order, ending with
/// `Finished`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnEvent {
    /// Incremental assistant text.
    TextDelta { delta: String },
    /// The assistant reply was persisted in full.
    AssistantComplete { message_id: i64, text: String },
    /// The user hit a learning objective for the first time.
    ObjectiveHit { index: usize, points: u32 },
    /// The turn failed. `detail` is for logs, `notice` for students.
    Error {
        kind: ErrorKind,
        notice: String,
        detail: String,
    },
    /// Always the final event on the channel.
    Finished,
}
