//! Wire types for the external tutoring services.
//!
//! These are NOT domain types - they're specific to the service APIs.

use serde::{Deserialize, Serialize};

use crate::agent::config::{Guardrails, ScaffoldingLevel};

/// Message role in a conversation
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "system" => Some(Self::System),
            "user" => Some(Self::User),
            "assistant" => Some(Self::Assistant),
            _ => None,
        }
    }
}

/// One turn as replayed to the completion service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

/// A single piece of a streaming completion.
///
/// The stream ends when the channel closes; an `Error` part means the
/// transport failed mid-stream and no more deltas will arrive.
#[derive(Debug, Clone)]
pub enum StreamPart {
    TextDelta { delta: String },
    Error { error: String },
}

/// One-shot request to the setup generator.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SetupRequest {
    pub agent_type: String,
    pub agent_name: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scaffolding_level: Option<ScaffoldingLevel>,
}

/// Setup generator response: seeds for the wizard's editable fields.
#[derive(Debug, Clone, Deserialize)]
pub struct GeneratedSetup {
    pub learning_objectives: Vec<String>,
    pub guardrails: Guardrails,
    pub scaffolding: GeneratedScaffolding,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GeneratedScaffolding {
    pub level: ScaffoldingLevel,
    pub behaviors: Vec<String>,
}

/// One objective as submitted to the evaluator, index included so the
/// response can reference objectives positionally.
#[derive(Debug, Clone, Serialize)]
pub struct ObjectiveRef {
    pub index: usize,
    pub text: String,
}

/// Objective evaluator request: declared objectives plus the recent
/// transcript window, oldest message first.
#[derive(Debug, Clone, Serialize)]
pub struct EvaluationRequest {
    pub objectives: Vec<ObjectiveRef>,
    pub messages: Vec<ChatMessage>,
}

/// Indices the evaluator judged clearly satisfied by the transcript.
#[derive(Debug, Clone, Deserialize)]
pub struct EvaluationResponse {
    pub hit: Vec<usize>,
}
