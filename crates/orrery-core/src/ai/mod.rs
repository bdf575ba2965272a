//! External service layer
//!
//! Handles communication with the completion service, the setup generator,
//! and the objective evaluator. Everything sits behind async traits so the
//! runtime takes injected collaborators and tests run against in-process
//! fakes.

pub mod client;
pub mod sse;
pub mod types;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::ServiceError;
use types::{
    ChatMessage, EvaluationRequest, EvaluationResponse, GeneratedSetup, SetupRequest, StreamPart,
};

pub use client::{ServiceClient, ServiceConfig};

/// Streaming chat completion endpoint.
#[async_trait]
pub trait CompletionService: Send + Sync {
    /// Start a streaming completion.
    ///
    /// The receiver yields text deltas until the upstream stream ends.
    /// Transport failures before any bytes arrive are returned as typed
    /// errors; mid-stream failures arrive as `StreamPart::Error`. No retry
    /// is attempted here.
    async fn stream_chat(
        &self,
        messages: &[ChatMessage],
        system_prompt: &str,
    ) -> Result<mpsc::UnboundedReceiver<StreamPart>, ServiceError>;
}

/// One-shot setup generation for the configuration wizard.
#[async_trait]
pub trait SetupGenerator: Send + Sync {
    async fn generate_setup(&self, request: &SetupRequest)
        -> Result<GeneratedSetup, ServiceError>;
}

/// Conservative objective evaluation over a transcript window.
#[async_trait]
pub trait ObjectiveEvaluator: Send + Sync {
    async fn evaluate_objectives(
        &self,
        request: &EvaluationRequest,
    ) -> Result<EvaluationResponse, ServiceError>;
}
