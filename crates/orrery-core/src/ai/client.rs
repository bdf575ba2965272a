//! HTTP transport for the external tutoring services.
//!
//! One client covers all three endpoints: the streaming completion
//! service, the one-shot setup generator, and the objective evaluator.
//! Status codes map onto the shared error taxonomy (429 rate limited,
//! 402 payment required, anything else upstream).

use std::time::Instant;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::mpsc;
use tracing::{error, info};

use super::sse::SseStreamParser;
use super::types::{
    ChatMessage, EvaluationRequest, EvaluationResponse, GeneratedSetup, SetupRequest, StreamPart,
};
use super::{CompletionService, ObjectiveEvaluator, SetupGenerator};
use crate::error::ServiceError;

/// Endpoint configuration for the service client.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub completion_url: String,
    pub setup_url: String,
    pub evaluation_url: String,
    pub api_key: Option<String>,
}

/// HTTP implementation of the three service traits.
pub struct ServiceClient {
    http: reqwest::Client,
    config: ServiceConfig,
}

impl ServiceClient {
    pub fn new(config: ServiceConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
        }
    }

    fn build_request(&self, url: &str) -> reqwest::RequestBuilder {
        let mut request = self.http.post(url);
        if let Some(key) = &self.config.api_key {
            request = request.header("Authorization", format!("Bearer {}", key));
        }
        request
    }
}

/// Check a response's status before touching the body, mapping failures
/// onto the error taxonomy.
async fn ensure_success(
    response: reqwest::Response,
    call_start: Instant,
    label: &str,
) -> Result<reqwest::Response, ServiceError> {
    let status = response.status();
    info!("{} response: {} in {:?}", label, status, call_start.elapsed());

    if status.is_success() {
        return Ok(response);
    }

    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());
    error!("{} error: {} - {}", label, status, body);
    Err(ServiceError::from_status(status.as_u16(), body))
}

/// Spawn a task that drains an HTTP SSE body into stream parts.
///
/// Read failures are forwarded as an explicit error part so the receiver
/// never waits on a silently-dead channel. A dropped receiver stops
/// consumption without aborting the upstream request.
fn spawn_sse_stream_task<S>(
    stream: S,
    tx: mpsc::UnboundedSender<StreamPart>,
    label: &'static str,
) where
    S: futures::Stream<Item = reqwest::Result<bytes::Bytes>> + Send + 'static,
{
    tokio::spawn(async move {
        tokio::pin!(stream);
        let mut parser = SseStreamParser::new();
        let mut chunk_count: u64 = 0;

        while let Some(chunk) = stream.next().await {
            chunk_count += 1;
            match chunk {
                Ok(bytes) => {
                    for delta in parser.feed(&bytes) {
                        if tx.send(StreamPart::TextDelta { delta }).is_err() {
                            // Receiver gone: the view unmounted.
                            return;
                        }
                    }
                    if parser.is_done() {
                        break;
                    }
                }
                Err(e) => {
                    error!("{} read error at chunk #{}: {}", label, chunk_count, e);
                    let _ = tx.send(StreamPart::Error {
                        error: format!("{} read error: {}", label, e),
                    });
                    return;
                }
            }
        }

        info!("{} stream ended after {} chunks", label, chunk_count);
    });
}

#[async_trait]
impl CompletionService for ServiceClient {
    async fn stream_chat(
        &self,
        messages: &[ChatMessage],
        system_prompt: &str,
    ) -> Result<mpsc::UnboundedReceiver<StreamPart>, ServiceError> {
        let call_start = Instant::now();
        info!("Completion call: {} messages", messages.len());

        let body = serde_json::json!({
            "messages": messages,
            "systemPrompt": system_prompt,
            "stream": true,
        });

        let response = self
            .build_request(&self.config.completion_url)
            .json(&body)
            .send()
            .await?;
        let response = ensure_success(response, call_start, "completion").await?;

        let (tx, rx) = mpsc::unbounded_channel();
        spawn_sse_stream_task(response.bytes_stream(), tx, "completion");
        Ok(rx)
    }
}

#[async_trait]
impl SetupGenerator for ServiceClient {
    async fn generate_setup(
        &self,
        request: &SetupRequest,
    ) -> Result<GeneratedSetup, ServiceError> {
        let call_start = Instant::now();
        info!("Setup generation call for '{}'", request.agent_name);

        let response = self
            .build_request(&self.config.setup_url)
            .json(request)
            .send()
            .await?;
        let response = ensure_success(response, call_start, "setup generator").await?;

        response
            .json::<GeneratedSetup>()
            .await
            .map_err(|e| ServiceError::Upstream(format!("setup generator response: {}", e)))
    }
}

#[async_trait]
impl ObjectiveEvaluator for ServiceClient {
    async fn evaluate_objectives(
        &self,
        request: &EvaluationRequest,
    ) -> Result<EvaluationResponse, ServiceError> {
        let call_start = Instant::now();
        info!(
            "Objective evaluation call: {} objectives, {} messages",
            request.objectives.len(),
            request.messages.len()
        );

        let response = self
            .build_request(&self.config.evaluation_url)
            .json(request)
            .send()
            .await?;
        let response = ensure_success(response, call_start, "evaluator").await?;

        response
            .json::<EvaluationResponse>()
            .await
            .map_err(|e| ServiceError::Upstream(format!("evaluator response: {}", e)))
    }
}
