//! Turn orchestration.
//!
//! `TutorOrchestrator` drives one student/agent conversation: it validates
//! and persists the user message, streams the assistant reply, persists the
//! finished reply, and runs the objective evaluation pass. Each turn reports
//! progress over an unbounded event channel that always terminates with
//! [`TurnEvent::Finished`].

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{info, warn};

use crate::agent::config::AgentConfig;
use crate::agent::events::{ErrorKind, TurnEvent};
use crate::agent::objectives::run_evaluation_pass;
use crate::agent::prompt::build_system_prompt;
use crate::agent::transcript::Transcript;
use crate::ai::types::{ChatMessage, Role, StreamPart};
use crate::ai::{CompletionService, ObjectiveEvaluator};
use crate::error::{ServiceError, TurnError};
use crate::storage::{ConversationStore, Database, Message, UsageTracker};

/// Identity of one orchestrated conversation.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub agent_id: String,
    pub user_id: String,
    pub planet_id: String,
    /// Objective index the student chose to work toward, if any.
    pub focused_objective: Option<usize>,
    /// Pre-retrieved course material for the system instruction.
    pub source_context: Option<String>,
}

/// Injected collaborators for the orchestrator.
#[derive(Clone)]
pub struct OrchestratorServices {
    pub completion: Arc<dyn CompletionService>,
    pub evaluator: Arc<dyn ObjectiveEvaluator>,
    pub db_path: PathBuf,
}

pub struct TutorOrchestrator {
    services: OrchestratorServices,
    config: OrchestratorConfig,
    agent_config: AgentConfig,
    transcript: Arc<Mutex<Transcript>>,
    in_flight: Arc<AtomicBool>,
}

/// Clears the in-flight flag when the turn task ends, however it ends.
struct InFlightGuard(Arc<AtomicBool>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl TutorOrchestrator {
    pub fn new(
        services: OrchestratorServices,
        config: OrchestratorConfig,
        agent_config: AgentConfig,
    ) -> Self {
        Self {
            services,
            config,
            agent_config,
            transcript: Arc::new(Mutex::new(Transcript::new())),
            in_flight: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Loads persisted history into the in-memory transcript.
    pub fn hydrate_transcript(&self) -> Result<(), TurnError> {
        let db = Database::new(&self.services.db_path).map_err(TurnError::Persistence)?;
        let store = ConversationStore::new(&db);
        let conversation = store
            .get_or_create(
                &self.config.agent_id,
                &self.config.user_id,
                &self.config.planet_id,
            )
            .map_err(TurnError::Persistence)?;
        let messages = store
            .load_messages(&conversation.id)
            .map_err(TurnError::Persistence)?;
        with_transcript(&self.transcript, |t| t.hydrate(&messages));
        Ok(())
    }

    /// Deletes the conversation's messages and empties the transcript.
    pub fn clear_conversation(&self) -> Result<(), TurnError> {
        let db = Database::new(&self.services.db_path).map_err(TurnError::Persistence)?;
        let store = ConversationStore::new(&db);
        let conversation = store
            .get_or_create(
                &self.config.agent_id,
                &self.config.user_id,
                &self.config.planet_id,
            )
            .map_err(TurnError::Persistence)?;
        store
            .clear(&conversation.id)
            .map_err(TurnError::Persistence)?;
        with_transcript(&self.transcript, |t| t.clear());
        Ok(())
    }

    pub fn transcript(&self) -> Arc<Mutex<Transcript>> {
        Arc::clone(&self.transcript)
    }

    /// Starts one turn for `user_text`.
    ///
    /// Rejects empty input and overlapping turns synchronously; everything
    /// that goes wrong after that is reported as `TurnEvent::Error` on the
    /// returned channel, which always ends with `TurnEvent::Finished`.
    ///
    /// The turn is considered complete once the assistant reply is durably
    /// appended: the next `send_turn` is accepted from that point, while
    /// the objective evaluation pass finishes in the background and may
    /// still emit `ObjectiveHit` before the channel closes.
    pub fn send_turn(&self, user_text: &str) -> Result<UnboundedReceiver<TurnEvent>, TurnError> {
        let user_text = user_text.trim().to_string();
        if user_text.is_empty() {
            return Err(TurnError::Validation("message is empty".to_string()));
        }

        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(TurnError::Validation(
                "a turn is already in flight for this conversation".to_string(),
            ));
        }
        let guard = InFlightGuard(Arc::clone(&self.in_flight));

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let services = self.services.clone();
        let config = self.config.clone();
        let agent_config = self.agent_config.clone();
        let transcript = Arc::clone(&self.transcript);

        tokio::spawn(async move {
            match run_turn(&services, &config, &agent_config, transcript, user_text, &event_tx)
                .await
            {
                Ok(conversation_id) => {
                    // The reply is durable at this point. Release the turn
                    // before the evaluation pass so the next message is not
                    // gated on the evaluator's latency.
                    drop(guard);
                    tokio::spawn(async move {
                        run_evaluation_pass(
                            services.evaluator.as_ref(),
                            &services.db_path,
                            &config.agent_id,
                            &config.user_id,
                            &conversation_id,
                            &agent_config.objectives,
                            &event_tx,
                        )
                        .await;
                        let _ = event_tx.send(TurnEvent::Finished);
                    });
                }
                Err(e) => {
                    let _guard = guard;
                    let kind = ErrorKind::from_turn_error(&e);
                    warn!("turn failed: {}", e);
                    let _ = event_tx.send(TurnEvent::Error {
                        kind,
                        notice: kind.user_notice().to_string(),
                        detail: e.to_string(),
                    });
                    let _ = event_tx.send(TurnEvent::Finished);
                }
            }
        });

        Ok(event_rx)
    }
}

/// Runs one turn up to the durably persisted reply, returning the
/// conversation id so the caller can chase it with the evaluation pass.
async fn run_turn(
    services: &OrchestratorServices,
    config: &OrchestratorConfig,
    agent_config: &AgentConfig,
    transcript: Arc<Mutex<Transcript>>,
    user_text: String,
    event_tx: &UnboundedSender<TurnEvent>,
) -> Result<String, TurnError> {
    // Persist the user message and collect the outbound history while the
    // connection is open, then drop it before any await.
    let (conversation_id, history) = {
        let db = Database::new(&services.db_path).map_err(TurnError::Persistence)?;
        let store = ConversationStore::new(&db);
        let conversation = store
            .get_or_create(&config.agent_id, &config.user_id, &config.planet_id)
            .map_err(TurnError::Persistence)?;
        let user_message = store
            .append_message(&conversation.id, Role::User, &user_text)
            .map_err(TurnError::Persistence)?;
        with_transcript(&transcript, |t| t.push_persisted(&user_message));

        // Usage counters are best effort; a failed bump never blocks a turn.
        if let Err(e) = UsageTracker::new(&db).record_turn(&config.agent_id, &config.user_id) {
            warn!(agent_id = %config.agent_id, "failed to record usage: {}", e);
        }

        let history = store
            .load_messages(&conversation.id)
            .map_err(TurnError::Persistence)?;
        (conversation.id, history)
    };

    let outbound: Vec<ChatMessage> = history
        .iter()
        .filter(|m| m.role != Role::System)
        .map(|m| ChatMessage {
            role: m.role,
            content: m.content.clone(),
        })
        .collect();
    let system_prompt = build_system_prompt(
        agent_config,
        config.focused_objective,
        config.source_context.as_deref(),
    );

    let mut stream = services
        .completion
        .stream_chat(&outbound, &system_prompt)
        .await?;

    let mut reply = String::new();
    while let Some(part) = stream.recv().await {
        match part {
            StreamPart::TextDelta { delta } => {
                reply.push_str(&delta);
                with_transcript(&transcript, |t| t.replace_streaming_tail(&reply));
                let _ = event_tx.send(TurnEvent::TextDelta { delta });
            }
            StreamPart::Error { error } => {
                with_transcript(&transcript, |t| t.discard_streaming_tail());
                return Err(TurnError::Service(ServiceError::Upstream(error)));
            }
        }
    }

    if reply.trim().is_empty() {
        info!(conversation_id = %conversation_id, "completion stream produced no text");
        with_transcript(&transcript, |t| t.discard_streaming_tail());
    } else {
        let assistant_message = persist_assistant_reply(&services.db_path, &conversation_id, &reply)
            .map_err(TurnError::Persistence)?;
        with_transcript(&transcript, |t| t.promote_streaming_tail(&assistant_message));
        let _ = event_tx.send(TurnEvent::AssistantComplete {
            message_id: assistant_message.id,
            text: assistant_message.content,
        });
    }

    Ok(conversation_id)
}

fn persist_assistant_reply(
    db_path: &std::path::Path,
    conversation_id: &str,
    reply: &str,
) -> anyhow::Result<Message> {
    let db = Database::new(db_path)?;
    ConversationStore::new(&db).append_message(conversation_id, Role::Assistant, reply)
}

/// Runs `f` against the shared transcript, recovering a poisoned lock
/// instead of propagating the panic.
fn with_transcript<R>(transcript: &Mutex<Transcript>, f: impl FnOnce(&mut Transcript) -> R) -> R {
    match transcript.lock() {
        Ok(mut guard) => f(&mut guard),
        Err(poisoned) => {
            warn!("transcript lock poisoned, continuing with recovered state");
            f(&mut poisoned.into_inner())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::config::{
        AgentDraft, AgentType, Guardrails, Objective, ScaffoldingLevel, SourceSelection,
    };
    use crate::agent::events::REWARD_POINTS;
    use crate::ai::types::{EvaluationRequest, EvaluationResponse};
    use crate::storage::AgentStore;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use tempfile::TempDir;

    struct FakeCompletion {
        scripts: Mutex<VecDeque<Result<Vec<StreamPart>, ServiceError>>>,
    }

    impl FakeCompletion {
        fn scripted(scripts: Vec<Result<Vec<StreamPart>, ServiceError>>) -> Self {
            Self {
                scripts: Mutex::new(scripts.into_iter().collect()),
            }
        }

        fn streaming(parts: Vec<StreamPart>) -> Self {
            Self::scripted(vec![Ok(parts)])
        }
    }

    #[async_trait]
    impl CompletionService for FakeCompletion {
        async fn stream_chat(
            &self,
            _messages: &[ChatMessage],
            _system_prompt: &str,
        ) -> Result<mpsc::UnboundedReceiver<StreamPart>, ServiceError> {
            let script = self
                .scripts
                .lock()
                .expect("scripts lock")
                .pop_front()
                .expect("unscripted stream_chat call");
            let parts = script?;
            let (tx, rx) = mpsc::unbounded_channel();
            for part in parts {
                tx.send(part).expect("send scripted part");
            }
            Ok(rx)
        }
    }

    struct FakeEvaluator {
        hit: Vec<usize>,
    }

    #[async_trait]
    impl ObjectiveEvaluator for FakeEvaluator {
        async fn evaluate_objectives(
            &self,
            _request: &EvaluationRequest,
        ) -> Result<EvaluationResponse, ServiceError> {
            Ok(EvaluationResponse {
                hit: self.hit.clone(),
            })
        }
    }

    struct Fixture {
        _dir: TempDir,
        db_path: PathBuf,
        agent_id: String,
        agent_config: AgentConfig,
    }

    fn setup(objectives: Vec<Objective>) -> Fixture {
        let dir = TempDir::new().expect("create temp dir");
        let db_path = dir.path().join("test.db");
        let db = Database::new(&db_path).expect("create database");

        let config = AgentConfig {
            agent_type: AgentType::Tutor,
            name: "Kepler".to_string(),
            description: "Orbital mechanics tutor".to_string(),
            objectives,
            guardrails: Guardrails::default(),
            scaffolding_level: ScaffoldingLevel::Medium,
            scaffolding_behaviors: Vec::new(),
            sources: SourceSelection::All,
        };
        let agent = AgentStore::new(&db)
            .create(AgentDraft::new(config.clone()), "owner-1", "planet-1")
            .expect("create agent");

        Fixture {
            _dir: dir,
            db_path,
            agent_id: agent.id,
            agent_config: config,
        }
    }

    fn orchestrator(
        fx: &Fixture,
        completion: FakeCompletion,
        evaluator: impl ObjectiveEvaluator + 'static,
    ) -> TutorOrchestrator {
        TutorOrchestrator::new(
            OrchestratorServices {
                completion: Arc::new(completion),
                evaluator: Arc::new(evaluator),
                db_path: fx.db_path.clone(),
            },
            OrchestratorConfig {
                agent_id: fx.agent_id.clone(),
                user_id: "user-1".to_string(),
                planet_id: "planet-1".to_string(),
                focused_objective: None,
                source_context: None,
            },
            fx.agent_config.clone(),
        )
    }

    async fn collect(mut rx: UnboundedReceiver<TurnEvent>) -> Vec<TurnEvent> {
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        events
    }

    fn delta(text: &str) -> StreamPart {
        StreamPart::TextDelta {
            delta: text.to_string(),
        }
    }

    #[tokio::test]
    async fn turn_streams_persists_and_finishes() {
        let fx = setup(Vec::new());
        let orch = orchestrator(
            &fx,
            FakeCompletion::streaming(vec![delta("Hel"), delta("lo there")]),
            FakeEvaluator { hit: Vec::new() },
        );

        let events = collect(orch.send_turn("What is an orbit?").expect("start turn")).await;

        assert_eq!(
            events,
            vec![
                TurnEvent::TextDelta {
                    delta: "Hel".to_string()
                },
                TurnEvent::TextDelta {
                    delta: "lo there".to_string()
                },
                TurnEvent::AssistantComplete {
                    message_id: 2,
                    text: "Hello there".to_string()
                },
                TurnEvent::Finished,
            ]
        );

        // Both sides of the exchange are persisted in order.
        let db = Database::new(&fx.db_path).expect("open database");
        let store = ConversationStore::new(&db);
        let conversation = store
            .get_or_create(&fx.agent_id, "user-1", "planet-1")
            .expect("conversation");
        let messages = store.load_messages(&conversation.id).expect("messages");
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::User);
        assert_eq!(messages[0].content, "What is an orbit?");
        assert_eq!(messages[1].role, Role::Assistant);
        assert_eq!(messages[1].content, "Hello there");

        // The transcript tail was promoted to the persisted message.
        let transcript = orch.transcript();
        let transcript = transcript.lock().expect("transcript lock");
        assert_eq!(transcript.entries().len(), 2);
        assert_eq!(transcript.entries()[1].id, Some(2));
    }

    #[tokio::test]
    async fn empty_input_is_rejected_synchronously() {
        let fx = setup(Vec::new());
        let orch = orchestrator(
            &fx,
            FakeCompletion::streaming(vec![]),
            FakeEvaluator { hit: Vec::new() },
        );

        assert!(matches!(
            orch.send_turn("   \n  "),
            Err(TurnError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn overlapping_turns_are_rejected() {
        let fx = setup(Vec::new());
        let orch = orchestrator(
            &fx,
            FakeCompletion::scripted(vec![Ok(vec![delta("reply")]), Ok(vec![delta("again")])]),
            FakeEvaluator { hit: Vec::new() },
        );

        // On a current-thread runtime the first turn's task has not run yet,
        // so the in-flight flag is still held when the second call arrives.
        let first = orch.send_turn("first").expect("start first turn");
        assert!(matches!(
            orch.send_turn("second"),
            Err(TurnError::Validation(_))
        ));

        let events = collect(first).await;
        assert_eq!(events.last(), Some(&TurnEvent::Finished));

        // The flag clears once the turn finishes.
        let second = orch.send_turn("second").expect("start second turn");
        drop(second);
    }

    #[tokio::test]
    async fn mid_stream_error_reports_and_discards_partial_reply() {
        let fx = setup(Vec::new());
        let orch = orchestrator(
            &fx,
            FakeCompletion::streaming(vec![
                delta("partial"),
                StreamPart::Error {
                    error: "connection reset".to_string(),
                },
            ]),
            FakeEvaluator { hit: Vec::new() },
        );

        let events = collect(orch.send_turn("hello").expect("start turn")).await;

        assert_eq!(events.len(), 3);
        assert!(matches!(
            &events[1],
            TurnEvent::Error {
                kind: ErrorKind::Upstream,
                ..
            }
        ));
        assert_eq!(events[2], TurnEvent::Finished);

        // Only the user message survives; the partial reply is gone from
        // both the log and the transcript.
        let db = Database::new(&fx.db_path).expect("open database");
        let store = ConversationStore::new(&db);
        let conversation = store
            .get_or_create(&fx.agent_id, "user-1", "planet-1")
            .expect("conversation");
        let messages = store.load_messages(&conversation.id).expect("messages");
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, Role::User);

        let transcript = orch.transcript();
        let transcript = transcript.lock().expect("transcript lock");
        assert_eq!(transcript.entries().len(), 1);
    }

    #[tokio::test]
    async fn rate_limit_surfaces_typed_error_with_notice() {
        let fx = setup(Vec::new());
        let orch = orchestrator(
            &fx,
            FakeCompletion::scripted(vec![Err(ServiceError::RateLimited)]),
            FakeEvaluator { hit: Vec::new() },
        );

        let events = collect(orch.send_turn("hello").expect("start turn")).await;

        match &events[0] {
            TurnEvent::Error { kind, notice, .. } => {
                assert_eq!(*kind, ErrorKind::RateLimited);
                assert_eq!(notice, ErrorKind::RateLimited.user_notice());
            }
            other => panic!("expected error event, got {:?}", other),
        }
        assert_eq!(events[1], TurnEvent::Finished);
    }

    #[tokio::test]
    async fn objective_hit_arrives_before_finished() {
        let fx = setup(vec![Objective {
            text: "Explain Kepler's first law".to_string(),
            visible: true,
        }]);
        let orch = orchestrator(
            &fx,
            FakeCompletion::streaming(vec![delta("Ellipses, with the sun at one focus.")]),
            FakeEvaluator { hit: vec![0] },
        );

        let events = collect(orch.send_turn("What shape are orbits?").expect("start turn")).await;

        let hit_pos = events
            .iter()
            .position(|e| {
                matches!(
                    e,
                    TurnEvent::ObjectiveHit {
                        index: 0,
                        points: REWARD_POINTS
                    }
                )
            })
            .expect("objective hit event");
        let finished_pos = events
            .iter()
            .position(|e| *e == TurnEvent::Finished)
            .expect("finished event");
        assert!(hit_pos < finished_pos);
    }

    struct GatedEvaluator {
        gate: Arc<tokio::sync::Semaphore>,
    }

    #[async_trait]
    impl ObjectiveEvaluator for GatedEvaluator {
        async fn evaluate_objectives(
            &self,
            _request: &EvaluationRequest,
        ) -> Result<EvaluationResponse, ServiceError> {
            let _permit = self.gate.acquire().await.expect("gate open");
            Ok(EvaluationResponse { hit: Vec::new() })
        }
    }

    #[tokio::test]
    async fn next_turn_is_accepted_while_evaluation_still_runs() {
        let fx = setup(vec![Objective {
            text: "Explain Kepler's first law".to_string(),
            visible: true,
        }]);
        let gate = Arc::new(tokio::sync::Semaphore::new(0));
        let orch = orchestrator(
            &fx,
            FakeCompletion::scripted(vec![Ok(vec![delta("one")]), Ok(vec![delta("two")])]),
            GatedEvaluator {
                gate: Arc::clone(&gate),
            },
        );

        let mut first = orch.send_turn("first").expect("start first turn");
        loop {
            match first.recv().await.expect("first turn event") {
                TurnEvent::AssistantComplete { .. } => break,
                _ => {}
            }
        }

        // The reply is persisted but the evaluator is still held at the
        // gate; a new turn must not wait for it.
        let second = orch
            .send_turn("second")
            .expect("second turn accepted during evaluation");

        gate.add_permits(2);
        let remaining = collect(first).await;
        assert_eq!(remaining.last(), Some(&TurnEvent::Finished));
        let events = collect(second).await;
        assert_eq!(events.last(), Some(&TurnEvent::Finished));
    }

    #[tokio::test]
    async fn turns_bump_usage_counters() {
        let fx = setup(Vec::new());
        let orch = orchestrator(
            &fx,
            FakeCompletion::scripted(vec![
                Ok(vec![delta("one")]),
                Ok(vec![delta("two")]),
            ]),
            FakeEvaluator { hit: Vec::new() },
        );

        collect(orch.send_turn("first").expect("start turn")).await;
        collect(orch.send_turn("second").expect("start turn")).await;

        let db = Database::new(&fx.db_path).expect("open database");
        let agent = AgentStore::new(&db)
            .get(&fx.agent_id)
            .expect("get agent")
            .expect("agent present");
        assert_eq!(agent.invocation_count, 2);
        assert_eq!(agent.distinct_user_count, 1);
    }

    #[tokio::test]
    async fn empty_stream_persists_no_assistant_message() {
        let fx = setup(Vec::new());
        let orch = orchestrator(
            &fx,
            FakeCompletion::streaming(vec![]),
            FakeEvaluator { hit: Vec::new() },
        );

        let events = collect(orch.send_turn("hello").expect("start turn")).await;
        assert_eq!(events, vec![TurnEvent::Finished]);

        let db = Database::new(&fx.db_path).expect("open database");
        let store = ConversationStore::new(&db);
        let conversation = store
            .get_or_create(&fx.agent_id, "user-1", "planet-1")
            .expect("conversation");
        assert_eq!(store.message_count(&conversation.id).expect("count"), 1);
    }

    #[tokio::test]
    async fn hydrate_and_clear_round_trip() {
        let fx = setup(Vec::new());
        let orch = orchestrator(
            &fx,
            FakeCompletion::streaming(vec![delta("reply")]),
            FakeEvaluator { hit: Vec::new() },
        );

        collect(orch.send_turn("hello").expect("start turn")).await;

        orch.hydrate_transcript().expect("hydrate");
        {
            let transcript = orch.transcript();
            let transcript = transcript.lock().expect("transcript lock");
            assert_eq!(transcript.entries().len(), 2);
        }

        orch.clear_conversation().expect("clear");
        let transcript = orch.transcript();
        let transcript = transcript.lock().expect("transcript lock");
        assert!(transcript.entries().is_empty());
    }
}
