//! Post-turn objective evaluation.
//!
//! Runs after the assistant reply, off the turn's critical path. Failures
//! here are logged and swallowed; they never surface to the student.

use std::path::Path;

use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, warn};

use crate::agent::config::Objective;
use crate::agent::events::{TurnEvent, REWARD_POINTS};
use crate::ai::types::{ChatMessage, EvaluationRequest, ObjectiveRef};
use crate::ai::ObjectiveEvaluator;
use crate::storage::{ConversationStore, Database, ObjectiveProgressStore};

/// How many recent messages the evaluator sees.
pub const EVALUATION_WINDOW: usize = 20;

/// Below this many messages there is nothing worth evaluating.
pub const MIN_EVALUATION_MESSAGES: usize = 2;

/// Evaluates recent conversation against the agent's objectives and
/// records at most one new hit, emitting [`TurnEvent::ObjectiveHit`] for it.
pub(crate) async fn run_evaluation_pass(
    evaluator: &dyn ObjectiveEvaluator,
    db_path: &Path,
    agent_id: &str,
    user_id: &str,
    conversation_id: &str,
    objectives: &[Objective],
    event_tx: &UnboundedSender<TurnEvent>,
) {
    if objectives.is_empty() {
        return;
    }

    let window = {
        let db = match Database::new(db_path) {
            Ok(db) => db,
            Err(e) => {
                warn!("evaluation pass skipped, database open failed: {}", e);
                return;
            }
        };
        match ConversationStore::new(&db).load_recent_messages(conversation_id, EVALUATION_WINDOW) {
            Ok(messages) => messages,
            Err(e) => {
                warn!("evaluation pass skipped, message load failed: {}", e);
                return;
            }
        }
    };

    if window.len() < MIN_EVALUATION_MESSAGES {
        debug!(
            conversation_id = %conversation_id,
            "too few messages for objective evaluation"
        );
        return;
    }

    let request = EvaluationRequest {
        objectives: objectives
            .iter()
            .enumerate()
            .map(|(index, o)| ObjectiveRef {
                index,
                text: o.text.clone(),
            })
            .collect(),
        messages: window
            .iter()
            .map(|m| ChatMessage {
                role: m.role,
                content: m.content.clone(),
            })
            .collect(),
    };

    let response = match evaluator.evaluate_objectives(&request).await {
        Ok(response) => response,
        Err(e) => {
            warn!(agent_id = %agent_id, "objective evaluation failed: {}", e);
            return;
        }
    };

    let mut hit = response.hit;
    hit.sort_unstable();
    hit.dedup();

    let db = match Database::new(db_path) {
        Ok(db) => db,
        Err(e) => {
            warn!("objective progress skipped, database open failed: {}", e);
            return;
        }
    };
    let progress = ObjectiveProgressStore::new(&db);

    for index in hit {
        if index >= objectives.len() {
            warn!(
                agent_id = %agent_id,
                index,
                "evaluator returned out-of-range objective index"
            );
            continue;
        }
        match progress.mark_hit(agent_id, user_id, index) {
            Ok(true) => {
                // One reward per pass keeps the celebration meaningful even
                // when the evaluator flags several objectives at once.
                let _ = event_tx.send(TurnEvent::ObjectiveHit {
                    index,
                    points: REWARD_POINTS,
                });
                break;
            }
            Ok(false) => {}
            Err(e) => {
                warn!(agent_id = %agent_id, index, "failed to record objective hit: {}", e);
            }
        }
    }
}
