//! Agent runtime: configuration model, prompt assembly, transcript state,
//! and the turn orchestrator.

pub mod config;
pub mod events;
pub mod objectives;
pub mod orchestrator;
pub mod prompt;
pub mod transcript;

pub use config::{
    AgentConfig, AgentDraft, AgentType, Guardrails, Objective, ScaffoldingLevel, SourceSelection,
};
pub use events::{ErrorKind, TurnEvent, REWARD_POINTS};
pub use objectives::{EVALUATION_WINDOW, MIN_EVALUATION_MESSAGES};
pub use orchestrator::{OrchestratorConfig, OrchestratorServices, TutorOrchestrator};
pub use prompt::build_system_prompt;
pub use transcript::{Transcript, TranscriptEntry};
