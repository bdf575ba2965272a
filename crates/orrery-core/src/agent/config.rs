//! Agent configuration model.
//!
//! Produced by the configuration wizard, persisted as JSON in the agents
//! table, and read-only to the runtime.

use serde::{Deserialize, Serialize};

/// Tutoring persona template. Keys the identity sentence of the system
/// instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentType {
    Tutor,
    StudyBuddy,
    QuizMaster,
    DebatePartner,
}

impl AgentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tutor => "tutor",
            Self::StudyBuddy => "study_buddy",
            Self::QuizMaster => "quiz_master",
            Self::DebatePartner => "debate_partner",
        }
    }

    /// Identity sentence opening the system instruction.
    pub fn identity(&self) -> &'static str {
        match self {
            Self::Tutor => {
                "You are a patient subject tutor who guides students toward \
                 understanding instead of handing out answers."
            }
            Self::StudyBuddy => {
                "You are a friendly study buddy who works through the material \
                 together with the student as a peer."
            }
            Self::QuizMaster => {
                "You are a quiz master who checks understanding with short \
                 questions and immediate feedback."
            }
            Self::DebatePartner => {
                "You are a debate partner who challenges the student's reasoning \
                 and makes them defend their position."
            }
        }
    }
}

/// One learning goal. `visible` controls whether students see it listed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Objective {
    pub text: String,
    #[serde(default = "default_true")]
    pub visible: bool,
}

fn default_true() -> bool {
    true
}

/// Guardrail flags plus a free-text avoid list, rendered as imperative
/// rules in the system instruction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Guardrails {
    #[serde(default)]
    pub no_direct_answers: bool,
    #[serde(default)]
    pub stay_on_topic: bool,
    #[serde(default)]
    pub age_appropriate: bool,
    #[serde(default)]
    pub no_personal_data: bool,
    #[serde(default)]
    pub cite_sources: bool,
    #[serde(default)]
    pub custom_avoid: Vec<String>,
}

/// How much step-by-step support the agent gives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScaffoldingLevel {
    Light,
    Medium,
    Heavy,
}

impl ScaffoldingLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Light => "light",
            Self::Medium => "medium",
            Self::Heavy => "heavy",
        }
    }
}

/// Which planet sources ground the agent's answers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum SourceSelection {
    All,
    Selected { ids: Vec<String> },
}

impl Default for SourceSelection {
    fn default() -> Self {
        Self::All
    }
}

/// Complete agent configuration as persisted in the agents table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    pub agent_type: AgentType,
    pub name: String,
    pub description: String,
    pub objectives: Vec<Objective>,
    pub guardrails: Guardrails,
    pub scaffolding_level: ScaffoldingLevel,
    pub scaffolding_behaviors: Vec<String>,
    #[serde(default)]
    pub sources: SourceSelection,
}

/// Immutable agent-creation payload produced by the wizard's final step.
///
/// The private field keeps the payload read-only between `finish()` and
/// the `AgentStore::create` call that consumes it.
#[derive(Debug, Clone)]
pub struct AgentDraft {
    config: AgentConfig,
}

impl AgentDraft {
    pub(crate) fn new(config: AgentConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }
}
