//! Agent configuration wizard.
//!
//! A linear six-step flow that ends in an immutable [`AgentDraft`]. The
//! setup generator seeds objectives, guardrails, and scaffolding when the
//! educator advances past the describe step; everything stays editable
//! until `finish`.

use thiserror::Error;
use tracing::warn;

use crate::agent::config::{
    AgentConfig, AgentDraft, AgentType, Guardrails, Objective, ScaffoldingLevel, SourceSelection,
};
use crate::ai::types::SetupRequest;
use crate::ai::SetupGenerator;
use crate::error::ServiceError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WizardStep {
    Describe,
    Objectives,
    Sources,
    Guardrails,
    Scaffolding,
    Review,
}

impl WizardStep {
    /// 1-based position for progress display.
    pub fn number(&self) -> usize {
        match self {
            Self::Describe => 1,
            Self::Objectives => 2,
            Self::Sources => 3,
            Self::Guardrails => 4,
            Self::Scaffolding => 5,
            Self::Review => 6,
        }
    }

    fn next(&self) -> Option<Self> {
        match self {
            Self::Describe => Some(Self::Objectives),
            Self::Objectives => Some(Self::Sources),
            Self::Sources => Some(Self::Guardrails),
            Self::Guardrails => Some(Self::Scaffolding),
            Self::Scaffolding => Some(Self::Review),
            Self::Review => None,
        }
    }

    fn previous(&self) -> Option<Self> {
        match self {
            Self::Describe => None,
            Self::Objectives => Some(Self::Describe),
            Self::Sources => Some(Self::Objectives),
            Self::Guardrails => Some(Self::Sources),
            Self::Scaffolding => Some(Self::Guardrails),
            Self::Review => Some(Self::Scaffolding),
        }
    }
}

#[derive(Debug, Error)]
pub enum WizardError {
    /// The current step's required fields are not filled in.
    #[error("step {} is incomplete", .0.number())]
    StepIncomplete(WizardStep),

    #[error("already at the final step")]
    AtFinalStep,

    #[error(transparent)]
    Generation(#[from] ServiceError),
}

/// Outcome of a scaffolding level change request.
#[derive(Debug, PartialEq, Eq)]
pub enum LevelChangeOutcome {
    /// Behaviors were regenerated for the new level.
    Applied,
    /// The educator edited behaviors by hand; confirm before overwriting.
    ConfirmationRequired,
    /// Same level as before, nothing to do.
    Unchanged,
}

pub struct AgentWizard {
    step: WizardStep,
    agent_type: Option<AgentType>,
    name: String,
    description: String,
    objectives: Vec<Objective>,
    guardrails: Guardrails,
    scaffolding_level: ScaffoldingLevel,
    behaviors: Vec<String>,
    sources: SourceSelection,
    available_sources: usize,
    /// Set once the educator touches the generated behaviors by hand.
    behaviors_edited: bool,
    pending_level_change: Option<ScaffoldingLevel>,
}

impl AgentWizard {
    /// `available_sources` is how many sources the planet offers; with zero
    /// the sources step has nothing to select and always passes.
    pub fn new(available_sources: usize) -> Self {
        Self {
            step: WizardStep::Describe,
            agent_type: None,
            name: String::new(),
            description: String::new(),
            objectives: Vec::new(),
            guardrails: Guardrails::default(),
            scaffolding_level: ScaffoldingLevel::Medium,
            behaviors: Vec::new(),
            sources: SourceSelection::All,
            available_sources,
            behaviors_edited: false,
            pending_level_change: None,
        }
    }

    pub fn step(&self) -> WizardStep {
        self.step
    }

    pub fn set_agent_type(&mut self, agent_type: AgentType) {
        self.agent_type = Some(agent_type);
    }

    pub fn set_name(&mut self, name: &str) {
        self.name = name.to_string();
    }

    pub fn set_description(&mut self, description: &str) {
        self.description = description.to_string();
    }

    pub fn objectives(&self) -> &[Objective] {
        &self.objectives
    }

    pub fn set_objectives(&mut self, objectives: Vec<Objective>) {
        self.objectives = objectives;
    }

    pub fn guardrails(&self) -> &Guardrails {
        &self.guardrails
    }

    pub fn guardrails_mut(&mut self) -> &mut Guardrails {
        &mut self.guardrails
    }

    pub fn set_sources(&mut self, sources: SourceSelection) {
        self.sources = sources;
    }

    pub fn scaffolding_level(&self) -> ScaffoldingLevel {
        self.scaffolding_level
    }

    pub fn behaviors(&self) -> &[String] {
        &self.behaviors
    }

    /// Replaces the behavior list and marks it as hand-edited.
    pub fn set_behaviors(&mut self, behaviors: Vec<String>) {
        self.behaviors = behaviors;
        self.behaviors_edited = true;
    }

    pub fn can_advance(&self) -> bool {
        match self.step {
            WizardStep::Describe => {
                self.agent_type.is_some()
                    && !self.name.trim().is_empty()
                    && !self.description.trim().is_empty()
            }
            WizardStep::Objectives => self.objectives.iter().any(|o| !o.text.trim().is_empty()),
            WizardStep::Sources => match &self.sources {
                SourceSelection::All => true,
                SourceSelection::Selected { ids } => {
                    !ids.is_empty() || self.available_sources == 0
                }
            },
            WizardStep::Guardrails | WizardStep::Scaffolding | WizardStep::Review => true,
        }
    }

    /// Moves to the next step. Leaving the describe step calls the setup
    /// generator and seeds the editable fields from its response; a
    /// generation failure keeps the wizard on the describe step.
    pub async fn advance(&mut self, generator: &dyn SetupGenerator) -> Result<(), WizardError> {
        if !self.can_advance() {
            return Err(WizardError::StepIncomplete(self.step));
        }
        let next = self.step.next().ok_or(WizardError::AtFinalStep)?;

        if self.step == WizardStep::Describe {
            let setup = generator.generate_setup(&self.setup_request(None)).await?;
            self.objectives = setup
                .learning_objectives
                .into_iter()
                .map(|text| Objective {
                    text,
                    visible: true,
                })
                .collect();
            self.guardrails = setup.guardrails;
            self.scaffolding_level = setup.scaffolding.level;
            self.behaviors = setup.scaffolding.behaviors;
            self.behaviors_edited = false;
        }

        self.step = next;
        Ok(())
    }

    /// Moves back one step without losing any state.
    pub fn back(&mut self) {
        if let Some(previous) = self.step.previous() {
            self.step = previous;
        }
    }

    /// Requests a scaffolding level change.
    ///
    /// When the behaviors are untouched the new level's behaviors are
    /// regenerated immediately. Hand-edited behaviors are never overwritten
    /// without an explicit [`confirm_level_change`](Self::confirm_level_change).
    pub async fn request_level_change(
        &mut self,
        level: ScaffoldingLevel,
        generator: &dyn SetupGenerator,
    ) -> Result<LevelChangeOutcome, WizardError> {
        if level == self.scaffolding_level {
            return Ok(LevelChangeOutcome::Unchanged);
        }
        if self.behaviors_edited {
            self.pending_level_change = Some(level);
            return Ok(LevelChangeOutcome::ConfirmationRequired);
        }
        self.regenerate_behaviors(level, generator).await?;
        Ok(LevelChangeOutcome::Applied)
    }

    /// Applies a pending level change, discarding the hand-edited behaviors.
    pub async fn confirm_level_change(
        &mut self,
        generator: &dyn SetupGenerator,
    ) -> Result<(), WizardError> {
        let Some(level) = self.pending_level_change.take() else {
            return Ok(());
        };
        if let Err(e) = self.regenerate_behaviors(level, generator).await {
            // Keep the confirmation pending so the educator can retry.
            self.pending_level_change = Some(level);
            return Err(e);
        }
        Ok(())
    }

    /// Abandons a pending level change, keeping level and behaviors as-is.
    pub fn cancel_level_change(&mut self) {
        self.pending_level_change = None;
    }

    pub fn pending_level_change(&self) -> Option<ScaffoldingLevel> {
        self.pending_level_change
    }

    async fn regenerate_behaviors(
        &mut self,
        level: ScaffoldingLevel,
        generator: &dyn SetupGenerator,
    ) -> Result<(), WizardError> {
        let setup = generator
            .generate_setup(&self.setup_request(Some(level)))
            .await?;
        self.scaffolding_level = level;
        self.behaviors = setup.scaffolding.behaviors;
        self.behaviors_edited = false;
        Ok(())
    }

    fn setup_request(&self, level: Option<ScaffoldingLevel>) -> SetupRequest {
        SetupRequest {
            agent_type: self
                .agent_type
                .map(|t| t.as_str().to_string())
                .unwrap_or_default(),
            agent_name: self.name.trim().to_string(),
            description: self.description.trim().to_string(),
            scaffolding_level: level,
        }
    }

    /// Finalizes the wizard into an immutable creation payload.
    pub fn finish(self) -> Result<AgentDraft, WizardError> {
        if self.step != WizardStep::Review {
            return Err(WizardError::StepIncomplete(self.step));
        }
        let Some(agent_type) = self.agent_type else {
            warn!("wizard reached review without an agent type");
            return Err(WizardError::StepIncomplete(WizardStep::Describe));
        };

        let objectives: Vec<Objective> = self
            .objectives
            .into_iter()
            .filter(|o| !o.text.trim().is_empty())
            .collect();

        Ok(AgentDraft::new(AgentConfig {
            agent_type,
            name: self.name.trim().to_string(),
            description: self.description.trim().to_string(),
            objectives,
            guardrails: self.guardrails,
            scaffolding_level: self.scaffolding_level,
            scaffolding_behaviors: self.behaviors,
            sources: self.sources,
        }))
    }
}
