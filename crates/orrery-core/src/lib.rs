//! Orrery core library
//!
//! Runtime for planet-scoped AI tutoring agents: agent configuration and
//! the creation wizard, conversation persistence, streaming turn
//! orchestration, and objective progress tracking.

pub mod agent;
pub mod ai;
pub mod error;
pub mod storage;
pub mod wizard;

pub use agent::{TurnEvent, TutorOrchestrator};
pub use error::{ServiceError, TurnError};
