//! SQLite persistence layer.
//!
//! Each store is a thin borrow over an open [`Database`]; the runtime opens a
//! fresh connection per operation rather than holding one across awaits.

pub mod agents;
pub mod conversations;
pub mod database;
pub mod objectives;
pub mod usage;

pub use agents::{AgentRecord, AgentStore, MAX_AGENTS_PER_PLANET};
pub use conversations::{Conversation, ConversationStore, Message};
pub use database::Database;
pub use objectives::ObjectiveProgressStore;
pub use usage::UsageTracker;

use chrono::{DateTime, Utc};

/// Stored timestamps are rfc3339 strings; a corrupt value falls back to now
/// instead of failing the whole row.
pub(crate) fn parse_timestamp(value: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}
