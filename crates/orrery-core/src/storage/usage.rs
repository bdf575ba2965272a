//! Per-agent usage counters.
//!
//! `invocation_count` counts every turn; `distinct_user_count` counts each
//! user once, keyed by a presence row in `usage_records`. Both counters are
//! bumped with in-database increments so concurrent turns never lose updates.

use anyhow::Result;
use chrono::Utc;
use rusqlite::params;

use super::database::Database;

pub struct UsageTracker<'a> {
    db: &'a Database,
}

impl<'a> UsageTracker<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Records one turn for `user_id` against `agent_id`.
    ///
    /// The usage_records conflict is the steady state: every turn after a
    /// user's first is ignored there, and only the invocation counter moves.
    pub fn record_turn(&self, agent_id: &str, user_id: &str) -> Result<()> {
        let inserted = self.db.conn().execute(
            "INSERT OR IGNORE INTO usage_records (agent_id, user_id, first_used_at)
             VALUES (?1, ?2, ?3)",
            params![agent_id, user_id, Utc::now().to_rfc3339()],
        )?;
        if inserted > 0 {
            self.db.conn().execute(
                "UPDATE agents SET distinct_user_count = distinct_user_count + 1 WHERE id = ?1",
                params![agent_id],
            )?;
        }
        self.db.conn().execute(
            "UPDATE agents SET invocation_count = invocation_count + 1 WHERE id = ?1",
            params![agent_id],
        )?;
        Ok(())
    }
}
