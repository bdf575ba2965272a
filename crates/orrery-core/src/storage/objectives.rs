//! Objective progress persistence.
//!
//! A row in objective_progress marks one (agent, user, objective) as hit.
//! Presence is the fact; the insert's affected-row count tells callers
//! whether this was the first time, which is what gates rewards.

use anyhow::Result;
use chrono::Utc;
use rusqlite::params;

use super::database::Database;

pub struct ObjectiveProgressStore<'a> {
    db: &'a Database,
}

impl<'a> ObjectiveProgressStore<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Marks an objective as hit. Returns true only on the first hit.
    pub fn mark_hit(&self, agent_id: &str, user_id: &str, objective_index: usize) -> Result<bool> {
        let inserted = self.db.conn().execute(
            "INSERT OR IGNORE INTO objective_progress (agent_id, user_id, objective_index, hit_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                agent_id,
                user_id,
                objective_index as i64,
                Utc::now().to_rfc3339()
            ],
        )?;
        Ok(inserted > 0)
    }

    pub fn is_hit(&self, agent_id: &str, user_id: &str, objective_index: usize) -> Result<bool> {
        let hit: bool = self.db.conn().query_row(
            "SELECT EXISTS(
                 SELECT 1 FROM objective_progress
                 WHERE agent_id = ?1 AND user_id = ?2 AND objective_index = ?3
             )",
            params![agent_id, user_id, objective_index as i64],
            |row| row.get(0),
        )?;
        Ok(hit)
    }

    /// Indices of every objective this user has hit, ascending.
    pub fn hit_indices(&self, agent_id: &str, user_id: &str) -> Result<Vec<usize>> {
        let mut stmt = self.db.conn().prepare(
            "SELECT objective_index FROM objective_progress
             WHERE agent_id = ?1 AND user_id = ?2
             ORDER BY objective_index",
        )?;
        let rows = stmt.query_map(params![agent_id, user_id], |row| row.get::<_, i64>(0))?;
        let mut indices = Vec::new();
        for index in rows {
            indices.push(index? as usize);
        }
        Ok(indices)
    }
}
