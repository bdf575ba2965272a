//! SQLite database handle and schema.

use std::path::Path;

use anyhow::Result;
use rusqlite::Connection;

/// Database handle. Opened per operation from a path; the connection is
/// never shared across tasks.
pub struct Database {
    conn: Connection,
}

impl Database {
    pub fn new(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Self::init_schema(&conn)?;
        Ok(Self { conn })
    }

    /// Get reference to underlying connection
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS agents (
                id TEXT PRIMARY KEY,
                owner_id TEXT NOT NULL,
                planet_id TEXT NOT NULL,
                agent_type TEXT NOT NULL,
                name TEXT NOT NULL,
                config TEXT NOT NULL,
                invocation_count INTEGER NOT NULL DEFAULT 0,
                distinct_user_count INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_agents_planet ON agents(planet_id);

            CREATE TABLE IF NOT EXISTS conversations (
                id TEXT PRIMARY KEY,
                agent_id TEXT NOT NULL REFERENCES agents(id),
                planet_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE(agent_id, user_id)
            );

            CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                conversation_id TEXT NOT NULL
                    REFERENCES conversations(id) ON DELETE CASCADE,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_messages_conversation
                ON messages(conversation_id);

            CREATE TABLE IF NOT EXISTS objective_progress (
                agent_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                objective_index INTEGER NOT NULL,
                status TEXT NOT NULL DEFAULT 'hit',
                hit_at TEXT,
                PRIMARY KEY (agent_id, user_id, objective_index)
            );

            CREATE TABLE IF NOT EXISTS usage_records (
                agent_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                first_used_at TEXT NOT NULL,
                PRIMARY KEY (agent_id, user_id)
            );",
        )?;
        Ok(())
    }
}
