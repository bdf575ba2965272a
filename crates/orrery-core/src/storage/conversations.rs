//! Conversation and message persistence.
//!
//! One conversation per (agent, user) pair, with an append-only message
//! log. Insertion order is the canonical transcript order.

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use rusqlite::params;

use super::database::Database;
use crate::ai::types::Role;

/// The single persisted chat thread between one agent and one user.
#[derive(Debug, Clone)]
pub struct Conversation {
    pub id: String,
    pub agent_id: String,
    pub planet_id: String,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One persisted message in a conversation's log.
#[derive(Debug, Clone)]
pub struct Message {
    pub id: i64,
    pub conversation_id: String,
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// Conversation persistence store
pub struct ConversationStore<'a> {
    db: &'a Database,
}

impl<'a> ConversationStore<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Look up or lazily create the conversation for an (agent, user) pair.
    ///
    /// At most one conversation exists per pair. A racing insert loses to
    /// the UNIQUE index and falls back to re-fetching the winner's row
    /// instead of propagating the conflict.
    pub fn get_or_create(
        &self,
        agent_id: &str,
        user_id: &str,
        planet_id: &str,
    ) -> Result<Conversation> {
        if let Some(existing) = self.find_for_pair(agent_id, user_id)? {
            return Ok(existing);
        }

        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();
        let inserted = self.db.conn().execute(
            "INSERT OR IGNORE INTO conversations
                 (id, agent_id, planet_id, user_id, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![id, agent_id, planet_id, user_id, now, now],
        )?;

        if inserted == 0 {
            tracing::debug!(
                agent_id = %agent_id,
                "Conversation insert lost a race; re-fetching"
            );
        }

        self.find_for_pair(agent_id, user_id)?.ok_or_else(|| {
            anyhow!(
                "conversation for agent {} vanished between insert and fetch",
                agent_id
            )
        })
    }

    fn find_for_pair(&self, agent_id: &str, user_id: &str) -> Result<Option<Conversation>> {
        let row = self.db.conn().query_row(
            "SELECT id, agent_id, planet_id, user_id, created_at, updated_at
             FROM conversations WHERE agent_id = ?1 AND user_id = ?2",
            params![agent_id, user_id],
            map_conversation_row,
        );

        match row {
            Ok(c) => Ok(Some(c)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Append a message and bump the conversation's `updated_at`.
    /// Returns the persisted record with its server-assigned id.
    pub fn append_message(
        &self,
        conversation_id: &str,
        role: Role,
        content: &str,
    ) -> Result<Message> {
        let now = Utc::now();
        let now_str = now.to_rfc3339();

        self.db.conn().execute(
            "INSERT INTO messages (conversation_id, role, content, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![conversation_id, role.as_str(), content, now_str],
        )?;
        let id = self.db.conn().last_insert_rowid();

        self.db.conn().execute(
            "UPDATE conversations SET updated_at = ?1 WHERE id = ?2",
            params![now_str, conversation_id],
        )?;

        Ok(Message {
            id,
            conversation_id: conversation_id.to_string(),
            role,
            content: content.to_string(),
            created_at: now,
        })
    }

    /// Load the full transcript in append order.
    pub fn load_messages(&self, conversation_id: &str) -> Result<Vec<Message>> {
        let mut stmt = self.db.conn().prepare(
            "SELECT id, conversation_id, role, content, created_at
             FROM messages WHERE conversation_id = ?1 ORDER BY id",
        )?;
        let rows = stmt
            .query_map([conversation_id], map_raw_message_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(finish_message_row).collect()
    }

    /// Load the last `limit` messages, oldest first.
    pub fn load_recent_messages(
        &self,
        conversation_id: &str,
        limit: usize,
    ) -> Result<Vec<Message>> {
        let mut stmt = self.db.conn().prepare(
            "SELECT id, conversation_id, role, content, created_at FROM (
                 SELECT id, conversation_id, role, content, created_at
                 FROM messages WHERE conversation_id = ?1
                 ORDER BY id DESC LIMIT ?2
             ) ORDER BY id",
        )?;
        let rows = stmt
            .query_map(params![conversation_id, limit as i64], map_raw_message_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(finish_message_row).collect()
    }

    /// Total message count for a conversation (for paging UI).
    pub fn message_count(&self, conversation_id: &str) -> Result<usize> {
        let count: i64 = self.db.conn().query_row(
            "SELECT COUNT(*) FROM messages WHERE conversation_id = ?1",
            [conversation_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Delete all messages for a conversation. The conversation row itself
    /// stays so the (agent, user) pairing survives a cleared history.
    pub fn clear(&self, conversation_id: &str) -> Result<()> {
        self.db.conn().execute(
            "DELETE FROM messages WHERE conversation_id = ?1",
            [conversation_id],
        )?;
        tracing::info!(conversation_id = %conversation_id, "Conversation cleared");
        Ok(())
    }
}

fn map_conversation_row(row: &rusqlite::Row) -> rusqlite::Result<Conversation> {
    let created_at: String = row.get(4)?;
    let updated_at: String = row.get(5)?;
    Ok(Conversation {
        id: row.get(0)?,
        agent_id: row.get(1)?,
        planet_id: row.get(2)?,
        user_id: row.get(3)?,
        created_at: super::parse_timestamp(&created_at),
        updated_at: super::parse_timestamp(&updated_at),
    })
}

type RawMessageRow = (i64, String, String, String, String);

fn map_raw_message_row(row: &rusqlite::Row) -> rusqlite::Result<RawMessageRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
    ))
}

fn finish_message_row(raw: RawMessageRow) -> Result<Message> {
    let (id, conversation_id, role, content, created_at) = raw;
    let role =
        Role::parse(&role).ok_or_else(|| anyhow!("unknown role '{}' in message {}", role, id))?;
    Ok(Message {
        id,
        conversation_id,
        role,
        content,
        created_at: super::parse_timestamp(&created_at),
    })
}
