//! Agent record persistence.

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::params;
use uuid::Uuid;

use super::database::Database;
use crate::agent::config::{AgentConfig, AgentDraft};

/// Hard cap on agents per planet.
pub const MAX_AGENTS_PER_PLANET: usize = 10;

/// Persisted agent row, counters included.
#[derive(Debug, Clone)]
pub struct AgentRecord {
    pub id: String,
    pub owner_id: String,
    pub planet_id: String,
    pub config: AgentConfig,
    pub invocation_count: i64,
    pub distinct_user_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// CRUD over the agents table.
pub struct AgentStore<'a> {
    db: &'a Database,
}

impl<'a> AgentStore<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Creates an agent from a finished wizard draft. Fails when the planet
    /// already holds `MAX_AGENTS_PER_PLANET` agents.
    pub fn create(&self, draft: AgentDraft, owner_id: &str, planet_id: &str) -> Result<AgentRecord> {
        let config = draft.config().clone();
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();
        let config_json =
            serde_json::to_string(&config).context("failed to serialize agent config")?;

        // The cap check rides inside the insert so two concurrent creates
        // cannot both slip under the limit.
        let inserted = self.db.conn().execute(
            "INSERT INTO agents (id, owner_id, planet_id, agent_type, name, config, created_at, updated_at)
             SELECT ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7
             WHERE (SELECT COUNT(*) FROM agents WHERE planet_id = ?3) < ?8",
            params![
                id,
                owner_id,
                planet_id,
                config.agent_type.as_str(),
                config.name,
                config_json,
                now,
                MAX_AGENTS_PER_PLANET as i64
            ],
        )?;
        if inserted == 0 {
            bail!(
                "planet {} is at its agent limit ({})",
                planet_id,
                MAX_AGENTS_PER_PLANET
            );
        }

        tracing::info!(agent_id = %id, planet_id = %planet_id, "created agent");
        self.get(&id)?
            .ok_or_else(|| anyhow!("agent {} missing immediately after insert", id))
    }

    pub fn get(&self, agent_id: &str) -> Result<Option<AgentRecord>> {
        let result = self.db.conn().query_row(
            "SELECT id, owner_id, planet_id, config, invocation_count, distinct_user_count,
                    created_at, updated_at
             FROM agents WHERE id = ?1",
            params![agent_id],
            map_raw_agent_row,
        );

        match result {
            Ok(raw) => Ok(Some(finish_agent_row(raw)?)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// All agents on a planet, most recently updated first.
    pub fn list_for_planet(&self, planet_id: &str) -> Result<Vec<AgentRecord>> {
        let mut stmt = self.db.conn().prepare(
            "SELECT id, owner_id, planet_id, config, invocation_count, distinct_user_count,
                    created_at, updated_at
             FROM agents WHERE planet_id = ?1
             ORDER BY updated_at DESC",
        )?;

        let rows = stmt.query_map(params![planet_id], map_raw_agent_row)?;
        let mut agents = Vec::new();
        for raw in rows {
            agents.push(finish_agent_row(raw?)?);
        }
        Ok(agents)
    }

    /// Replaces the stored configuration and bumps `updated_at`.
    pub fn update_config(&self, agent_id: &str, config: &AgentConfig) -> Result<()> {
        let config_json =
            serde_json::to_string(config).context("failed to serialize agent config")?;
        let updated = self.db.conn().execute(
            "UPDATE agents
             SET agent_type = ?1, name = ?2, config = ?3, updated_at = ?4
             WHERE id = ?5",
            params![
                config.agent_type.as_str(),
                config.name,
                config_json,
                Utc::now().to_rfc3339(),
                agent_id
            ],
        )?;
        if updated == 0 {
            bail!("agent {} not found", agent_id);
        }
        Ok(())
    }

    /// Deletes the agent and everything hanging off it.
    pub fn delete(&self, agent_id: &str) -> Result<()> {
        // conversations reference agents without ON DELETE CASCADE, so the
        // dependent rows go first.
        self.db.conn().execute(
            "DELETE FROM messages WHERE conversation_id IN
                 (SELECT id FROM conversations WHERE agent_id = ?1)",
            params![agent_id],
        )?;
        self.db.conn().execute(
            "DELETE FROM conversations WHERE agent_id = ?1",
            params![agent_id],
        )?;
        self.db.conn().execute(
            "DELETE FROM objective_progress WHERE agent_id = ?1",
            params![agent_id],
        )?;
        self.db.conn().execute(
            "DELETE FROM usage_records WHERE agent_id = ?1",
            params![agent_id],
        )?;
        let deleted = self
            .db
            .conn()
            .execute("DELETE FROM agents WHERE id = ?1", params![agent_id])?;
        if deleted == 0 {
            bail!("agent {} not found", agent_id);
        }
        tracing::info!(agent_id = %agent_id, "deleted agent");
        Ok(())
    }
}

type RawAgentRow = (String, String, String, String, i64, i64, String, String);

fn map_raw_agent_row(row: &rusqlite::Row) -> rusqlite::Result<RawAgentRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
    ))
}

fn finish_agent_row(raw: RawAgentRow) -> Result<AgentRecord> {
    let (id, owner_id, planet_id, config_json, invocation_count, distinct_user_count, created, updated) =
        raw;
    let config: AgentConfig = serde_json::from_str(&config_json)
        .with_context(|| format!("corrupt config for agent {}", id))?;
    Ok(AgentRecord {
        id,
        owner_id,
        planet_id,
        config,
        invocation_count,
        distinct_user_count,
        created_at: super::parse_timestamp(&created),
        updated_at: super::parse_timestamp(&updated),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::config::{
        AgentType, Guardrails, Objective, ScaffoldingLevel, SourceSelection,
    };
    use tempfile::TempDir;

    fn create_test_db() -> (Database, TempDir) {
        let dir = TempDir::new().expect("create temp dir");
        let db = Database::new(&dir.path().join("test.db")).expect("create database");
        (db, dir)
    }

    fn test_config(name: &str) -> AgentConfig {
        AgentConfig {
            agent_type: AgentType::Tutor,
            name: name.to_string(),
            description: "Orbital mechanics tutor".to_string(),
            objectives: vec![Objective {
                text: "Explain Kepler's laws".to_string(),
                visible: true,
            }],
            guardrails: Guardrails::default(),
            scaffolding_level: ScaffoldingLevel::Medium,
            scaffolding_behaviors: vec!["Ask a guiding question first".to_string()],
            sources: SourceSelection::All,
        }
    }

    fn test_draft(name: &str) -> AgentDraft {
        AgentDraft::new(test_config(name))
    }

    #[test]
    fn create_and_get_round_trip() {
        let (db, _dir) = create_test_db();
        let store = AgentStore::new(&db);

        let created = store
            .create(test_draft("Kepler"), "owner-1", "planet-1")
            .expect("create agent");
        assert_eq!(created.config.name, "Kepler");
        assert_eq!(created.invocation_count, 0);
        assert_eq!(created.distinct_user_count, 0);

        let fetched = store.get(&created.id).expect("get agent").expect("present");
        assert_eq!(fetched.config, created.config);
        assert_eq!(fetched.planet_id, "planet-1");
    }

    #[test]
    fn get_missing_agent_returns_none() {
        let (db, _dir) = create_test_db();
        let store = AgentStore::new(&db);
        assert!(store.get("no-such-agent").expect("query").is_none());
    }

    #[test]
    fn planet_cap_is_enforced() {
        let (db, _dir) = create_test_db();
        let store = AgentStore::new(&db);

        for i in 0..MAX_AGENTS_PER_PLANET {
            store
                .create(test_draft(&format!("Agent {}", i)), "owner-1", "planet-1")
                .expect("create under cap");
        }
        let result = store.create(test_draft("One too many"), "owner-1", "planet-1");
        assert!(result.is_err());

        // The rejected create leaves no row behind.
        let count: i64 = db
            .conn()
            .query_row(
                "SELECT COUNT(*) FROM agents WHERE planet_id = 'planet-1'",
                [],
                |row| row.get(0),
            )
            .expect("count agents");
        assert_eq!(count as usize, MAX_AGENTS_PER_PLANET);

        // A different planet is unaffected.
        store
            .create(test_draft("Elsewhere"), "owner-1", "planet-2")
            .expect("create on second planet");
    }

    #[test]
    fn update_config_replaces_and_bumps_updated_at() {
        let (db, _dir) = create_test_db();
        let store = AgentStore::new(&db);
        let created = store
            .create(test_draft("Original"), "owner-1", "planet-1")
            .expect("create agent");

        let mut config = created.config.clone();
        config.name = "Renamed".to_string();
        config.scaffolding_level = ScaffoldingLevel::Heavy;
        store.update_config(&created.id, &config).expect("update");

        let fetched = store.get(&created.id).expect("get").expect("present");
        assert_eq!(fetched.config.name, "Renamed");
        assert_eq!(fetched.config.scaffolding_level, ScaffoldingLevel::Heavy);
        assert!(fetched.updated_at >= created.updated_at);
    }

    #[test]
    fn update_missing_agent_fails() {
        let (db, _dir) = create_test_db();
        let store = AgentStore::new(&db);
        assert!(store.update_config("ghost", &test_config("Ghost")).is_err());
    }

    #[test]
    fn delete_removes_agent_and_dependents() {
        let (db, _dir) = create_test_db();
        let store = AgentStore::new(&db);
        let created = store
            .create(test_draft("Doomed"), "owner-1", "planet-1")
            .expect("create agent");

        let convs = crate::storage::ConversationStore::new(&db);
        let conversation = convs
            .get_or_create(&created.id, "user-1", "planet-1")
            .expect("create conversation");
        convs
            .append_message(&conversation.id, crate::ai::types::Role::User, "hi")
            .expect("append message");

        store.delete(&created.id).expect("delete agent");

        assert!(store.get(&created.id).expect("get").is_none());
        let remaining: i64 = db
            .conn()
            .query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0))
            .expect("count messages");
        assert_eq!(remaining, 0);
        let remaining: i64 = db
            .conn()
            .query_row("SELECT COUNT(*) FROM conversations", [], |row| row.get(0))
            .expect("count conversations");
        assert_eq!(remaining, 0);
    }

    #[test]
    fn list_orders_by_most_recently_updated() {
        let (db, _dir) = create_test_db();
        let store = AgentStore::new(&db);
        let first = store
            .create(test_draft("First"), "owner-1", "planet-1")
            .expect("create first");
        let second = store
            .create(test_draft("Second"), "owner-1", "planet-1")
            .expect("create second");

        // Touch the first agent so it becomes the most recently updated.
        db.conn()
            .execute(
                "UPDATE agents SET updated_at = ?1 WHERE id = ?2",
                params![
                    (Utc::now() + chrono::Duration::seconds(5)).to_rfc3339(),
                    first.id
                ],
            )
            .expect("touch first agent");

        let listed = store.list_for_planet("planet-1").expect("list");
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, first.id);
        assert_eq!(listed[1].id, second.id);
    }
}
