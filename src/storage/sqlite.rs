//! SQLite-backed progression store
//!
//! Holds course structure (modules, items, prerequisites), learners,
//! recorded completion facts and the last computed progression per
//! (learner, module). Item ids are unique across the whole store so a
//! completion fact can be keyed by item alone.

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

use crate::error::{ProgressionError, Result};
use crate::model::{
    CompletionFact, Item, ItemId, LearnerId, Module, ModuleId, Progression, Requirement, RequirementKind,
};

use super::ProgressionStore;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS learners (
    id INTEGER PRIMARY KEY,
    created_at DATETIME DEFAULT CURRENT_TIMESTAMP
);

CREATE TABLE IF NOT EXISTS modules (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL DEFAULT '',
    require_sequential_progress INTEGER NOT NULL DEFAULT 0,
    requirement_count INTEGER NOT NULL DEFAULT 0,
    unlock_at TEXT,
    updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
);

CREATE TABLE IF NOT EXISTS module_prerequisites (
    module_id INTEGER NOT NULL,
    prerequisite_id INTEGER NOT NULL,
    PRIMARY KEY (module_id, prerequisite_id)
);

CREATE TABLE IF NOT EXISTS items (
    id INTEGER PRIMARY KEY,
    module_id INTEGER NOT NULL,
    position INTEGER NOT NULL,
    requirement_kind TEXT,
    min_score REAL,
    content_locked INTEGER NOT NULL DEFAULT 0
);

-- One row per (learner, item, kind); re-recording replaces the row
CREATE TABLE IF NOT EXISTS completion_facts (
    learner_id INTEGER NOT NULL,
    item_id INTEGER NOT NULL,
    kind TEXT NOT NULL,
    satisfied_at TEXT NOT NULL,
    score REAL,
    PRIMARY KEY (learner_id, item_id, kind)
);

CREATE TABLE IF NOT EXISTS progressions (
    learner_id INTEGER NOT NULL,
    module_id INTEGER NOT NULL,
    workflow_state TEXT NOT NULL,
    requirements_met TEXT NOT NULL,
    incomplete_requirements TEXT NOT NULL,
    current_position INTEGER,
    collapsed INTEGER NOT NULL DEFAULT 0,
    completed_at TEXT,
    updated_at DATETIME DEFAULT CURRENT_TIMESTAMP,
    PRIMARY KEY (learner_id, module_id)
);

CREATE INDEX IF NOT EXISTS idx_items_module ON items(module_id);
CREATE INDEX IF NOT EXISTS idx_facts_learner ON completion_facts(learner_id);
"#;

/// Row counts for status reporting
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct StoreCounts {
    pub learners: i64,
    pub modules: i64,
    pub items: i64,
    pub completion_facts: i64,
    pub progressions: i64,
}

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create a store at the given path and ensure the schema exists
    pub fn open(db_path: &Path) -> Result<Self> {
        let conn = Connection::open(db_path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.execute_batch(SCHEMA)?;
        debug!("Opened progression store at {:?}", db_path);
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| ProgressionError::Poisoned(format!("sqlite connection: {:?}", e)))
    }

    pub fn upsert_learner(&self, learner_id: LearnerId) -> Result<()> {
        self.conn()?.execute(
            "INSERT OR IGNORE INTO learners (id) VALUES (?1)",
            params![learner_id],
        )?;
        Ok(())
    }

    /// Insert or replace a module with its items and prerequisites
    pub fn upsert_module(&self, module: &Module) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        tx.execute(
            r#"
            INSERT INTO modules (id, name, require_sequential_progress, requirement_count, unlock_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                require_sequential_progress = excluded.require_sequential_progress,
                requirement_count = excluded.requirement_count,
                unlock_at = excluded.unlock_at,
                updated_at = CURRENT_TIMESTAMP
            "#,
            params![
                module.id,
                module.name,
                module.require_sequential_progress,
                module.requirement_count,
                module.unlock_at.map(|at| at.to_rfc3339()),
            ],
        )?;

        tx.execute("DELETE FROM items WHERE module_id = ?1", params![module.id])?;
        tx.execute("DELETE FROM module_prerequisites WHERE module_id = ?1", params![module.id])?;

        {
            let mut insert_item = tx.prepare_cached(
                r#"
                INSERT OR REPLACE INTO items (id, module_id, position, requirement_kind, min_score, content_locked)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                "#,
            )?;
            for item in &module.items {
                insert_item.execute(params![
                    item.id,
                    module.id,
                    item.position,
                    item.requirement.map(|r| r.kind().as_str()),
                    item.requirement.and_then(|r| r.min_score()),
                    item.content_locked,
                ])?;
            }

            let mut insert_prereq = tx.prepare_cached(
                "INSERT OR IGNORE INTO module_prerequisites (module_id, prerequisite_id) VALUES (?1, ?2)",
            )?;
            for prerequisite in &module.prerequisite_module_ids {
                insert_prereq.execute(params![module.id, prerequisite])?;
            }
        }

        tx.commit()?;
        debug!("Stored module {} with {} items", module.id, module.items.len());
        Ok(())
    }

    /// Record a completion fact, replacing an earlier one of the same kind
    pub fn record_completion(&self, learner_id: LearnerId, fact: &CompletionFact) -> Result<()> {
        self.conn()?.execute(
            r#"
            INSERT INTO completion_facts (learner_id, item_id, kind, satisfied_at, score)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(learner_id, item_id, kind) DO UPDATE SET
                satisfied_at = excluded.satisfied_at,
                score = excluded.score
            "#,
            params![
                learner_id,
                fact.item_id,
                fact.kind.as_str(),
                fact.satisfied_at.to_rfc3339(),
                fact.score,
            ],
        )?;
        Ok(())
    }

    /// Delete a fact; returns whether one existed
    pub fn delete_completion(&self, learner_id: LearnerId, item_id: ItemId, kind: RequirementKind) -> Result<bool> {
        let deleted = self.conn()?.execute(
            "DELETE FROM completion_facts WHERE learner_id = ?1 AND item_id = ?2 AND kind = ?3",
            params![learner_id, item_id, kind.as_str()],
        )?;
        Ok(deleted > 0)
    }

    /// Set the UI collapse flag on a stored progression; returns whether a
    /// progression row existed
    pub fn set_collapsed(&self, learner_id: LearnerId, module_id: ModuleId, collapsed: bool) -> Result<bool> {
        let updated = self.conn()?.execute(
            r#"
            UPDATE progressions SET collapsed = ?3, updated_at = CURRENT_TIMESTAMP
            WHERE learner_id = ?1 AND module_id = ?2
            "#,
            params![learner_id, module_id, collapsed],
        )?;
        Ok(updated > 0)
    }

    pub fn counts(&self) -> Result<StoreCounts> {
        let conn = self.conn()?;
        let count = |table: &str| -> Result<i64> {
            let sql = format!("SELECT COUNT(*) FROM {}", table);
            Ok(conn.query_row(&sql, [], |row| row.get(0))?)
        };
        Ok(StoreCounts {
            learners: count("learners")?,
            modules: count("modules")?,
            items: count("items")?,
            completion_facts: count("completion_facts")?,
            progressions: count("progressions")?,
        })
    }
}

fn parse_timestamp(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn parse_kind(idx: usize, raw: &str) -> rusqlite::Result<RequirementKind> {
    raw.parse::<RequirementKind>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, e.into()))
}

fn parse_json<T: serde::de::DeserializeOwned>(idx: usize, raw: &str) -> rusqlite::Result<T> {
    serde_json::from_str(raw).map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

impl ProgressionStore for SqliteStore {
    fn learner_exists(&self, learner_id: LearnerId) -> Result<bool> {
        let found: Option<i64> = self
            .conn()?
            .query_row("SELECT id FROM learners WHERE id = ?1", params![learner_id], |row| row.get(0))
            .optional()?;
        Ok(found.is_some())
    }

    fn load_module(&self, module_id: ModuleId) -> Result<Option<Module>> {
        let conn = self.conn()?;

        let row = conn
            .query_row(
                r#"
                SELECT id, name, require_sequential_progress, requirement_count, unlock_at
                FROM modules WHERE id = ?1
                "#,
                params![module_id],
                |row| {
                    let unlock_at: Option<String> = row.get(4)?;
                    Ok(Module {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        items: Vec::new(),
                        prerequisite_module_ids: Vec::new(),
                        require_sequential_progress: row.get(2)?,
                        requirement_count: row.get(3)?,
                        unlock_at: unlock_at.as_deref().map(|raw| parse_timestamp(4, raw)).transpose()?,
                    })
                },
            )
            .optional()?;

        let Some(mut module) = row else {
            return Ok(None);
        };

        let mut stmt = conn.prepare_cached(
            r#"
            SELECT id, position, requirement_kind, min_score, content_locked
            FROM items WHERE module_id = ?1
            ORDER BY position, id
            "#,
        )?;
        let items = stmt.query_map(params![module_id], |row| {
            let kind: Option<String> = row.get(2)?;
            let min_score: Option<f64> = row.get(3)?;
            let requirement = kind
                .as_deref()
                .map(|raw| parse_kind(2, raw))
                .transpose()?
                .map(|kind| Requirement::from_parts(kind, min_score));
            Ok(Item {
                id: row.get(0)?,
                position: row.get(1)?,
                requirement,
                content_locked: row.get(4)?,
            })
        })?;
        module.items = items.collect::<rusqlite::Result<Vec<_>>>()?;

        let mut stmt = conn.prepare_cached(
            "SELECT prerequisite_id FROM module_prerequisites WHERE module_id = ?1 ORDER BY prerequisite_id",
        )?;
        let prerequisites = stmt.query_map(params![module_id], |row| row.get(0))?;
        module.prerequisite_module_ids = prerequisites.collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(Some(module))
    }

    fn module_ids(&self) -> Result<Vec<ModuleId>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached("SELECT id FROM modules ORDER BY id")?;
        let ids = stmt.query_map([], |row| row.get(0))?;
        Ok(ids.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn completions_for(
        &self,
        learner_id: LearnerId,
        item_ids: &[ItemId],
    ) -> Result<HashMap<ItemId, Vec<CompletionFact>>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(
            r#"
            SELECT item_id, kind, satisfied_at, score FROM completion_facts
            WHERE learner_id = ?1 AND item_id = ?2
            "#,
        )?;

        let mut grouped: HashMap<ItemId, Vec<CompletionFact>> = HashMap::new();
        for item_id in item_ids {
            let facts = stmt.query_map(params![learner_id, item_id], |row| {
                let kind: String = row.get(1)?;
                let satisfied_at: String = row.get(2)?;
                Ok(CompletionFact {
                    item_id: row.get(0)?,
                    kind: parse_kind(1, &kind)?,
                    satisfied_at: parse_timestamp(2, &satisfied_at)?,
                    score: row.get(3)?,
                })
            })?;
            let facts = facts.collect::<rusqlite::Result<Vec<_>>>()?;
            if !facts.is_empty() {
                grouped.insert(*item_id, facts);
            }
        }
        Ok(grouped)
    }

    fn load_progression(&self, learner_id: LearnerId, module_id: ModuleId) -> Result<Option<Progression>> {
        let conn = self.conn()?;
        let progression = conn
            .query_row(
                r#"
                SELECT workflow_state, requirements_met, incomplete_requirements,
                       current_position, collapsed, completed_at
                FROM progressions WHERE learner_id = ?1 AND module_id = ?2
                "#,
                params![learner_id, module_id],
                |row| {
                    let state: String = row.get(0)?;
                    let met: String = row.get(1)?;
                    let incomplete: String = row.get(2)?;
                    let completed_at: Option<String> = row.get(5)?;
                    Ok(Progression {
                        learner_id,
                        module_id,
                        workflow_state: state
                            .parse()
                            .map_err(|e: String| rusqlite::Error::FromSqlConversionFailure(0, Type::Text, e.into()))?,
                        requirements_met: parse_json(1, &met)?,
                        incomplete_requirements: parse_json(2, &incomplete)?,
                        current_position: row.get(3)?,
                        collapsed: row.get(4)?,
                        completed_at: completed_at.as_deref().map(|raw| parse_timestamp(5, raw)).transpose()?,
                    })
                },
            )
            .optional()?;
        Ok(progression)
    }

    fn save_progression(&self, progression: &Progression) -> Result<()> {
        let met = serde_json::to_string(&progression.requirements_met)?;
        let incomplete = serde_json::to_string(&progression.incomplete_requirements)?;

        self.conn()?.execute(
            r#"
            INSERT INTO progressions
                (learner_id, module_id, workflow_state, requirements_met, incomplete_requirements,
                 current_position, collapsed, completed_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ON CONFLICT(learner_id, module_id) DO UPDATE SET
                workflow_state = excluded.workflow_state,
                requirements_met = excluded.requirements_met,
                incomplete_requirements = excluded.incomplete_requirements,
                current_position = excluded.current_position,
                collapsed = excluded.collapsed,
                completed_at = excluded.completed_at,
                updated_at = CURRENT_TIMESTAMP
            "#,
            params![
                progression.learner_id,
                progression.module_id,
                progression.workflow_state.as_str(),
                met,
                incomplete,
                progression.current_position,
                progression.collapsed,
                progression.completed_at.map(|at| at.to_rfc3339()),
            ],
        )?;
        Ok(())
    }
}
