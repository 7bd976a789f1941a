//! Target relational store for the new architecture.
//!
//! One SQLite database holds the migrated domains (topics, messages,
//! assistants, knowledge notes, preferences) plus the `app_state` key-value
//! table where the migration status record lives. Messages are stored one
//! row per message with blocks inlined as JSON.

use std::path::Path;

use anyhow::{Context, Result};
use rusqlite::{Connection, OptionalExtension, Transaction, params};
use serde_json::Value;

use hearth_types::{Message, Topic, TopicId};

/// App-state key holding the migration status record.
pub const MIGRATION_STATUS_KEY: &str = "migration_v2_status";

/// Schema version written into the status record.
pub const MIGRATION_VERSION: &str = "2.0.0";

/// Rows per multi-row INSERT. Messages carry 16 columns, so 100 rows stays
/// well under SQLite's host-parameter ceiling.
pub const INSERT_CHUNK_ROWS: usize = 100;

/// Outcome field of the migration status record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationStatusKind {
    Completed,
    Failed,
    InProgress,
}

/// The persisted `migration_v2_status` record.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct MigrationStatus {
    pub status: MigrationStatusKind,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub completed_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub failed_at: Option<i64>,
    pub version: String,
    #[serde(default)]
    pub error: Option<String>,
}

impl MigrationStatus {
    #[must_use]
    pub fn completed(now_ms: i64) -> Self {
        Self {
            status: MigrationStatusKind::Completed,
            completed_at: Some(now_ms),
            failed_at: None,
            version: MIGRATION_VERSION.to_string(),
            error: None,
        }
    }

    #[must_use]
    pub fn failed(now_ms: i64, error: impl Into<String>) -> Self {
        Self {
            status: MigrationStatusKind::Failed,
            completed_at: None,
            failed_at: Some(now_ms),
            version: MIGRATION_VERSION.to_string(),
            error: Some(error.into()),
        }
    }

    #[must_use]
    pub fn in_progress() -> Self {
        Self {
            status: MigrationStatusKind::InProgress,
            completed_at: None,
            failed_at: None,
            version: MIGRATION_VERSION.to_string(),
            error: None,
        }
    }
}

/// Handle over the target database.
#[derive(Debug)]
pub struct TargetDb {
    conn: Connection,
}

/// New-architecture tables in dependency order (parents first).
/// Clearing happens in reverse. `app_state` is deliberately absent: the
/// status record must survive a clear-and-restart.
const NEW_TABLES: &[&str] = &[
    "assistants",
    "topics",
    "messages",
    "knowledge_notes",
    "preferences",
];

impl TargetDb {
    /// Open (creating if needed) the database at `path` and ensure the schema.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database at {}", path.display()))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let _ = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600));
        }
        let mut db = Self { conn };
        db.init_schema()?;
        Ok(db)
    }

    /// In-memory database for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        let mut db = Self { conn };
        db.init_schema()?;
        Ok(db)
    }

    fn init_schema(&mut self) -> Result<()> {
        self.conn
            .execute_batch(
                "BEGIN;
                 CREATE TABLE IF NOT EXISTS assistants (
                     id         TEXT PRIMARY KEY,
                     name       TEXT NOT NULL,
                     data       TEXT NOT NULL,
                     created_at INTEGER NOT NULL,
                     updated_at INTEGER NOT NULL
                 );
                 CREATE TABLE IF NOT EXISTS topics (
                     id                      TEXT PRIMARY KEY,
                     name                    TEXT NOT NULL,
                     is_name_manually_edited INTEGER NOT NULL DEFAULT 0,
                     assistant_id            TEXT,
                     assistant_meta          TEXT,
                     prompt                  TEXT,
                     active_node_id          TEXT,
                     group_id                TEXT,
                     sort_order              INTEGER NOT NULL DEFAULT 0,
                     is_pinned               INTEGER NOT NULL DEFAULT 0,
                     pinned_order            INTEGER NOT NULL DEFAULT 0,
                     created_at              INTEGER NOT NULL,
                     updated_at              INTEGER NOT NULL
                 );
                 CREATE TABLE IF NOT EXISTS messages (
                     id                TEXT PRIMARY KEY,
                     parent_id         TEXT,
                     topic_id          TEXT NOT NULL,
                     role              TEXT NOT NULL,
                     data              TEXT NOT NULL,
                     searchable_text   TEXT,
                     status            TEXT NOT NULL,
                     siblings_group_id INTEGER NOT NULL DEFAULT 0,
                     assistant_id      TEXT,
                     assistant_meta    TEXT,
                     model_id          TEXT,
                     model_meta        TEXT,
                     trace_id          TEXT,
                     stats             TEXT,
                     created_at        INTEGER NOT NULL,
                     updated_at        INTEGER NOT NULL
                 );
                 CREATE INDEX IF NOT EXISTS idx_messages_topic
                     ON messages(topic_id);
                 CREATE TABLE IF NOT EXISTS knowledge_notes (
                     id         TEXT PRIMARY KEY,
                     data       TEXT NOT NULL,
                     created_at INTEGER NOT NULL,
                     updated_at INTEGER NOT NULL
                 );
                 CREATE TABLE IF NOT EXISTS preferences (
                     key        TEXT PRIMARY KEY,
                     value      TEXT NOT NULL,
                     updated_at INTEGER NOT NULL
                 );
                 CREATE TABLE IF NOT EXISTS app_state (
                     key        TEXT PRIMARY KEY,
                     value      TEXT NOT NULL,
                     updated_at INTEGER NOT NULL
                 );
                 COMMIT;",
            )
            .context("Failed to initialize schema")?;
        Ok(())
    }

    /// Run `f` inside a transaction; commit on `Ok`, roll back on `Err`.
    pub fn with_transaction<T>(
        &mut self,
        f: impl FnOnce(&Transaction<'_>) -> Result<T>,
    ) -> Result<T> {
        let tx = self.conn.transaction().context("Failed to begin transaction")?;
        let out = f(&tx)?;
        tx.commit().context("Failed to commit transaction")?;
        Ok(out)
    }

    #[must_use]
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Delete all rows of the new-architecture tables, children first.
    /// Non-empty tables are logged before deletion so a re-run after a
    /// failed attempt leaves a trace of what it discarded.
    pub fn clear_new_tables(&mut self) -> Result<()> {
        for table in NEW_TABLES.iter().rev() {
            let count = self.count_rows(table)?;
            if count > 0 {
                tracing::warn!("Clearing {count} leftover rows from {table}");
            }
            self.conn
                .execute(&format!("DELETE FROM {table}"), [])
                .with_context(|| format!("Failed to clear {table}"))?;
        }
        Ok(())
    }

    pub fn count_rows(&self, table: &str) -> Result<u64> {
        debug_assert!(NEW_TABLES.contains(&table) || table == "app_state");
        let count: i64 = self
            .conn
            .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
                row.get(0)
            })
            .with_context(|| format!("Failed to count {table}"))?;
        Ok(count as u64)
    }

    pub fn count_messages_in_topic(&self, topic_id: &TopicId) -> Result<u64> {
        let count: i64 = self
            .conn
            .query_row(
                "SELECT COUNT(*) FROM messages WHERE topic_id = ?1",
                params![topic_id.as_str()],
                |row| row.get(0),
            )
            .context("Failed to count topic messages")?;
        Ok(count as u64)
    }

    /// First `n` topic ids by insertion order, for validation sampling.
    pub fn sample_topic_ids(&self, n: usize) -> Result<Vec<TopicId>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id FROM topics ORDER BY rowid LIMIT ?1")
            .context("Failed to prepare topic sample")?;
        let ids = stmt
            .query_map(params![n as i64], |row| row.get::<_, String>(0))
            .context("Failed to sample topics")?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(ids.into_iter().map(TopicId::new).collect())
    }

    /// Messages referencing a missing topic or a missing in-topic parent.
    pub fn count_orphan_messages(&self) -> Result<u64> {
        let count: i64 = self
            .conn
            .query_row(
                "SELECT COUNT(*) FROM messages m
                 WHERE NOT EXISTS (SELECT 1 FROM topics t WHERE t.id = m.topic_id)
                    OR (m.parent_id IS NOT NULL AND NOT EXISTS (
                        SELECT 1 FROM messages p
                        WHERE p.id = m.parent_id AND p.topic_id = m.topic_id))",
                [],
                |row| row.get(0),
            )
            .context("Failed to run orphan check")?;
        Ok(count as u64)
    }

    // ── app_state ───────────────────────────────────────────────────────

    pub fn set_app_state(&self, key: &str, value: &Value, now_ms: i64) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO app_state (key, value, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET value = ?2, updated_at = ?3",
                params![key, value.to_string(), now_ms],
            )
            .with_context(|| format!("Failed to write app_state[{key}]"))?;
        Ok(())
    }

    pub fn app_state(&self, key: &str) -> Result<Option<Value>> {
        let raw: Option<String> = self
            .conn
            .query_row(
                "SELECT value FROM app_state WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()
            .with_context(|| format!("Failed to read app_state[{key}]"))?;
        match raw {
            Some(raw) => Ok(Some(
                serde_json::from_str(&raw)
                    .with_context(|| format!("app_state[{key}] is not valid JSON"))?,
            )),
            None => Ok(None),
        }
    }

    pub fn migration_status(&self) -> Result<Option<MigrationStatus>> {
        match self.app_state(MIGRATION_STATUS_KEY)? {
            Some(value) => Ok(Some(
                serde_json::from_value(value).context("Malformed migration status record")?,
            )),
            None => Ok(None),
        }
    }

    pub fn set_migration_status(&self, status: &MigrationStatus, now_ms: i64) -> Result<()> {
        let value = serde_json::to_value(status).context("Failed to encode migration status")?;
        self.set_app_state(MIGRATION_STATUS_KEY, &value, now_ms)
    }
}

// ── row writers ─────────────────────────────────────────────────────────
//
// Free functions over `&Connection` so they work both inside an explicit
// transaction and in autocommit mode (a `Transaction` derefs to `Connection`).

pub fn upsert_preference(conn: &Connection, key: &str, value: &Value, now_ms: i64) -> Result<()> {
    conn.execute(
        "INSERT INTO preferences (key, value, updated_at) VALUES (?1, ?2, ?3)
         ON CONFLICT(key) DO UPDATE SET value = ?2, updated_at = ?3",
        params![key, value.to_string(), now_ms],
    )
    .with_context(|| format!("Failed to upsert preference {key}"))?;
    Ok(())
}

pub fn insert_assistant(
    conn: &Connection,
    id: &str,
    name: &str,
    data: &Value,
    now_ms: i64,
) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO assistants (id, name, data, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?4)",
        params![id, name, data.to_string(), now_ms],
    )
    .with_context(|| format!("Failed to insert assistant {id}"))?;
    Ok(())
}

pub fn insert_knowledge_note(conn: &Connection, id: &str, data: &Value, now_ms: i64) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO knowledge_notes (id, data, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?3)",
        params![id, data.to_string(), now_ms],
    )
    .with_context(|| format!("Failed to insert knowledge note {id}"))?;
    Ok(())
}

pub fn insert_topic(conn: &Connection, topic: &Topic) -> Result<()> {
    let assistant_meta = topic.assistant_meta.as_ref().map(Value::to_string);
    conn.execute(
        "INSERT INTO topics (id, name, is_name_manually_edited, assistant_id, assistant_meta,
                             prompt, active_node_id, group_id, sort_order, is_pinned,
                             pinned_order, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        params![
            topic.id.as_str(),
            topic.name,
            topic.is_name_manually_edited,
            topic.assistant_id.as_ref().map(|id| id.as_str().to_string()),
            assistant_meta,
            topic.prompt,
            topic.active_node_id.as_ref().map(|id| id.as_str().to_string()),
            topic.group_id,
            topic.sort_order,
            topic.is_pinned,
            topic.pinned_order,
            topic.created_at,
            topic.updated_at,
        ],
    )
    .with_context(|| format!("Failed to insert topic {}", topic.id))?;
    Ok(())
}

/// Insert messages in multi-row chunks of [`INSERT_CHUNK_ROWS`].
pub fn insert_messages(conn: &Connection, messages: &[Message]) -> Result<()> {
    for chunk in messages.chunks(INSERT_CHUNK_ROWS) {
        insert_message_chunk(conn, chunk)?;
    }
    Ok(())
}

const MESSAGE_COLUMNS: usize = 16;

fn insert_message_chunk(conn: &Connection, messages: &[Message]) -> Result<()> {
    use std::fmt::Write;

    let mut sql = String::from(
        "INSERT INTO messages (id, parent_id, topic_id, role, data, searchable_text, status,
                               siblings_group_id, assistant_id, assistant_meta, model_id,
                               model_meta, trace_id, stats, created_at, updated_at) VALUES ",
    );
    for i in 0..messages.len() {
        if i > 0 {
            sql.push(',');
        }
        let base = i * MESSAGE_COLUMNS;
        sql.push('(');
        for col in 0..MESSAGE_COLUMNS {
            if col > 0 {
                sql.push(',');
            }
            let _ = write!(sql, "?{}", base + col + 1);
        }
        sql.push(')');
    }

    let mut values: Vec<rusqlite::types::Value> =
        Vec::with_capacity(messages.len() * MESSAGE_COLUMNS);
    for message in messages {
        let data = serde_json::to_string(&message.data).context("Failed to encode blocks")?;
        let stats = match &message.stats {
            Some(stats) => Some(serde_json::to_string(stats).context("Failed to encode stats")?),
            None => None,
        };
        let role = serde_json::to_value(message.role)
            .ok()
            .and_then(|v| v.as_str().map(ToString::to_string))
            .unwrap_or_default();
        let status = serde_json::to_value(message.status)
            .ok()
            .and_then(|v| v.as_str().map(ToString::to_string))
            .unwrap_or_default();

        push_text(&mut values, Some(message.id.as_str().to_string()));
        push_text(
            &mut values,
            message.parent_id.as_ref().map(|id| id.as_str().to_string()),
        );
        push_text(&mut values, Some(message.topic_id.as_str().to_string()));
        push_text(&mut values, Some(role));
        push_text(&mut values, Some(data));
        push_text(&mut values, message.searchable_text.clone());
        push_text(&mut values, Some(status));
        values.push(rusqlite::types::Value::Integer(i64::from(
            message.siblings_group_id,
        )));
        push_text(
            &mut values,
            message
                .assistant_id
                .as_ref()
                .map(|id| id.as_str().to_string()),
        );
        push_text(
            &mut values,
            message.assistant_meta.as_ref().map(Value::to_string),
        );
        push_text(&mut values, message.model_id.clone());
        push_text(
            &mut values,
            message.model_meta.as_ref().map(Value::to_string),
        );
        push_text(&mut values, message.trace_id.clone());
        push_text(&mut values, stats);
        values.push(rusqlite::types::Value::Integer(message.created_at));
        values.push(rusqlite::types::Value::Integer(message.updated_at));
    }

    conn.execute(&sql, rusqlite::params_from_iter(values))
        .context("Failed to insert message chunk")?;
    Ok(())
}

fn push_text(values: &mut Vec<rusqlite::types::Value>, text: Option<String>) {
    values.push(match text {
        Some(text) => rusqlite::types::Value::Text(text),
        None => rusqlite::types::Value::Null,
    });
}
