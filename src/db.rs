//! Database module for ragbot
//!
//! Provides persistence for threads, their append-only message logs and
//! the checkpoint log of conversation states.

mod schema;

pub use schema::*;

use crate::llm::ContentBlock;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("Thread not found: {0}")]
    ThreadNotFound(String),
    #[error("Thread already exists: {0}")]
    ThreadExists(String),
}

pub type DbResult<T> = Result<T, DbError>;

/// Thread-safe database handle
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

const THREAD_COLUMNS: &str = "t.id, t.title, t.state, t.state_updated_at, t.created_at, t.updated_at,
     (SELECT COUNT(*) FROM messages m WHERE m.thread_id = t.id) AS message_count";

const MESSAGE_COLUMNS: &str =
    "message_id, thread_id, sequence_id, message_type, content, usage_data, created_at";

impl Database {
    /// Open or create database at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> DbResult<Self> {
        Self::from_connection(Connection::open(path)?)
    }

    /// Open an in-memory database (for testing)
    #[cfg(test)]
    pub fn open_in_memory() -> DbResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> DbResult<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    // A panic while holding the lock leaves SQLite itself consistent
    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ==================== Thread Operations ====================

    /// Create a new thread and record its initial checkpoint
    pub fn create_thread(&self, id: &str) -> DbResult<Thread> {
        let mut conn = self.conn();
        let now = Utc::now();
        let idle_state = serde_json::to_string(&ConvState::Idle)?;

        let tx = conn.transaction()?;
        let inserted = tx.execute(
            "INSERT OR IGNORE INTO threads (id, title, state, state_updated_at, created_at, updated_at)
             VALUES (?1, NULL, ?2, ?3, ?3, ?3)",
            params![id, idle_state, now.to_rfc3339()],
        )?;
        if inserted == 0 {
            return Err(DbError::ThreadExists(id.to_string()));
        }
        tx.execute(
            "INSERT INTO checkpoints (thread_id, state, last_sequence_id, created_at)
             VALUES (?1, ?2, 0, ?3)",
            params![id, idle_state, now.to_rfc3339()],
        )?;
        tx.commit()?;

        Ok(Thread {
            id: id.to_string(),
            title: None,
            state: ConvState::Idle,
            state_updated_at: now,
            created_at: now,
            updated_at: now,
            message_count: 0,
        })
    }

    /// Get thread by ID
    pub fn get_thread(&self, id: &str) -> DbResult<Thread> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {THREAD_COLUMNS} FROM threads t WHERE t.id = ?1"
        ))?;

        stmt.query_row(params![id], parse_thread_row)
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => DbError::ThreadNotFound(id.to_string()),
                other => DbError::Sqlite(other),
            })
    }

    /// Check whether a thread exists
    #[cfg(test)]
    pub fn thread_exists(&self, id: &str) -> DbResult<bool> {
        use rusqlite::OptionalExtension;

        let conn = self.conn();
        let found = conn
            .query_row("SELECT 1 FROM threads WHERE id = ?1", params![id], |_| Ok(()))
            .optional()?;
        Ok(found.is_some())
    }

    /// Every thread id that has at least one checkpoint, each exactly once.
    ///
    /// Walks the checkpoint log newest first, so recently active threads
    /// come first. Cost grows with the total number of checkpoints.
    pub fn list_thread_ids(&self) -> DbResult<Vec<String>> {
        let conn = self.conn();
        let mut stmt =
            conn.prepare("SELECT thread_id FROM checkpoints ORDER BY checkpoint_id DESC")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

        let mut seen = HashSet::new();
        let mut ids = Vec::new();
        for row in rows {
            let id = row?;
            if seen.insert(id.clone()) {
                ids.push(id);
            }
        }
        Ok(ids)
    }

    /// Persist a thread's state and append a checkpoint for it
    pub fn update_thread_state(&self, id: &str, state: &ConvState) -> DbResult<Checkpoint> {
        let mut conn = self.conn();
        let now = Utc::now();
        let state_json = serde_json::to_string(state)?;

        let tx = conn.transaction()?;
        let updated = tx.execute(
            "UPDATE threads SET state = ?1, state_updated_at = ?2, updated_at = ?2 WHERE id = ?3",
            params![state_json, now.to_rfc3339(), id],
        )?;
        if updated == 0 {
            return Err(DbError::ThreadNotFound(id.to_string()));
        }

        let last_sequence_id = last_sequence_id(&tx, id)?;
        tx.execute(
            "INSERT INTO checkpoints (thread_id, state, last_sequence_id, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![id, state_json, last_sequence_id, now.to_rfc3339()],
        )?;
        let checkpoint_id = tx.last_insert_rowid();
        tx.commit()?;

        Ok(Checkpoint {
            checkpoint_id,
            thread_id: id.to_string(),
            state: state.clone(),
            last_sequence_id,
            created_at: now,
        })
    }

    /// Checkpoint log of a thread, oldest first
    #[cfg(test)]
    pub fn get_checkpoints(&self, id: &str) -> DbResult<Vec<Checkpoint>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT checkpoint_id, thread_id, state, last_sequence_id, created_at
             FROM checkpoints WHERE thread_id = ?1 ORDER BY checkpoint_id ASC",
        )?;
        let rows = stmt.query_map(params![id], |row| {
            let state_json: String = row.get(2)?;
            Ok(Checkpoint {
                checkpoint_id: row.get(0)?,
                thread_id: row.get(1)?,
                state: serde_json::from_str(&state_json).unwrap_or_default(),
                last_sequence_id: row.get(3)?,
                created_at: parse_datetime(&row.get::<_, String>(4)?),
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(DbError::from)
    }

    /// Delete a thread with its messages and checkpoints
    pub fn delete_thread(&self, id: &str) -> DbResult<()> {
        let conn = self.conn();

        // Messages and checkpoints are deleted by CASCADE
        let deleted = conn.execute("DELETE FROM threads WHERE id = ?1", params![id])?;

        if deleted == 0 {
            return Err(DbError::ThreadNotFound(id.to_string()));
        }
        Ok(())
    }

    /// Reset all threads to idle on server restart.
    /// Also repairs any orphaned `tool_use` by injecting a synthetic tool result.
    pub fn reset_all_to_idle(&self) -> DbResult<()> {
        let mut conn = self.conn();
        let now = Utc::now();
        let idle_state = serde_json::to_string(&ConvState::Idle)?;

        let tx = conn.transaction()?;
        repair_orphaned_tool_use(&tx, &now)?;

        let mut stmt = tx.prepare(
            "SELECT id FROM threads
             WHERE json_extract(state, '$.type') NOT IN ('idle', 'error')",
        )?;
        let stuck: Vec<String> = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<_, _>>()?;
        drop(stmt);

        for id in &stuck {
            tx.execute(
                "UPDATE threads SET state = ?1, state_updated_at = ?2, updated_at = ?2 WHERE id = ?3",
                params![idle_state, now.to_rfc3339(), id],
            )?;
            let last = last_sequence_id(&tx, id)?;
            tx.execute(
                "INSERT INTO checkpoints (thread_id, state, last_sequence_id, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![id, idle_state, last, now.to_rfc3339()],
            )?;
            tracing::info!(thread_id = %id, "Reset interrupted thread to idle");
        }
        tx.commit()?;
        Ok(())
    }

    // ==================== Message Operations ====================

    /// Append a message to a thread.
    ///
    /// The first user message also becomes the thread title.
    pub fn add_message(
        &self,
        message_id: &str,
        thread_id: &str,
        content: &MessageContent,
        usage_data: Option<&UsageData>,
    ) -> DbResult<Message> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let message = insert_message(&tx, message_id, thread_id, content, usage_data)?;
        tx.commit()?;
        Ok(message)
    }

    /// Append several messages atomically, in order
    pub fn add_messages(
        &self,
        thread_id: &str,
        contents: &[MessageContent],
    ) -> DbResult<Vec<Message>> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let messages = contents
            .iter()
            .map(|content| {
                let message_id = uuid::Uuid::new_v4().to_string();
                insert_message(&tx, &message_id, thread_id, content, None)
            })
            .collect::<DbResult<Vec<_>>>()?;
        tx.commit()?;
        Ok(messages)
    }

    /// Get messages for a thread
    pub fn get_messages(&self, thread_id: &str) -> DbResult<Vec<Message>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE thread_id = ?1 ORDER BY sequence_id ASC"
        ))?;

        let rows = stmt.query_map(params![thread_id], parse_message_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(DbError::from)
    }

    /// Get messages after a sequence ID
    pub fn get_messages_after(
        &self,
        thread_id: &str,
        after_sequence: i64,
    ) -> DbResult<Vec<Message>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages
             WHERE thread_id = ?1 AND sequence_id > ?2 ORDER BY sequence_id ASC"
        ))?;

        let rows = stmt.query_map(params![thread_id, after_sequence], parse_message_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(DbError::from)
    }

    /// Get the last sequence ID for a thread
    pub fn get_last_sequence_id(&self, thread_id: &str) -> DbResult<i64> {
        let conn = self.conn();
        last_sequence_id(&conn, thread_id)
    }
}

fn last_sequence_id(conn: &Connection, thread_id: &str) -> DbResult<i64> {
    conn.query_row(
        "SELECT COALESCE(MAX(sequence_id), 0) FROM messages WHERE thread_id = ?1",
        params![thread_id],
        |row| row.get(0),
    )
    .map_err(DbError::from)
}

fn insert_message(
    conn: &Connection,
    message_id: &str,
    thread_id: &str,
    content: &MessageContent,
    usage_data: Option<&UsageData>,
) -> DbResult<Message> {
    let now = Utc::now();
    let msg_type = content.message_type();

    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM threads WHERE id = ?1)",
        params![thread_id],
        |row| row.get(0),
    )?;
    if !exists {
        return Err(DbError::ThreadNotFound(thread_id.to_string()));
    }

    let sequence_id = last_sequence_id(conn, thread_id)? + 1;
    let content_str = serde_json::to_string(&content.to_json())?;
    let usage_str = usage_data.map(serde_json::to_string).transpose()?;

    conn.execute(
        "INSERT INTO messages (message_id, thread_id, sequence_id, message_type, content, usage_data, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            message_id,
            thread_id,
            sequence_id,
            msg_type.to_string(),
            content_str,
            usage_str,
            now.to_rfc3339(),
        ],
    )?;

    conn.execute(
        "UPDATE threads SET updated_at = ?1 WHERE id = ?2",
        params![now.to_rfc3339(), thread_id],
    )?;
    if let MessageContent::User(user) = content {
        conn.execute(
            "UPDATE threads SET title = ?1 WHERE id = ?2 AND title IS NULL",
            params![derive_title(&user.text), thread_id],
        )?;
    }

    Ok(Message {
        message_id: message_id.to_string(),
        thread_id: thread_id.to_string(),
        sequence_id,
        message_type: msg_type,
        content: content.clone(),
        usage_data: usage_data.cloned(),
        created_at: now,
    })
}

/// Scan all threads for orphaned `tool_use` and inject synthetic tool results.
/// An orphaned `tool_use` is an agent message containing `tool_use` blocks where
/// not every `tool_use` ID has a matching tool result in the following messages.
fn repair_orphaned_tool_use(conn: &Connection, now: &DateTime<Utc>) -> DbResult<()> {
    let mut thread_stmt = conn.prepare("SELECT id FROM threads")?;
    let thread_ids: Vec<String> = thread_stmt
        .query_map([], |row| row.get(0))?
        .collect::<Result<_, _>>()?;

    for thread_id in thread_ids {
        let mut msg_stmt = conn.prepare(
            "SELECT sequence_id, message_type, content
             FROM messages WHERE thread_id = ?1 ORDER BY sequence_id ASC",
        )?;
        let messages: Vec<(i64, String, String)> = msg_stmt
            .query_map(params![thread_id], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?))
            })?
            .collect::<Result<_, _>>()?;

        let mut pending_tool_ids: Vec<String> = Vec::new();
        let mut max_sequence_id: i64 = 0;

        for (seq_id, msg_type, content) in &messages {
            max_sequence_id = *seq_id;
            match MessageType::parse(msg_type) {
                Some(MessageType::Agent) => {
                    let parsed = serde_json::from_str::<Vec<ContentBlock>>(content);
                    if let Ok(blocks) = parsed {
                        pending_tool_ids.extend(blocks.into_iter().filter_map(|b| match b {
                            ContentBlock::ToolUse { id, .. } => Some(id),
                            _ => None,
                        }));
                    }
                }
                Some(MessageType::Tool) => {
                    if let Ok(tool_content) = serde_json::from_str::<ToolContent>(content) {
                        pending_tool_ids.retain(|id| id != &tool_content.tool_use_id);
                    }
                }
                _ => {}
            }
        }

        for tool_id in pending_tool_ids {
            max_sequence_id += 1;
            let tool_content =
                ToolContent::new(&tool_id, "[Tool execution interrupted by server restart]", true);
            let content_json = serde_json::to_string(&tool_content)?;

            conn.execute(
                "INSERT INTO messages (message_id, thread_id, sequence_id, message_type, content, created_at)
                 VALUES (?1, ?2, ?3, 'tool', ?4, ?5)",
                params![
                    uuid::Uuid::new_v4().to_string(),
                    thread_id,
                    max_sequence_id,
                    content_json,
                    now.to_rfc3339()
                ],
            )?;

            tracing::info!(
                thread_id = %thread_id,
                tool_id = %tool_id,
                "Injected synthetic tool result for orphaned tool_use"
            );
        }
    }

    Ok(())
}

fn parse_thread_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Thread> {
    let state_json: String = row.get(2)?;
    Ok(Thread {
        id: row.get(0)?,
        title: row.get(1)?,
        state: serde_json::from_str(&state_json).unwrap_or_default(),
        state_updated_at: parse_datetime(&row.get::<_, String>(3)?),
        created_at: parse_datetime(&row.get::<_, String>(4)?),
        updated_at: parse_datetime(&row.get::<_, String>(5)?),
        message_count: row.get(6)?,
    })
}

/// Parse a message row from the database
fn parse_message_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let type_str: String = row.get(3)?;
    let msg_type = MessageType::parse(&type_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            3,
            rusqlite::types::Type::Text,
            format!("unknown message type {type_str}").into(),
        )
    })?;
    let content_str: String = row.get(4)?;
    let content_value: serde_json::Value = serde_json::from_str(&content_str).unwrap_or_default();

    let content = MessageContent::from_json(msg_type, content_value).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, e.into())
    })?;

    Ok(Message {
        message_id: row.get(0)?,
        thread_id: row.get(1)?,
        sequence_id: row.get(2)?,
        message_type: msg_type,
        content,
        usage_data: row
            .get::<_, Option<String>>(5)?
            .and_then(|s| serde_json::from_str(&s).ok()),
        created_at: parse_datetime(&row.get::<_, String>(6)?),
    })
}

fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).map_or_else(|_| Utc::now(), |dt| dt.with_timezone(&Utc))
}
