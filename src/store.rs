//! SQLite persistence for conversations and their attached files.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::{Error, Result};
use crate::observability::{STORE_ERRORS, STORE_WRITES};
use crate::types::ChatMessage;
use crate::utils::time::{now_rfc3339, parse_stored};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS conversations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    title TEXT NOT NULL,
    deployment_name TEXT NOT NULL,
    created_at TEXT NOT NULL,
    conversation_history TEXT NOT NULL,
    tokens INTEGER DEFAULT 0
);
CREATE TABLE IF NOT EXISTS files (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    file_path TEXT NOT NULL UNIQUE
);
CREATE TABLE IF NOT EXISTS conversation_attachements (
    conversation_id INTEGER,
    file_id INTEGER,
    PRIMARY KEY (conversation_id, file_id),
    FOREIGN KEY (conversation_id) REFERENCES conversations(id) ON DELETE CASCADE,
    FOREIGN KEY (file_id) REFERENCES files(id) ON DELETE CASCADE
);
";

/// One row of the conversation list.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub id: i64,
    pub title: String,
    pub deployment_name: String,
    #[serde(with = "crate::utils::time")]
    pub created_at: OffsetDateTime,
    pub message_count: usize,
    pub tokens: i64,
}

/// A stored conversation with its decoded history.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConversationRecord {
    pub id: i64,
    pub title: String,
    pub deployment_name: String,
    #[serde(with = "crate::utils::time")]
    pub created_at: OffsetDateTime,
    pub history: Vec<ChatMessage>,
    pub tokens: i64,
}

struct RawConversation {
    id: i64,
    title: String,
    deployment_name: String,
    created_at: String,
    history: String,
    tokens: Option<i64>,
}

impl RawConversation {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            title: row.get(1)?,
            deployment_name: row.get(2)?,
            created_at: row.get(3)?,
            history: row.get(4)?,
            tokens: row.get(5)?,
        })
    }

    fn decode(self) -> Result<ConversationRecord> {
        let history: Vec<ChatMessage> = serde_json::from_str(&self.history)?;
        Ok(ConversationRecord {
            id: self.id,
            title: self.title,
            deployment_name: self.deployment_name,
            created_at: parse_stored(&self.created_at)?,
            history,
            tokens: self.tokens.unwrap_or(0),
        })
    }
}

/// The conversation database.
///
/// The connection sits behind a mutex so one database can be shared between
/// the REPL and blocking maintenance tasks.
pub struct ConversationDatabase {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl ConversationDatabase {
    /// Opens (creating if needed) the database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|err| {
                Error::io(
                    format!("cannot create database directory {}", parent.display()),
                    err,
                )
            })?;
        }
        let conn = Connection::open(path)?;
        let db = Self {
            conn: Mutex::new(conn),
            path: Some(path.to_path_buf()),
        };
        db.init()?;
        Ok(db)
    }

    /// Opens a private in-memory database.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn: Mutex::new(conn),
            path: None,
        };
        db.init()?;
        Ok(db)
    }

    /// The file backing this database, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::database("database connection mutex poisoned", None))
    }

    fn init(&self) -> Result<()> {
        let conn = self.conn()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA)?;
        add_tokens_column_if_missing(&conn)?;
        Ok(())
    }

    /// Inserts a conversation and returns its id.
    pub fn add_conversation(
        &self,
        title: &str,
        deployment_name: &str,
        history: &[ChatMessage],
        tokens: i64,
    ) -> Result<i64> {
        let created_at = now_rfc3339()?;
        let history = serde_json::to_string(history)?;
        let conn = self.conn()?;
        let id = record_write(conn.execute(
            "INSERT INTO conversations (title, deployment_name, created_at, conversation_history, tokens)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![title, deployment_name, created_at, history, tokens],
        ))
        .map(|_| conn.last_insert_rowid())?;
        tracing::info!(id, title, "inserted conversation");
        Ok(id)
    }

    /// Every conversation, newest first.
    ///
    /// Rows whose timestamp or history cannot be decoded are logged and left
    /// out so one damaged row does not hide the rest.
    pub fn all_conversations(&self) -> Result<Vec<ConversationSummary>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, title, deployment_name, created_at, conversation_history, tokens
             FROM conversations ORDER BY created_at DESC",
        )?;
        let rows = stmt
            .query_map([], RawConversation::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        let mut summaries = Vec::with_capacity(rows.len());
        for raw in rows {
            let id = raw.id;
            match raw.decode() {
                Ok(record) => summaries.push(ConversationSummary {
                    id: record.id,
                    title: record.title,
                    deployment_name: record.deployment_name,
                    created_at: record.created_at,
                    message_count: record.history.len(),
                    tokens: record.tokens,
                }),
                Err(err) => tracing::warn!(id, "skipping undecodable conversation: {err}"),
            }
        }
        // Stored stamps differ in precision and offset style, so order on the parsed value.
        summaries.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(summaries)
    }

    /// The number of stored conversations, decodable or not.
    pub fn conversation_count(&self) -> Result<usize> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM conversations", [], |row| row.get(0))?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    /// The conversation with `id`, or `None` when it does not exist.
    pub fn conversation(&self, id: i64) -> Result<Option<ConversationRecord>> {
        let conn = self.conn()?;
        let raw = conn
            .query_row(
                "SELECT id, title, deployment_name, created_at, conversation_history, tokens
                 FROM conversations WHERE id = ?1",
                params![id],
                RawConversation::from_row,
            )
            .optional()?;
        raw.map(RawConversation::decode).transpose()
    }

    /// Deletes a conversation, its attachment links, and any files left unreferenced.
    pub fn delete_conversation(&self, id: i64) -> Result<bool> {
        let removed = {
            let conn = self.conn()?;
            record_write(conn.execute("DELETE FROM conversations WHERE id = ?1", params![id]))?
        };
        tracing::info!(id, removed, "deleted conversation");
        self.delete_orphaned_files()?;
        Ok(removed > 0)
    }

    /// Replaces the stored history of a conversation.
    pub fn update_history(&self, id: i64, history: &[ChatMessage]) -> Result<()> {
        let history = serde_json::to_string(history)?;
        let conn = self.conn()?;
        record_write(conn.execute(
            "UPDATE conversations SET conversation_history = ?1 WHERE id = ?2",
            params![history, id],
        ))?;
        tracing::info!(id, "updated conversation history");
        Ok(())
    }

    pub fn update_title(&self, id: i64, title: &str) -> Result<()> {
        let conn = self.conn()?;
        record_write(conn.execute(
            "UPDATE conversations SET title = ?1 WHERE id = ?2",
            params![title, id],
        ))?;
        tracing::info!(id, title, "updated conversation title");
        Ok(())
    }

    pub fn update_tokens(&self, id: i64, tokens: i64) -> Result<()> {
        let conn = self.conn()?;
        record_write(conn.execute(
            "UPDATE conversations SET tokens = ?1 WHERE id = ?2",
            params![tokens, id],
        ))?;
        tracing::info!(id, tokens, "updated conversation tokens");
        Ok(())
    }

    pub fn conversation_tokens(&self, id: i64) -> Result<Option<i64>> {
        let conn = self.conn()?;
        let tokens = conn
            .query_row(
                "SELECT tokens FROM conversations WHERE id = ?1",
                params![id],
                |row| row.get::<_, Option<i64>>(0),
            )
            .optional()?;
        Ok(tokens.map(|tokens| tokens.unwrap_or(0)))
    }

    /// Returns the id of the file record for `path`, inserting it if needed.
    pub fn add_file_record(&self, path: &str) -> Result<i64> {
        let conn = self.conn()?;
        record_write(conn.execute(
            "INSERT OR IGNORE INTO files (file_path) VALUES (?1)",
            params![path],
        ))?;
        let id = conn.query_row(
            "SELECT id FROM files WHERE file_path = ?1",
            params![path],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    /// Links a file to a conversation. Linking twice is a no-op.
    pub fn record_attachment(&self, conversation_id: i64, file_id: i64) -> Result<()> {
        let conn = self.conn()?;
        record_write(conn.execute(
            "INSERT OR IGNORE INTO conversation_attachements (conversation_id, file_id)
             VALUES (?1, ?2)",
            params![conversation_id, file_id],
        ))?;
        Ok(())
    }

    pub fn record_attachments<S: AsRef<str>>(&self, conversation_id: i64, paths: &[S]) -> Result<()> {
        for path in paths {
            let file_id = self.add_file_record(path.as_ref())?;
            self.record_attachment(conversation_id, file_id)?;
        }
        tracing::info!(conversation_id, count = paths.len(), "recorded attachments");
        Ok(())
    }

    /// Paths attached to a conversation, in the order they were first attached.
    pub fn attachments(&self, conversation_id: i64) -> Result<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT f.file_path FROM conversation_attachements a
             JOIN files f ON f.id = a.file_id
             WHERE a.conversation_id = ?1
             ORDER BY a.rowid",
        )?;
        let paths = stmt
            .query_map(params![conversation_id], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(paths)
    }

    /// Unlinks `path` from a conversation and drops the file record if nothing else uses it.
    pub fn remove_attachment(&self, conversation_id: i64, path: &str) -> Result<bool> {
        let removed = {
            let conn = self.conn()?;
            record_write(conn.execute(
                "DELETE FROM conversation_attachements
                 WHERE conversation_id = ?1
                   AND file_id IN (SELECT id FROM files WHERE file_path = ?2)",
                params![conversation_id, path],
            ))?
        };
        tracing::info!(conversation_id, path, removed, "removed attachment");
        self.delete_orphaned_files()?;
        Ok(removed > 0)
    }

    /// Deletes file rows no conversation refers to and returns how many went.
    pub fn delete_orphaned_files(&self) -> Result<usize> {
        let conn = self.conn()?;
        let deleted = record_write(conn.execute(
            "DELETE FROM files WHERE id NOT IN (
                 SELECT DISTINCT file_id FROM conversation_attachements
             )",
            [],
        ))?;
        tracing::info!(deleted, "deleted orphaned files");
        Ok(deleted)
    }

    /// Rebuilds the database file to reclaim free pages.
    pub fn vacuum(&self) -> Result<()> {
        let conn = self.conn()?;
        record_write(conn.execute_batch("VACUUM").map(|_| 0))?;
        tracing::info!("vacuumed conversation database");
        Ok(())
    }
}

fn add_tokens_column_if_missing(conn: &Connection) -> Result<()> {
    let mut stmt = conn.prepare("PRAGMA table_info(conversations)")?;
    let columns = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    if columns.iter().any(|column| column.eq_ignore_ascii_case("tokens")) {
        tracing::debug!("conversations.tokens already present");
        return Ok(());
    }
    conn.execute(
        "ALTER TABLE conversations ADD COLUMN tokens INTEGER DEFAULT 0",
        [],
    )?;
    tracing::info!("added tokens column to conversations");
    Ok(())
}

fn record_write(result: rusqlite::Result<usize>) -> Result<usize> {
    match result {
        Ok(changed) => {
            STORE_WRITES.click();
            Ok(changed)
        }
        Err(err) => {
            STORE_ERRORS.click();
            tracing::error!(error = %err, "database write failed");
            Err(err.into())
        }
    }
}
