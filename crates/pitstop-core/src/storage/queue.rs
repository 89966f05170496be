//! Durable write queue
//!
//! Remote mutations that could not be delivered are appended here and
//! replayed oldest first once the remote store is reachable again. Each
//! call is its own SQLite transaction, so the queue survives restarts and
//! never holds a half-applied change.

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Mutex;

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::models::Garage;
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::schema::{init_queue_schema, needs_init};

/// Remote operation to replay
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueAction {
    Upsert,
    Delete,
}

impl QueueAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueAction::Upsert => "UPSERT",
            QueueAction::Delete => "DELETE",
        }
    }
}

impl fmt::Display for QueueAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueueAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "UPSERT" => Ok(QueueAction::Upsert),
            "DELETE" => Ok(QueueAction::Delete),
            other => Err(format!("unknown queue action '{}'", other)),
        }
    }
}

/// Who the operation is for and, for upserts, the full collection
#[derive(Debug, Clone, PartialEq)]
pub struct QueuePayload {
    pub user_id: String,
    pub data: Option<Garage>,
}

impl QueuePayload {
    pub fn upsert(user_id: impl Into<String>, data: Garage) -> Self {
        Self {
            user_id: user_id.into(),
            data: Some(data),
        }
    }

    pub fn delete(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            data: None,
        }
    }
}

/// A pending remote operation
#[derive(Debug, Clone, PartialEq)]
pub struct QueueEntry {
    pub id: i64,
    pub action: QueueAction,
    pub payload: QueuePayload,
    pub enqueued_at: DateTime<Utc>,
}

/// Append-only queue of pending remote operations
pub struct WriteQueue {
    conn: Mutex<Connection>,
}

impl WriteQueue {
    /// Open (or create) the queue database at `path`
    pub fn open(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StorageError::CreateDirectory {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }
        Self::from_connection(Connection::open(path)?)
    }

    /// In-memory queue, lost on drop
    pub fn open_in_memory() -> StorageResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> StorageResult<Self> {
        if needs_init(&conn) {
            init_queue_schema(&conn)?;
        }
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> StorageResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| StorageError::LockPoisoned("write queue"))
    }

    /// Append an operation, returning its id
    pub fn enqueue(&self, action: QueueAction, payload: &QueuePayload) -> StorageResult<i64> {
        let data = payload.data.as_ref().map(serde_json::to_string).transpose()?;
        let now = Utc::now().timestamp_millis();

        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO sync_queue (action, user_id, data, enqueued_at) VALUES (?1, ?2, ?3, ?4)",
            params![action.as_str(), payload.user_id, data, now],
        )?;
        let id = conn.last_insert_rowid();
        tracing::debug!(id, %action, "Enqueued remote operation");
        Ok(id)
    }

    /// All pending entries, oldest first
    ///
    /// Rows that can no longer be decoded are deleted and skipped.
    pub fn list(&self) -> StorageResult<Vec<QueueEntry>> {
        let conn = self.conn()?;
        let rows: Vec<(i64, String, String, Option<String>, i64)> = {
            let mut stmt = conn.prepare(
                "SELECT id, action, user_id, data, enqueued_at FROM sync_queue ORDER BY id",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
            })?;
            rows.collect::<Result<_, _>>()?
        };

        let mut entries = Vec::with_capacity(rows.len());
        for (id, action, user_id, data, enqueued_at) in rows {
            match decode_entry(id, &action, user_id, data, enqueued_at) {
                Ok(entry) => entries.push(entry),
                Err(reason) => {
                    tracing::warn!(id, %reason, "Dropping corrupt queue entry");
                    conn.execute("DELETE FROM sync_queue WHERE id = ?1", [id])?;
                }
            }
        }
        Ok(entries)
    }

    /// Oldest pending entry, if any
    pub fn peek(&self) -> StorageResult<Option<QueueEntry>> {
        Ok(self.list()?.into_iter().next())
    }

    /// Remove exactly one entry after successful replay
    pub fn remove_by_id(&self, id: i64) -> StorageResult<()> {
        let conn = self.conn()?;
        conn.execute("DELETE FROM sync_queue WHERE id = ?1", [id])?;
        Ok(())
    }

    pub fn len(&self) -> StorageResult<usize> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM sync_queue", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    pub fn is_empty(&self) -> StorageResult<bool> {
        let conn = self.conn()?;
        let any = conn
            .query_row("SELECT 1 FROM sync_queue LIMIT 1", [], |_| Ok(()))
            .optional()?;
        Ok(any.is_none())
    }
}

fn decode_entry(
    id: i64,
    action: &str,
    user_id: String,
    data: Option<String>,
    enqueued_at: i64,
) -> Result<QueueEntry, String> {
    let action: QueueAction = action.parse()?;
    let data = data
        .map(|json| serde_json::from_str::<Garage>(&json))
        .transpose()
        .map_err(|e| e.to_string())?;
    if action == QueueAction::Upsert && data.is_none() {
        return Err("upsert without data".to_string());
    }
    let enqueued_at = Utc
        .timestamp_millis_opt(enqueued_at)
        .single()
        .ok_or_else(|| format!("invalid timestamp {}", enqueued_at))?;

    Ok(QueueEntry {
        id,
        action,
        payload: QueuePayload { user_id, data },
        enqueued_at,
    })
}
