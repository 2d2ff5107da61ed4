//! Append-only audit log of every executed or failed action.
//!
//! Recording is fire-and-forget: a log failure is reported through
//! `tracing` and never aborts the turn that produced it. The core only
//! writes entries; nothing reads them back.

use chrono::Utc;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Mutex;
use tracing::warn;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ActionKind {
    Query,
    Execute,
    Insert,
    Update,
    Delete,
    Cancel,
    Fail,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Query => "QUERY",
            ActionKind::Execute => "EXECUTE",
            ActionKind::Insert => "INSERT",
            ActionKind::Update => "UPDATE",
            ActionKind::Delete => "DELETE",
            ActionKind::Cancel => "CANCEL",
            ActionKind::Fail => "FAIL",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryLogEntry {
    pub id: String,
    pub timestamp: String,
    pub user_text: String,
    pub action: ActionKind,
    pub query_text: String,
    pub entity: Option<String>,
    pub matched: u64,
    pub success: bool,
}

impl QueryLogEntry {
    pub fn new(user_text: &str, action: ActionKind, query_text: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now().to_rfc3339(),
            user_text: user_text.to_string(),
            action,
            query_text: query_text.to_string(),
            entity: None,
            matched: 0,
            success: true,
        }
    }

    pub fn with_entity(mut self, entity: &str) -> Self {
        self.entity = Some(entity.to_string());
        self
    }

    pub fn with_matched(mut self, matched: u64) -> Self {
        self.matched = matched;
        self
    }

    pub fn with_success(mut self, success: bool) -> Self {
        self.success = success;
        self
    }
}

pub trait QueryLog: Send + Sync {
    fn record(&self, entry: QueryLogEntry);
}

/// Sqlite-backed store.
pub struct SqliteQueryLog {
    conn: Mutex<Connection>,
}

impl SqliteQueryLog {
    pub fn open(path: &Path) -> crate::error::Result<Self> {
        let conn = Connection::open(path)
            .map_err(|e| crate::error::AssistantError::Execution(format!("Failed to open query log: {}", e)))?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS query_logs (
                id TEXT PRIMARY KEY,
                timestamp TEXT NOT NULL,
                user_text TEXT NOT NULL,
                action TEXT NOT NULL,
                query_text TEXT NOT NULL,
                entity TEXT,
                matched INTEGER NOT NULL,
                success INTEGER NOT NULL
            )",
            [],
        )
        .map_err(|e| crate::error::AssistantError::Execution(format!("Failed to create query log table: {}", e)))?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl QueryLog for SqliteQueryLog {
    fn record(&self, entry: QueryLogEntry) {
        let conn = match self.conn.lock() {
            Ok(conn) => conn,
            Err(_) => {
                warn!("Query log lock poisoned, dropping entry");
                return;
            }
        };

        let result = conn.execute(
            "INSERT INTO query_logs (id, timestamp, user_text, action, query_text, entity, matched, success)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                entry.id,
                entry.timestamp,
                entry.user_text,
                entry.action.as_str(),
                entry.query_text,
                entry.entity,
                entry.matched as i64,
                entry.success,
            ],
        );

        if let Err(e) = result {
            warn!("Failed to record query log entry: {}", e);
        }
    }
}

/// In-memory log for tests and for running without persistence.
#[derive(Default)]
pub struct MemoryQueryLog {
    entries: Mutex<Vec<QueryLogEntry>>,
}

impl MemoryQueryLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<QueryLogEntry> {
        self.entries
            .lock()
            .map(|entries| entries.clone())
            .unwrap_or_default()
    }
}

impl QueryLog for MemoryQueryLog {
    fn record(&self, entry: QueryLogEntry) {
        match self.entries.lock() {
            Ok(mut entries) => entries.push(entry),
            Err(_) => warn!("Query log lock poisoned, dropping entry"),
        }
    }
}
