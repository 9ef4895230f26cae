//! `sqlite` store — durable session records in a single SQLite table.
//!
//! ```sql
//! memories(session_id TEXT PRIMARY KEY, memory_json TEXT NOT NULL, history_json TEXT)
//! ```
//!
//! `history_json` is nullable: rows written before transcripts were
//! persisted decode to an empty transcript.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::{Connection, OptionalExtension, params};

use crate::error::AppError;
use super::super::store::SessionStore;
use super::super::types::{SessionMemory, SessionRecord, Transcript};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct SqliteSessionStore {
    db_path: PathBuf,
}

impl SqliteSessionStore {
    /// Open the database at `db_path`, creating the file and table if needed.
    pub fn open(db_path: impl Into<PathBuf>) -> Result<Self, AppError> {
        let db_path = db_path.into();
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| {
                AppError::Memory(format!("sqlite: cannot create {}: {e}", parent.display()))
            })?;
        }
        let store = Self { db_path };
        store.init_db()?;
        Ok(store)
    }

    /// Resolve a `DATABASE_URL` value to a database file path.
    ///
    /// Accepts `sqlite://path`, `sqlite:path` and bare paths. Other schemes
    /// (e.g. `postgres://`) are rejected.
    pub fn path_from_url(url: &str) -> Result<PathBuf, AppError> {
        let url = url.trim();
        let path = url
            .strip_prefix("sqlite://")
            .or_else(|| url.strip_prefix("sqlite:"))
            .unwrap_or(url);
        if path.is_empty() {
            return Err(AppError::Config("DATABASE_URL has no database path".into()));
        }
        if path.contains("://") {
            return Err(AppError::Config(format!(
                "unsupported DATABASE_URL scheme: {}",
                url.split("://").next().unwrap_or(url)
            )));
        }
        Ok(PathBuf::from(path))
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn open_conn(&self) -> Result<Connection, AppError> {
        let conn = Connection::open(&self.db_path).map_err(|e| {
            AppError::Memory(format!("sqlite: cannot open {}: {e}", self.db_path.display()))
        })?;
        conn.busy_timeout(BUSY_TIMEOUT)
            .map_err(|e| AppError::Memory(format!("sqlite: busy_timeout: {e}")))?;
        Ok(conn)
    }

    fn init_db(&self) -> Result<(), AppError> {
        let conn = self.open_conn()?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS memories (
                session_id   TEXT PRIMARY KEY NOT NULL,
                memory_json  TEXT NOT NULL,
                history_json TEXT
            );",
        )
        .map_err(|e| AppError::Memory(format!("sqlite: create table: {e}")))
    }
}

impl SessionStore for SqliteSessionStore {
    fn backend(&self) -> &'static str {
        "sqlite"
    }

    fn load(&self, session_id: &str) -> Result<Option<SessionRecord>, AppError> {
        let conn = self.open_conn()?;
        let row: Option<(String, Option<String>)> = conn
            .query_row(
                "SELECT memory_json, history_json FROM memories WHERE session_id = ?1",
                params![session_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(|e| AppError::Memory(format!("sqlite: select: {e}")))?;

        let Some((memory_json, history_json)) = row else {
            return Ok(None);
        };

        let memory: SessionMemory = serde_json::from_str(&memory_json)
            .map_err(|e| AppError::Memory(format!("sqlite: malformed memory_json: {e}")))?;
        let transcript: Transcript = match history_json.as_deref().map(str::trim) {
            None | Some("") => Vec::new(),
            Some(raw) => serde_json::from_str(raw)
                .map_err(|e| AppError::Memory(format!("sqlite: malformed history_json: {e}")))?,
        };

        Ok(Some(SessionRecord { memory, transcript }))
    }

    fn save(
        &self,
        session_id: &str,
        memory: &SessionMemory,
        transcript: &[String],
    ) -> Result<(), AppError> {
        let memory_json = serde_json::to_string(memory)
            .map_err(|e| AppError::Memory(format!("sqlite: serialise memory: {e}")))?;
        let history_json = serde_json::to_string(transcript)
            .map_err(|e| AppError::Memory(format!("sqlite: serialise transcript: {e}")))?;

        let conn = self.open_conn()?;
        conn.execute(
            "INSERT INTO memories (session_id, memory_json, history_json) VALUES (?1, ?2, ?3)
             ON CONFLICT(session_id) DO UPDATE SET
                memory_json = excluded.memory_json,
                history_json = excluded.history_json",
            params![session_id, memory_json, history_json],
        )
        .map_err(|e| AppError::Memory(format!("sqlite: upsert: {e}")))?;
        Ok(())
    }
}
