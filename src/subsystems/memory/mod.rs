//! Memory subsystem — per-session memory and transcript persistence.
//!
//! [`MemoryStore`] is the facade the agents talk to. It wraps one
//! [`SessionStore`] backend, selected once at startup:
//!
//! * `DATABASE_URL` set   → [`stores::sqlite::SqliteSessionStore`]
//! * otherwise            → [`stores::file::FileSessionStore`] under
//!   `{work_dir}/sessions/`
//!
//! Persistence is best-effort by contract. `load` always yields a usable
//! record (blank on miss or failure) and `save` reports success as a bool;
//! failures are logged here and never reach the conversation.

pub mod store;
pub mod stores;
pub mod types;

pub use store::SessionStore;
pub use types::{SessionMemory, SessionRecord, Transcript};

use std::sync::Arc;

use tracing::{debug, error, info};

use crate::config::Config;
use crate::error::AppError;
use stores::file::FileSessionStore;
use stores::sqlite::SqliteSessionStore;

/// Cheaply cloneable handle over the selected backend.
#[derive(Clone)]
pub struct MemoryStore {
    backend: Arc<dyn SessionStore>,
}

impl MemoryStore {
    pub fn new(backend: Arc<dyn SessionStore>) -> Self {
        Self { backend }
    }

    /// Pick the backend from config: durable SQLite when `DATABASE_URL` is
    /// set, local JSON files otherwise.
    pub fn from_config(config: &Config) -> Result<Self, AppError> {
        let backend: Arc<dyn SessionStore> = match config.database_url.as_deref() {
            Some(url) => {
                let path = SqliteSessionStore::path_from_url(url)?;
                let store = SqliteSessionStore::open(&path)?;
                info!(db = %path.display(), "memory: durable sqlite backend");
                Arc::new(store)
            }
            None => {
                let store = FileSessionStore::open(config.sessions_dir())?;
                info!(dir = %store.dir().display(), "memory: no DATABASE_URL, using local files");
                Arc::new(store)
            }
        };
        Ok(Self::new(backend))
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.backend()
    }

    /// Load a session. Misses and failures both yield a blank record.
    pub async fn load(&self, session_id: &str) -> SessionRecord {
        let backend = self.backend.clone();
        let id = session_id.to_string();
        let result = tokio::task::spawn_blocking(move || backend.load(&id))
            .await
            .map_err(|e| AppError::Memory(format!("load join: {e}")))
            .and_then(|r| r);

        match result {
            Ok(Some(record)) => {
                debug!(%session_id, backend = self.backend_name(), "memory: session loaded");
                record
            }
            Ok(None) => {
                info!(%session_id, backend = self.backend_name(), "memory: no record, starting blank");
                SessionRecord::default()
            }
            Err(e) => {
                error!(%session_id, backend = self.backend_name(), error = %e, "memory: load failed, using blank memory");
                SessionRecord::default()
            }
        }
    }

    /// Persist both fields of a session, overwriting any previous record.
    /// Returns `false` (after logging) when the write did not happen.
    pub async fn save(&self, session_id: &str, memory: &SessionMemory, transcript: &[String]) -> bool {
        let backend = self.backend.clone();
        let id = session_id.to_string();
        let memory = memory.clone();
        let transcript = transcript.to_vec();
        let result = tokio::task::spawn_blocking(move || backend.save(&id, &memory, &transcript))
            .await
            .map_err(|e| AppError::Memory(format!("save join: {e}")))
            .and_then(|r| r);

        match result {
            Ok(()) => {
                debug!(%session_id, backend = self.backend_name(), "memory: session saved");
                true
            }
            Err(e) => {
                error!(%session_id, backend = self.backend_name(), error = %e, "memory: save failed, state not persisted");
                false
            }
        }
    }
}
