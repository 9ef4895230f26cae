//! Store trait — the persistence contract behind [`MemoryStore`](super::MemoryStore).
//!
//! Backends are `Send + Sync` and perform blocking I/O; the facade runs
//! every call on `spawn_blocking`. Errors are returned as-is here and are
//! made non-fatal one level up.

use crate::error::AppError;

use super::types::{SessionMemory, SessionRecord};

/// Pluggable session persistence backend.
pub trait SessionStore: Send + Sync {
    /// Short backend name for logs (e.g. `"file"`, `"sqlite"`).
    fn backend(&self) -> &'static str;

    /// Fetch the record for `session_id`. `Ok(None)` means no record exists.
    fn load(&self, session_id: &str) -> Result<Option<SessionRecord>, AppError>;

    /// Upsert the full record for `session_id`, replacing both fields.
    fn save(
        &self,
        session_id: &str,
        memory: &SessionMemory,
        transcript: &[String],
    ) -> Result<(), AppError>;
}
