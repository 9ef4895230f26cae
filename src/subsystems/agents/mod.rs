//! Agents subsystem — per-session conversational agents and their registry.
//!
//! ```text
//! SessionRegistry::get_or_create(id) ──► SessionAgent ──► commands::find_command
//!                                             │                 │
//!                                             │            (no match)
//!                                             ▼                 ▼
//!                                        MemoryStore        LlmBridge
//! ```

pub mod apps;
pub mod commands;
pub mod registry;
pub mod session;

use serde::Serialize;

pub use registry::{SessionRegistry, SharedAgent};
pub use session::{SessionAgent, StreamEvent, Turn};

/// Side effect the caller is asked to perform outside the service.
///
/// Serialises as `{"type": "open_url", "payload": {"url": "..."}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum Action {
    None,
    OpenUrl { url: String },
    ExecuteApp { app_name: String },
    Exit,
}

/// Spoken reply plus action for one turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Reply {
    pub speech: String,
    pub action: Action,
}

impl Reply {
    pub fn speech(speech: impl Into<String>) -> Self {
        Self { speech: speech.into(), action: Action::None }
    }

    /// Answer to blank input.
    pub fn silent() -> Self {
        Self::speech("")
    }
}
