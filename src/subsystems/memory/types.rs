//! Value types persisted per session.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Structured facts kept for one session.
///
/// Field aliases accept the key names written by earlier deployments
/// (`nombre`, `nombre_usuario`, `datos_aprendidos`), so old records load
/// unchanged. New writes always use the English names.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionMemory {
    /// Empty until the first utterance names the assistant.
    #[serde(default, alias = "nombre")]
    pub assistant_name: String,
    #[serde(default, alias = "nombre_usuario")]
    pub user_name: String,
    #[serde(default, alias = "datos_aprendidos")]
    pub learned_facts: BTreeMap<String, String>,
}

impl SessionMemory {
    /// `true` once the assistant has a name and the full command table applies.
    pub fn is_named(&self) -> bool {
        !self.assistant_name.is_empty()
    }
}

/// Conversation log: user and assistant turns alternating, oldest first.
pub type Transcript = Vec<String>;

/// One session's persisted unit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionRecord {
    pub memory: SessionMemory,
    pub transcript: Transcript,
}
