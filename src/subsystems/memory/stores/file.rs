//! `file` store — one JSON document per session under a directory.
//!
//! ```text
//! {work_dir}/sessions/
//! ├── {session_id}.json
//! └── sha256-{hex}.json      (ids that are not filesystem-safe)
//! ```
//!
//! Current shape: `{ "memory": { ... }, "transcript": [ ... ] }`.
//! Legacy shape (still accepted on load): the memory fields directly at the
//! top level, with no transcript.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::AppError;
use super::super::store::SessionStore;
use super::super::types::{SessionMemory, SessionRecord, Transcript};

const MAX_PLAIN_ID_LEN: usize = 128;

/// On-disk shape of a session file.
#[derive(Serialize, Deserialize)]
struct SessionFile {
    memory: SessionMemory,
    #[serde(default)]
    transcript: Transcript,
}

#[derive(Serialize)]
struct SessionFileRef<'a> {
    memory: &'a SessionMemory,
    transcript: &'a [String],
}

pub struct FileSessionStore {
    dir: PathBuf,
}

impl FileSessionStore {
    /// Open (and create if needed) the session directory.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, AppError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .map_err(|e| AppError::Memory(format!("cannot create {}: {e}", dir.display())))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File for `session_id`. Ids made only of `[A-Za-z0-9_-]` map to
    /// themselves; anything else is hashed so client input never shapes a path.
    pub fn path_for(&self, session_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", file_stem(session_id)))
    }

    /// Decode either the wrapped or the legacy top-level shape.
    fn decode(data: &str) -> Result<SessionRecord, serde_json::Error> {
        let value: serde_json::Value = serde_json::from_str(data)?;
        if value.get("memory").is_some() {
            let file: SessionFile = serde_json::from_value(value)?;
            Ok(SessionRecord { memory: file.memory, transcript: file.transcript })
        } else {
            let memory: SessionMemory = serde_json::from_value(value)?;
            Ok(SessionRecord { memory, transcript: Vec::new() })
        }
    }
}

fn file_stem(session_id: &str) -> String {
    let plain = !session_id.is_empty()
        && session_id.len() <= MAX_PLAIN_ID_LEN
        && session_id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if plain {
        session_id.to_string()
    } else {
        format!("sha256-{}", hex::encode(Sha256::digest(session_id.as_bytes())))
    }
}

impl SessionStore for FileSessionStore {
    fn backend(&self) -> &'static str {
        "file"
    }

    fn load(&self, session_id: &str) -> Result<Option<SessionRecord>, AppError> {
        let path = self.path_for(session_id);
        if !path.exists() {
            return Ok(None);
        }
        let data = fs::read_to_string(&path)
            .map_err(|e| AppError::Memory(format!("cannot read {}: {e}", path.display())))?;
        Self::decode(&data)
            .map(Some)
            .map_err(|e| AppError::Memory(format!("malformed {}: {e}", path.display())))
    }

    fn save(
        &self,
        session_id: &str,
        memory: &SessionMemory,
        transcript: &[String],
    ) -> Result<(), AppError> {
        let path = self.path_for(session_id);
        let data = serde_json::to_string_pretty(&SessionFileRef { memory, transcript })
            .map_err(|e| AppError::Memory(format!("serialise session: {e}")))?;

        // Write-then-rename so a crash never leaves a half-written file.
        let tmp = path.with_extension("json.tmp");
        let mut f = fs::File::create(&tmp)
            .map_err(|e| AppError::Memory(format!("cannot write {}: {e}", tmp.display())))?;
        f.write_all(data.as_bytes())
            .map_err(|e| AppError::Memory(format!("write {}: {e}", tmp.display())))?;
        fs::rename(&tmp, &path)
            .map_err(|e| AppError::Memory(format!("cannot replace {}: {e}", path.display())))
    }
}
