//! Bounded LRU cache of live session agents.
//!
//! Every lookup or insert promotes the entry; exceeding the capacity drops
//! the least-recently-used agent. Dropping an agent never touches its
//! persisted record: the next request for that id reloads it from the store.
//!
//! An evicted agent that is still referenced (a turn in flight, a stream
//! being drained) stays reachable through a weak index, so a request for
//! its id gets the same instance and waits on the same lock instead of
//! loading a second copy.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use lru::LruCache;
use tracing::{debug, info};

use crate::error::AppError;
use crate::llm::LlmBridge;
use crate::subsystems::memory::MemoryStore;

use super::apps::AppLauncher;
use super::session::SessionAgent;

/// An agent shared between the registry and in-flight requests. The async
/// mutex serialises turns of one session.
pub type SharedAgent = Arc<tokio::sync::Mutex<SessionAgent>>;

struct Agents {
    cache: LruCache<String, SharedAgent>,
    /// Every agent handed out, cached or not. Dead entries are pruned on insert.
    live: HashMap<String, Weak<tokio::sync::Mutex<SessionAgent>>>,
}

impl Agents {
    /// Cached agent, or a still-referenced evicted one (re-cached).
    fn lookup(&mut self, session_id: &str) -> Option<SharedAgent> {
        if let Some(agent) = self.cache.get(session_id) {
            return Some(agent.clone());
        }
        let agent = self.live.get(session_id)?.upgrade()?;
        debug!(%session_id, "evicted session agent still in use, re-cached");
        self.insert(session_id, agent.clone());
        Some(agent)
    }

    fn insert(&mut self, session_id: &str, agent: SharedAgent) {
        self.live.insert(session_id.to_string(), Arc::downgrade(&agent));
        if let Some((evicted, _)) = self.cache.push(session_id.to_string(), agent) {
            if evicted != session_id {
                info!(session_id = %evicted, "session agent evicted");
            }
        }
        self.live.retain(|_, agent| agent.strong_count() > 0);
    }
}

pub struct SessionRegistry {
    agents: Mutex<Agents>,
    store: MemoryStore,
    /// `Err` carries why no model is available; agent construction fails with it.
    llm: Result<Arc<LlmBridge>, String>,
    launcher: Arc<AppLauncher>,
}

impl SessionRegistry {
    pub fn new(
        capacity: usize,
        store: MemoryStore,
        llm: Result<Arc<LlmBridge>, String>,
        launcher: Arc<AppLauncher>,
    ) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        let agents = Agents { cache: LruCache::new(capacity), live: HashMap::new() };
        Self { agents: Mutex::new(agents), store, llm, launcher }
    }

    /// Agent for `session_id`, loading it from the store when no live
    /// instance exists.
    pub async fn get_or_create(&self, session_id: &str) -> Result<SharedAgent, AppError> {
        let found = self.agents().lookup(session_id);
        if let Some(agent) = found {
            return Ok(agent);
        }

        let llm = self.llm.clone().map_err(AppError::Config)?;
        // Loaded without holding the registry lock; a concurrent miss for the
        // same id may also load, and the first insert wins below.
        let agent = SessionAgent::load(session_id, self.store.clone(), llm, self.launcher.clone()).await;

        let mut agents = self.agents();
        if let Some(existing) = agents.lookup(session_id) {
            return Ok(existing);
        }
        let shared: SharedAgent = Arc::new(tokio::sync::Mutex::new(agent));
        agents.insert(session_id, shared.clone());
        debug!(%session_id, cached = agents.cache.len(), "session agent created");
        Ok(shared)
    }

    /// Cached session ids, most recently used first.
    pub fn session_ids(&self) -> Vec<String> {
        self.agents().cache.iter().map(|(id, _)| id.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.agents().cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents().cache.is_empty()
    }

    /// Presence check that does not promote the entry.
    pub fn contains(&self, session_id: &str) -> bool {
        self.agents().cache.contains(session_id)
    }

    fn agents(&self) -> MutexGuard<'_, Agents> {
        self.agents.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
