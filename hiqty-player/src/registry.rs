//! Local session registry
//!
//! Guild id to the cancellation handle of the session this process runs for
//! it. Presence of an entry is the local proxy for owning playback.

use std::collections::HashMap;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct SessionHandle {
    /// Distinguishes successive sessions of the same guild
    pub id: String,
    pub cancel: CancellationToken,
}

/// At most one handle per guild. The lock is never held across an await.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, SessionHandle>>,
}

impl SessionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert unless the guild already has a session
    pub fn insert_new(&self, guild_id: &str, handle: SessionHandle) -> bool {
        let mut sessions = self.sessions.lock();
        if sessions.contains_key(guild_id) {
            return false;
        }
        sessions.insert(guild_id.to_string(), handle);
        true
    }

    pub fn remove(&self, guild_id: &str) -> Option<SessionHandle> {
        self.sessions.lock().remove(guild_id)
    }

    /// Remove the entry only if it still belongs to session `id`
    pub fn remove_if(&self, guild_id: &str, id: &str) -> bool {
        let mut sessions = self.sessions.lock();
        if sessions.get(guild_id).is_some_and(|h| h.id == id) {
            sessions.remove(guild_id);
            true
        } else {
            false
        }
    }

    #[must_use]
    pub fn contains(&self, guild_id: &str) -> bool {
        self.sessions.lock().contains_key(guild_id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }
}
