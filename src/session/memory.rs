//! In-memory session backend.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::Session;
use crate::error::SessionError;
use crate::types::items::ResponseItem;

/// Shared in-memory storage for many sessions.
///
/// Clones share the same storage. Intended for tests and local development.
#[derive(Debug, Clone, Default)]
pub struct MemorySessionStore {
    sessions: Arc<RwLock<HashMap<String, Vec<ResponseItem>>>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A handle onto one session of this store.
    pub fn session(&self, session_id: impl Into<String>) -> InMemorySession {
        InMemorySession {
            session_id: session_id.into(),
            store: self.clone(),
        }
    }

    pub async fn session_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.sessions.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Drop a session and all of its items.
    pub async fn delete(&self, session_id: &str) -> Result<(), SessionError> {
        self.sessions
            .write()
            .await
            .remove(session_id)
            .map(|_| ())
            .ok_or_else(|| SessionError::NotFound {
                session_id: session_id.to_string(),
            })
    }
}

/// One session backed by a [`MemorySessionStore`].
#[derive(Debug, Clone)]
pub struct InMemorySession {
    session_id: String,
    store: MemorySessionStore,
}

impl InMemorySession {
    /// A session with its own private store.
    pub fn new(session_id: impl Into<String>) -> Self {
        MemorySessionStore::new().session(session_id)
    }
}

#[async_trait]
impl Session for InMemorySession {
    fn session_id(&self) -> &str {
        &self.session_id
    }

    async fn get_items(&self, limit: Option<usize>) -> Result<Vec<ResponseItem>, SessionError> {
        let sessions = self.store.sessions.read().await;
        let Some(items) = sessions.get(&self.session_id) else {
            return Ok(Vec::new());
        };
        let skip = limit.map_or(0, |limit| items.len().saturating_sub(limit));
        Ok(items[skip..].to_vec())
    }

    async fn add_items(&self, items: Vec<ResponseItem>) -> Result<(), SessionError> {
        if items.is_empty() {
            return Ok(());
        }
        tracing::debug!(session = %self.session_id, count = items.len(), "Appending session items");
        self.store
            .sessions
            .write()
            .await
            .entry(self.session_id.clone())
            .or_default()
            .extend(items);
        Ok(())
    }

    async fn pop_item(&self) -> Result<Option<ResponseItem>, SessionError> {
        Ok(self
            .store
            .sessions
            .write()
            .await
            .get_mut(&self.session_id)
            .and_then(Vec::pop))
    }

    async fn clear_session(&self) -> Result<(), SessionError> {
        self.store.sessions.write().await.remove(&self.session_id);
        Ok(())
    }
}
