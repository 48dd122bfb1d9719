//! Conversation history persisted across runs.

pub mod memory;

pub use memory::{InMemorySession, MemorySessionStore};

use async_trait::async_trait;

use crate::error::SessionError;
use crate::types::items::ResponseItem;

/// Ordered conversation history for one session id.
///
/// Items come back in insertion order. Implementations must keep sessions
/// with different ids isolated.
#[async_trait]
pub trait Session: Send + Sync {
    fn session_id(&self) -> &str;

    /// The newest `limit` items (all items when `None`), oldest first.
    async fn get_items(&self, limit: Option<usize>) -> Result<Vec<ResponseItem>, SessionError>;

    async fn add_items(&self, items: Vec<ResponseItem>) -> Result<(), SessionError>;

    /// Remove and return the newest item.
    async fn pop_item(&self) -> Result<Option<ResponseItem>, SessionError>;

    async fn clear_session(&self) -> Result<(), SessionError>;
}
