// Conversation history, keyed by session id

#[cfg(test)]
mod tests;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info};

use super::sqlite::{ChatMessageQueries, Database};
use crate::config::{Config, SessionBackend};
use crate::{RagError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "TEXT", rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl fmt::Display for Role {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
            Role::System => write!(f, "system"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    #[inline]
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    #[inline]
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    #[inline]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    #[inline]
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }
}

/// Ordered message history per session id.
///
/// Sessions are created on first access and removed only by `clear`.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// History of `session_id`, creating an empty session if needed
    async fn get_or_create(&self, session_id: &str) -> Result<Vec<ChatMessage>>;

    async fn append(&self, session_id: &str, role: Role, content: &str) -> Result<()>;

    /// Record one completed exchange
    #[inline]
    async fn append_turn(&self, session_id: &str, question: &str, answer: &str) -> Result<()> {
        self.append(session_id, Role::User, question).await?;
        self.append(session_id, Role::Assistant, answer).await
    }

    async fn clear(&self, session_id: &str) -> Result<()>;

    async fn clear_all(&self) -> Result<()>;

    async fn session_ids(&self) -> Result<Vec<String>>;
}

/// Process-local history, lost on restart
#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<String, Vec<ChatMessage>>>,
}

impl InMemorySessionStore {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    #[inline]
    async fn get_or_create(&self, session_id: &str) -> Result<Vec<ChatMessage>> {
        if let Some(history) = self.sessions.read().get(session_id) {
            return Ok(history.clone());
        }
        let mut sessions = self.sessions.write();
        Ok(sessions.entry(session_id.to_string()).or_default().clone())
    }

    #[inline]
    async fn append(&self, session_id: &str, role: Role, content: &str) -> Result<()> {
        self.sessions
            .write()
            .entry(session_id.to_string())
            .or_default()
            .push(ChatMessage::new(role, content));
        Ok(())
    }

    #[inline]
    async fn append_turn(&self, session_id: &str, question: &str, answer: &str) -> Result<()> {
        let mut sessions = self.sessions.write();
        let history = sessions.entry(session_id.to_string()).or_default();
        history.push(ChatMessage::user(question));
        history.push(ChatMessage::assistant(answer));
        Ok(())
    }

    #[inline]
    async fn clear(&self, session_id: &str) -> Result<()> {
        self.sessions.write().remove(session_id);
        Ok(())
    }

    #[inline]
    async fn clear_all(&self) -> Result<()> {
        self.sessions.write().clear();
        Ok(())
    }

    #[inline]
    async fn session_ids(&self) -> Result<Vec<String>> {
        let mut ids: Vec<String> = self.sessions.read().keys().cloned().collect();
        ids.sort_unstable();
        Ok(ids)
    }
}

/// Durable history in SQLite, shareable between processes
#[derive(Debug, Clone)]
pub struct SqliteSessionStore {
    database: Database,
}

impl SqliteSessionStore {
    #[inline]
    pub fn new(database: Database) -> Self {
        Self { database }
    }

    #[inline]
    pub async fn open(path: &std::path::Path) -> Result<Self> {
        let database = Database::open(path).await.map_err(database_error)?;
        info!("Session history stored in {}", path.display());
        Ok(Self::new(database))
    }
}

fn database_error(error: anyhow::Error) -> RagError {
    RagError::Database(format!("{:#}", error))
}

#[async_trait]
impl SessionStore for SqliteSessionStore {
    #[inline]
    async fn get_or_create(&self, session_id: &str) -> Result<Vec<ChatMessage>> {
        let pool = self.database.pool();
        ChatMessageQueries::ensure_session(pool, session_id)
            .await
            .map_err(database_error)?;
        let rows = ChatMessageQueries::list_for_session(pool, session_id)
            .await
            .map_err(database_error)?;
        Ok(rows.into_iter().map(ChatMessage::from).collect())
    }

    #[inline]
    async fn append(&self, session_id: &str, role: Role, content: &str) -> Result<()> {
        ChatMessageQueries::append(self.database.pool(), session_id, role, content)
            .await
            .map_err(database_error)?;
        Ok(())
    }

    #[inline]
    async fn append_turn(&self, session_id: &str, question: &str, answer: &str) -> Result<()> {
        ChatMessageQueries::append_many(
            self.database.pool(),
            session_id,
            &[(Role::User, question), (Role::Assistant, answer)],
        )
        .await
        .map_err(database_error)?;
        Ok(())
    }

    #[inline]
    async fn clear(&self, session_id: &str) -> Result<()> {
        ChatMessageQueries::delete_session(self.database.pool(), session_id)
            .await
            .map_err(database_error)?;
        Ok(())
    }

    #[inline]
    async fn clear_all(&self) -> Result<()> {
        let removed = ChatMessageQueries::delete_all(self.database.pool())
            .await
            .map_err(database_error)?;
        debug!("Removed {} sessions", removed);
        Ok(())
    }

    #[inline]
    async fn session_ids(&self) -> Result<Vec<String>> {
        ChatMessageQueries::session_ids(self.database.pool())
            .await
            .map_err(database_error)
    }
}

/// Build the session store selected in the configuration
#[inline]
pub async fn open_session_store(config: &Config) -> Result<Arc<dyn SessionStore>> {
    match config.sessions.backend {
        SessionBackend::Memory => {
            debug!("Using in-memory session history");
            Ok(Arc::new(InMemorySessionStore::new()))
        }
        SessionBackend::Sqlite => {
            let store = SqliteSessionStore::open(&config.session_database_path()).await?;
            Ok(Arc::new(store))
        }
    }
}

/// One async mutex per session id.
///
/// The map itself is locked only long enough to find or insert an entry, so
/// different sessions never wait on each other.
#[derive(Debug, Default)]
pub struct SessionLocks {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl SessionLocks {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive use of `session_id`; released when the guard drops
    #[inline]
    pub async fn acquire(&self, session_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock();
            Arc::clone(locks.entry(session_id.to_string()).or_default())
        };
        lock.lock_owned().await
    }

    /// Like `acquire`, but the entry is also released from the map when the
    /// guard drops
    #[inline]
    pub async fn lock(self: &Arc<Self>, session_id: &str) -> SessionGuard {
        let guard = self.acquire(session_id).await;
        SessionGuard {
            guard: Some(guard),
            locks: Arc::clone(self),
            session_id: session_id.to_string(),
        }
    }

    /// Ids that currently have a holder or waiter, sorted
    #[inline]
    pub fn active_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.locks.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Drop the entry for `session_id` if nobody holds or waits on it
    #[inline]
    pub fn release_idle(&self, session_id: &str) {
        let mut locks = self.locks.lock();
        if locks
            .get(session_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(session_id);
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.locks.lock().len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Exclusive use of one session
#[derive(Debug)]
pub struct SessionGuard {
    guard: Option<OwnedMutexGuard<()>>,
    locks: Arc<SessionLocks>,
    session_id: String,
}

impl SessionGuard {
    #[inline]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }
}

impl Drop for SessionGuard {
    #[inline]
    fn drop(&mut self) {
        drop(self.guard.take());
        self.locks.release_idle(&self.session_id);
    }
}
