// Storage layer
// Vector index on disk, chat history in memory or SQLite

pub mod sessions;
pub mod sqlite;
pub mod vector_store;

pub use sessions::{
    ChatMessage, InMemorySessionStore, Role, SessionGuard, SessionLocks, SessionStore,
    SqliteSessionStore, open_session_store,
};
pub use sqlite::Database;
pub use vector_store::{IndexLoad, SearchHit, VectorIndexStore};
