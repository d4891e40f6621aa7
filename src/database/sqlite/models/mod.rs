
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::database::sessions::{ChatMessage, Role};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct ChatMessageRow {
    pub id: i64,
    pub session_id: String,
    pub role: Role,
    pub content: String,
    pub created_at: NaiveDateTime,
}

impl From<ChatMessageRow> for ChatMessage {
    #[inline]
    fn from(row: ChatMessageRow) -> Self {
        Self {
            role: row.role,
            content: row.content,
        }
    }
}
