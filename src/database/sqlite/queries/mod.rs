
use super::models::ChatMessageRow;
use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::SqlitePool;
use tracing::debug;

use crate::database::sessions::Role;

pub struct ChatMessageQueries;

impl ChatMessageQueries {
    /// Register a session id; a no-op when it already exists
    #[inline]
    pub async fn ensure_session(pool: &SqlitePool, session_id: &str) -> Result<()> {
        sqlx::query("INSERT OR IGNORE INTO chat_sessions (session_id, created_at) VALUES (?, ?)")
            .bind(session_id)
            .bind(Utc::now().naive_utc())
            .execute(pool)
            .await
            .context("Failed to create session")?;
        Ok(())
    }

    #[inline]
    pub async fn append(
        pool: &SqlitePool,
        session_id: &str,
        role: Role,
        content: &str,
    ) -> Result<i64> {
        Self::append_many(pool, session_id, &[(role, content)])
            .await?
            .pop()
            .ok_or_else(|| anyhow::anyhow!("No message id returned"))
    }

    /// Insert messages in order within one transaction
    #[inline]
    pub async fn append_many(
        pool: &SqlitePool,
        session_id: &str,
        messages: &[(Role, &str)],
    ) -> Result<Vec<i64>> {
        let now = Utc::now().naive_utc();
        let mut tx = pool.begin().await.context("Failed to begin transaction")?;

        sqlx::query("INSERT OR IGNORE INTO chat_sessions (session_id, created_at) VALUES (?, ?)")
            .bind(session_id)
            .bind(now)
            .execute(&mut *tx)
            .await
            .context("Failed to create session")?;

        let mut ids = Vec::with_capacity(messages.len());
        for (role, content) in messages {
            let id = sqlx::query(
                "INSERT INTO chat_messages (session_id, role, content, created_at) VALUES (?, ?, ?, ?)",
            )
            .bind(session_id)
            .bind(*role)
            .bind(*content)
            .bind(now)
            .execute(&mut *tx)
            .await
            .context("Failed to insert chat message")?
            .last_insert_rowid();
            ids.push(id);
        }

        tx.commit().await.context("Failed to commit chat messages")?;
        debug!("Stored {} messages for session {}", ids.len(), session_id);
        Ok(ids)
    }

    #[inline]
    pub async fn list_for_session(
        pool: &SqlitePool,
        session_id: &str,
    ) -> Result<Vec<ChatMessageRow>> {
        let rows = sqlx::query_as::<_, ChatMessageRow>(
            r#"
            SELECT id,
                   session_id,
                   role,
                   content,
                   created_at
            FROM chat_messages
            WHERE session_id = ?
            ORDER BY id ASC
            "#,
        )
        .bind(session_id)
        .fetch_all(pool)
        .await
        .context("Failed to list chat messages")?;

        Ok(rows)
    }

    /// Remove a session and its messages
    #[inline]
    pub async fn delete_session(pool: &SqlitePool, session_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM chat_sessions WHERE session_id = ?")
            .bind(session_id)
            .execute(pool)
            .await
            .context("Failed to delete session")?;

        Ok(result.rows_affected() > 0)
    }

    #[inline]
    pub async fn delete_all(pool: &SqlitePool) -> Result<u64> {
        let result = sqlx::query("DELETE FROM chat_sessions")
            .execute(pool)
            .await
            .context("Failed to delete sessions")?;

        Ok(result.rows_affected())
    }

    #[inline]
    pub async fn session_ids(pool: &SqlitePool) -> Result<Vec<String>> {
        let ids: Vec<String> =
            sqlx::query_scalar("SELECT session_id FROM chat_sessions ORDER BY session_id")
                .fetch_all(pool)
                .await
                .context("Failed to list sessions")?;
        Ok(ids)
    }
}
