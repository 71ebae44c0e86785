//! Session rows: one per chat, created on first inbound message.

use rusqlite::params;
use uuid::Uuid;

use super::{now_millis, Store, StoreError};

/// One chat session. `context_tokens` grows until compaction replaces the
/// transcript head with a summary entry.
#[derive(Clone, Debug)]
pub struct SessionRow {
    pub id: String,
    pub chat_id: i64,
    pub started_at: i64,
    pub updated_at: i64,
    pub message_count: i64,
    pub context_tokens: i64,
    pub model: Option<String>,
    pub provider: Option<String>,
    pub last_reset_date: Option<String>,
    pub summary: Option<String>,
}

fn row_to_session(row: &rusqlite::Row<'_>) -> rusqlite::Result<SessionRow> {
    Ok(SessionRow {
        id: row.get(0)?,
        chat_id: row.get(1)?,
        started_at: row.get(2)?,
        updated_at: row.get(3)?,
        message_count: row.get(4)?,
        context_tokens: row.get(5)?,
        model: row.get(6)?,
        provider: row.get(7)?,
        last_reset_date: row.get(8)?,
        summary: row.get(9)?,
    })
}

const SESSION_COLS: &str = "id, chat_id, started_at, updated_at, message_count, \
     context_tokens, model, provider, last_reset_date, summary";

impl Store {
    /// Fetches the session for `chat_id`, creating it on first contact.
    pub async fn get_or_create_session(&self, chat_id: i64) -> Result<SessionRow, StoreError> {
        self.with_conn(move |conn| {
            let sql = format!("SELECT {} FROM sessions WHERE chat_id = ?1", SESSION_COLS);
            let mut stmt = conn.prepare_cached(&sql)?;
            let mut rows = stmt.query(params![chat_id])?;
            if let Some(row) = rows.next()? {
                return Ok(row_to_session(row)?);
            }
            drop(rows);
            drop(stmt);
            let now = now_millis();
            let id = Uuid::new_v4().to_string();
            conn.prepare_cached(
                "INSERT INTO sessions (id, chat_id, started_at, updated_at) VALUES (?1, ?2, ?3, ?3)",
            )?
            .execute(params![id, chat_id, now])?;
            Ok(SessionRow {
                id,
                chat_id,
                started_at: now,
                updated_at: now,
                message_count: 0,
                context_tokens: 0,
                model: None,
                provider: None,
                last_reset_date: None,
                summary: None,
            })
        })
        .await
    }

    pub async fn get_session(&self, chat_id: i64) -> Result<Option<SessionRow>, StoreError> {
        self.with_conn(move |conn| {
            let sql = format!("SELECT {} FROM sessions WHERE chat_id = ?1", SESSION_COLS);
            let mut stmt = conn.prepare_cached(&sql)?;
            let mut rows = stmt.query(params![chat_id])?;
            match rows.next()? {
                Some(row) => Ok(Some(row_to_session(row)?)),
                None => Ok(None),
            }
        })
        .await
    }

    pub async fn list_sessions(&self) -> Result<Vec<SessionRow>, StoreError> {
        self.with_conn(move |conn| {
            let sql = format!(
                "SELECT {} FROM sessions ORDER BY updated_at DESC",
                SESSION_COLS
            );
            let mut stmt = conn.prepare_cached(&sql)?;
            let rows = stmt.query_map([], row_to_session)?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
        .await
    }

    /// Records the outcome of a turn: token count, message count delta,
    /// model/provider, bumped `updated_at`.
    pub async fn touch_session(
        &self,
        chat_id: i64,
        context_tokens: i64,
        added_messages: i64,
        model: Option<String>,
        provider: Option<String>,
    ) -> Result<(), StoreError> {
        self.with_conn(move |conn| {
            conn.prepare_cached(
                "UPDATE sessions SET context_tokens = ?2, message_count = message_count + ?3,
                     model = COALESCE(?4, model), provider = COALESCE(?5, provider), updated_at = ?6
                 WHERE chat_id = ?1",
            )?
            .execute(params![
                chat_id,
                context_tokens,
                added_messages,
                model,
                provider,
                now_millis()
            ])?;
            Ok(())
        })
        .await
    }

    /// Replaces the session summary after compaction and stores the new token
    /// estimate and message count.
    pub async fn compact_session(
        &self,
        chat_id: i64,
        summary: String,
        context_tokens: i64,
        message_count: i64,
    ) -> Result<(), StoreError> {
        self.with_conn(move |conn| {
            conn.prepare_cached(
                "UPDATE sessions SET summary = ?2, context_tokens = ?3, message_count = ?4,
                     updated_at = ?5
                 WHERE chat_id = ?1",
            )?
            .execute(params![
                chat_id,
                summary,
                context_tokens,
                message_count,
                now_millis()
            ])?;
            Ok(())
        })
        .await
    }

    /// Marks the daily soft reset: clears counters and stamps the reset date.
    pub async fn reset_session(&self, chat_id: i64, date: &str) -> Result<(), StoreError> {
        let date = date.to_string();
        self.with_conn(move |conn| {
            conn.prepare_cached(
                "UPDATE sessions SET last_reset_date = ?2, context_tokens = 0,
                     message_count = 0, summary = NULL, updated_at = ?3
                 WHERE chat_id = ?1",
            )?
            .execute(params![chat_id, date, now_millis()])?;
            Ok(())
        })
        .await
    }
}
