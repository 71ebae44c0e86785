//! Transcript rows (`tg_messages`): the per-chat message history.

use rusqlite::params;

use super::{now_millis, vector_to_blob, Store, StoreError};
use crate::message::{ChatMessage, Role, ToolCall};

/// Raw transcript row; maps 1:1 onto [`ChatMessage`].
#[derive(Clone, Debug)]
pub struct MessageRow {
    pub id: i64,
    pub chat_id: i64,
    pub sender_id: String,
    pub role: String,
    pub text: String,
    pub tool_calls: Option<String>,
    pub tool_result_for: Option<String>,
    pub timestamp: i64,
}

impl MessageRow {
    pub fn into_message(self) -> ChatMessage {
        let tool_calls: Vec<ToolCall> = self
            .tool_calls
            .as_deref()
            .and_then(|s| serde_json::from_str(s).ok())
            .unwrap_or_default();
        ChatMessage {
            id: self.id,
            chat_id: self.chat_id,
            sender: self.sender_id,
            role: Role::from_str_lossy(&self.role),
            text: self.text,
            tool_calls,
            tool_result_for: self.tool_result_for,
            timestamp: self.timestamp,
        }
    }
}

fn row_to_message_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        chat_id: row.get(1)?,
        sender_id: row.get(2)?,
        role: row.get(3)?,
        text: row.get(4)?,
        tool_calls: row.get(5)?,
        tool_result_for: row.get(6)?,
        timestamp: row.get(7)?,
    })
}

const MESSAGE_COLS: &str =
    "id, chat_id, sender_id, role, text, tool_calls, tool_result_for, timestamp";

impl Store {
    /// Appends one transcript entry; returns the assigned rowid.
    pub async fn append_message(&self, message: &ChatMessage) -> Result<i64, StoreError> {
        let chat_id = message.chat_id;
        let sender = message.sender.clone();
        let role = message.role.as_str().to_string();
        let text = message.text.clone();
        let tool_calls = if message.tool_calls.is_empty() {
            None
        } else {
            Some(serde_json::to_string(&message.tool_calls)?)
        };
        let tool_result_for = message.tool_result_for.clone();
        let timestamp = message.timestamp;
        self.with_conn(move |conn| {
            conn.prepare_cached(
                "INSERT INTO tg_messages (chat_id, sender_id, role, text, tool_calls, tool_result_for, timestamp)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )?
            .execute(params![
                chat_id,
                sender,
                role,
                text,
                tool_calls,
                tool_result_for,
                timestamp
            ])?;
            Ok(conn.last_insert_rowid())
        })
        .await
    }

    /// Most recent `limit` entries for a chat, oldest first.
    pub async fn recent_messages(
        &self,
        chat_id: i64,
        limit: usize,
    ) -> Result<Vec<ChatMessage>, StoreError> {
        self.with_conn(move |conn| {
            let sql = format!(
                "SELECT {} FROM (
                     SELECT {} FROM tg_messages WHERE chat_id = ?1
                     ORDER BY timestamp DESC, id DESC LIMIT ?2
                 ) ORDER BY timestamp ASC, id ASC",
                MESSAGE_COLS, MESSAGE_COLS
            );
            let mut stmt = conn.prepare_cached(&sql)?;
            let rows = stmt.query_map(params![chat_id, limit as i64], row_to_message_row)?;
            let rows = rows.collect::<Result<Vec<_>, _>>()?;
            Ok(rows.into_iter().map(MessageRow::into_message).collect())
        })
        .await
    }

    pub async fn message_count(&self, chat_id: i64) -> Result<i64, StoreError> {
        self.with_conn(move |conn| {
            let mut stmt =
                conn.prepare_cached("SELECT COUNT(*) FROM tg_messages WHERE chat_id = ?1")?;
            Ok(stmt.query_row(params![chat_id], |row| row.get(0))?)
        })
        .await
    }

    /// Compaction: deletes every entry for the chat except the `keep_recent`
    /// newest ones, then inserts `summary` as the new transcript head. All in
    /// one transaction so the transcript never observes a half-compacted
    /// state.
    pub async fn compact_transcript(
        &self,
        chat_id: i64,
        keep_recent: usize,
        summary: String,
    ) -> Result<(), StoreError> {
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let cutoff: Option<i64> = {
                let mut stmt = tx.prepare_cached(
                    "SELECT id FROM tg_messages WHERE chat_id = ?1
                     ORDER BY timestamp DESC, id DESC LIMIT 1 OFFSET ?2",
                )?;
                let mut rows = stmt.query(params![chat_id, keep_recent as i64 - 1])?;
                match rows.next()? {
                    Some(row) => Some(row.get(0)?),
                    None => None,
                }
            };
            if let Some(cutoff) = cutoff {
                tx.prepare_cached("DELETE FROM tg_messages WHERE chat_id = ?1 AND id < ?2")?
                    .execute(params![chat_id, cutoff])?;
                // The summary entry is timestamped just before the oldest kept
                // message so ordering stays stable.
                let head_ts: i64 = tx
                    .prepare_cached(
                        "SELECT MIN(timestamp) FROM tg_messages WHERE chat_id = ?1",
                    )?
                    .query_row(params![chat_id], |row| row.get(0))?;
                tx.prepare_cached(
                    "INSERT INTO tg_messages (chat_id, sender_id, role, text, timestamp)
                     VALUES (?1, 'assistant', 'assistant', ?2, ?3)",
                )?
                .execute(params![chat_id, summary, head_ts - 1])?;
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    /// Deletes a chat's transcript entirely (daily soft reset path).
    pub async fn clear_transcript(&self, chat_id: i64) -> Result<usize, StoreError> {
        self.with_conn(move |conn| {
            let n = conn
                .prepare_cached("DELETE FROM tg_messages WHERE chat_id = ?1")?
                .execute(params![chat_id])?;
            Ok(n)
        })
        .await
    }

    /// Conversation rows still lacking an embedding, newest first. Tool
    /// results are skipped; they are transient plumbing, not conversation.
    pub async fn unembedded_messages(
        &self,
        limit: usize,
    ) -> Result<Vec<(i64, String)>, StoreError> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT id, text FROM tg_messages
                 WHERE embedding IS NULL AND role != 'tool' AND length(text) > 0
                 ORDER BY id DESC LIMIT ?1",
            )?;
            let rows = stmt.query_map(params![limit as i64], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
            })?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
        .await
    }

    /// KNN over `tg_messages_vec`, post-filtered to one chat. Returns
    /// `(id, distance)` pairs; fewer than `k` when other chats dominate the
    /// neighbourhood.
    pub async fn transcript_vector_search(
        &self,
        chat_id: i64,
        query: Vec<f32>,
        k: usize,
    ) -> Result<Vec<(i64, f64)>, StoreError> {
        let json = crate::hybrid::vector_to_json(&query);
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT m.id, v.distance
                 FROM tg_messages_vec v JOIN tg_messages m ON m.id = v.rowid
                 WHERE v.embedding MATCH ?1 AND k = ?2 AND m.chat_id = ?3",
            )?;
            let rows = stmt.query_map(params![json, k as i64, chat_id], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, f64>(1)?))
            })?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
        .await
    }

    /// BM25 over `tg_messages_fts` scoped to one chat.
    pub async fn transcript_keyword_search(
        &self,
        chat_id: i64,
        match_expr: String,
        limit: usize,
    ) -> Result<Vec<(i64, f64)>, StoreError> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT m.id, f.rank
                 FROM tg_messages_fts f JOIN tg_messages m ON m.id = f.rowid
                 WHERE tg_messages_fts MATCH ?1 AND m.chat_id = ?2
                 ORDER BY f.rank LIMIT ?3",
            )?;
            let rows = stmt.query_map(params![match_expr, chat_id, limit as i64], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, f64>(1)?))
            })?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
        .await
    }

    pub async fn get_messages(&self, ids: Vec<i64>) -> Result<Vec<ChatMessage>, StoreError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        self.with_conn(move |conn| {
            let placeholders: String = ids.iter().map(|_| "?").collect::<Vec<_>>().join(",");
            let sql = format!(
                "SELECT {} FROM tg_messages WHERE id IN ({})",
                MESSAGE_COLS, placeholders
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(
                rusqlite::params_from_iter(ids.iter()),
                row_to_message_row,
            )?;
            let rows = rows.collect::<Result<Vec<_>, _>>()?;
            Ok(rows.into_iter().map(MessageRow::into_message).collect())
        })
        .await
    }

    /// Attaches an embedding to a transcript row and mirrors it into the
    /// vector table (delete-then-insert; vec0 has no upsert).
    pub async fn set_message_embedding(
        &self,
        message_id: i64,
        vector: Vec<f32>,
    ) -> Result<(), StoreError> {
        let json = crate::hybrid::vector_to_json(&vector);
        let blob = vector_to_blob(&vector);
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            tx.prepare_cached("UPDATE tg_messages SET embedding = ?2 WHERE id = ?1")?
                .execute(params![message_id, blob])?;
            tx.prepare_cached("DELETE FROM tg_messages_vec WHERE rowid = ?1")?
                .execute(params![message_id])?;
            tx.prepare_cached("INSERT INTO tg_messages_vec (rowid, embedding) VALUES (?1, ?2)")?
                .execute(params![message_id, json])?;
            tx.commit()?;
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store() -> Store {
        let s = Store::open_in_memory().unwrap();
        s.migrate().unwrap();
        s
    }

    fn msg(chat_id: i64, text: &str, ts: i64) -> ChatMessage {
        let mut m = ChatMessage::user(chat_id, "u1", text);
        m.timestamp = ts;
        m
    }

    #[tokio::test]
    async fn append_and_read_in_order() {
        let s = store().await;
        for (i, t) in ["a", "b", "c"].iter().enumerate() {
            s.append_message(&msg(1, t, 100 + i as i64)).await.unwrap();
        }
        let msgs = s.recent_messages(1, 10).await.unwrap();
        let texts: Vec<_> = msgs.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn recent_limit_keeps_newest() {
        let s = store().await;
        for i in 0..5 {
            s.append_message(&msg(1, &format!("m{}", i), 100 + i))
                .await
                .unwrap();
        }
        let msgs = s.recent_messages(1, 2).await.unwrap();
        let texts: Vec<_> = msgs.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec!["m3", "m4"]);
    }

    #[tokio::test]
    async fn compaction_keeps_recent_plus_summary() {
        let s = store().await;
        for i in 0..30 {
            s.append_message(&msg(1, &format!("m{}", i), 100 + i))
                .await
                .unwrap();
        }
        s.compact_transcript(1, 20, "summary of m0..m9".into())
            .await
            .unwrap();
        let msgs = s.recent_messages(1, 100).await.unwrap();
        assert_eq!(msgs.len(), 21);
        assert_eq!(msgs[0].text, "summary of m0..m9");
        assert_eq!(msgs[1].text, "m10");
        assert_eq!(msgs.last().unwrap().text, "m29");
    }

    #[tokio::test]
    async fn clear_removes_all_rows() {
        let s = store().await;
        s.append_message(&msg(9, "x", 1)).await.unwrap();
        s.append_message(&msg(9, "y", 2)).await.unwrap();
        assert_eq!(s.clear_transcript(9).await.unwrap(), 2);
        assert_eq!(s.message_count(9).await.unwrap(), 0);
    }
}
