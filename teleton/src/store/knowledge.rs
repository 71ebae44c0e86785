//! Knowledge chunks: ingested memory with dual FTS + vector indexing.

use rusqlite::params;

use super::{now_millis, vector_to_blob, Store, StoreError};
use crate::hybrid;

/// Where a chunk came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KnowledgeSource {
    Memory,
    Session,
    Learned,
}

impl KnowledgeSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            KnowledgeSource::Memory => "memory",
            KnowledgeSource::Session => "session",
            KnowledgeSource::Learned => "learned",
        }
    }

    pub fn from_str_lossy(s: &str) -> Self {
        match s {
            "session" => KnowledgeSource::Session,
            "learned" => KnowledgeSource::Learned,
            _ => KnowledgeSource::Memory,
        }
    }
}

#[derive(Clone, Debug)]
pub struct KnowledgeChunk {
    pub id: i64,
    pub source: KnowledgeSource,
    pub path: Option<String>,
    pub text: String,
    pub hash: String,
    pub start_line: Option<i64>,
    pub end_line: Option<i64>,
    pub created_at: i64,
}

fn row_to_chunk(row: &rusqlite::Row<'_>) -> rusqlite::Result<KnowledgeChunk> {
    let source: String = row.get(1)?;
    Ok(KnowledgeChunk {
        id: row.get(0)?,
        source: KnowledgeSource::from_str_lossy(&source),
        path: row.get(2)?,
        text: row.get(3)?,
        hash: row.get(4)?,
        start_line: row.get(5)?,
        end_line: row.get(6)?,
        created_at: row.get(7)?,
    })
}

const CHUNK_COLS: &str = "id, source, path, text, hash, start_line, end_line, created_at";

impl Store {
    /// Inserts a chunk unless its hash already exists. Returns the rowid when
    /// inserted, `None` when the hash made it a no-op.
    pub async fn insert_knowledge(
        &self,
        source: KnowledgeSource,
        path: Option<String>,
        text: String,
        hash: String,
        lines: Option<(i64, i64)>,
    ) -> Result<Option<i64>, StoreError> {
        let source = source.as_str();
        self.with_conn(move |conn| {
            {
                let mut stmt =
                    conn.prepare_cached("SELECT id FROM knowledge WHERE hash = ?1")?;
                let mut rows = stmt.query(params![hash])?;
                if rows.next()?.is_some() {
                    return Ok(None);
                }
            }
            let now = now_millis();
            conn.prepare_cached(
                "INSERT INTO knowledge (source, path, text, hash, start_line, end_line, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
            )?
            .execute(params![
                source,
                path,
                text,
                hash,
                lines.map(|l| l.0),
                lines.map(|l| l.1),
                now
            ])?;
            Ok(Some(conn.last_insert_rowid()))
        })
        .await
    }

    /// Writes embeddings for a batch of chunks: BLOB column plus the vector
    /// table, delete-then-insert, one transaction for the whole batch.
    pub async fn set_knowledge_embeddings(
        &self,
        entries: Vec<(i64, Vec<f32>)>,
    ) -> Result<(), StoreError> {
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            for (id, vector) in &entries {
                let json = hybrid::vector_to_json(vector);
                let blob = vector_to_blob(vector);
                tx.prepare_cached("UPDATE knowledge SET embedding = ?2, updated_at = ?3 WHERE id = ?1")?
                    .execute(params![id, blob, now_millis()])?;
                tx.prepare_cached("DELETE FROM knowledge_vec WHERE rowid = ?1")?
                    .execute(params![id])?;
                tx.prepare_cached("INSERT INTO knowledge_vec (rowid, embedding) VALUES (?1, ?2)")?
                    .execute(params![id, json])?;
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    /// KNN over `knowledge_vec`; returns `(id, distance)` pairs.
    pub async fn knowledge_vector_search(
        &self,
        query: Vec<f32>,
        k: usize,
    ) -> Result<Vec<(i64, f64)>, StoreError> {
        let json = hybrid::vector_to_json(&query);
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT rowid, distance FROM knowledge_vec WHERE embedding MATCH ?1 AND k = ?2",
            )?;
            let rows = stmt.query_map(params![json, k as i64], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, f64>(1)?))
            })?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
        .await
    }

    /// BM25 over `knowledge_fts`; `query` must already be FTS-escaped.
    /// Returns `(id, rank)` pairs, rank ascending (best first).
    pub async fn knowledge_keyword_search(
        &self,
        match_expr: String,
        limit: usize,
    ) -> Result<Vec<(i64, f64)>, StoreError> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT rowid, rank FROM knowledge_fts WHERE knowledge_fts MATCH ?1
                 ORDER BY rank LIMIT ?2",
            )?;
            let rows = stmt.query_map(params![match_expr, limit as i64], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, f64>(1)?))
            })?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
        .await
    }

    pub async fn get_knowledge_chunks(
        &self,
        ids: Vec<i64>,
    ) -> Result<Vec<KnowledgeChunk>, StoreError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        self.with_conn(move |conn| {
            let placeholders: String = ids.iter().map(|_| "?").collect::<Vec<_>>().join(",");
            let sql = format!(
                "SELECT {} FROM knowledge WHERE id IN ({})",
                CHUNK_COLS, placeholders
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(rusqlite::params_from_iter(ids.iter()), row_to_chunk)?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
        .await
    }

    /// Chunks that still lack an embedding (used by re-index sweeps).
    pub async fn unembedded_knowledge(
        &self,
        limit: usize,
    ) -> Result<Vec<KnowledgeChunk>, StoreError> {
        self.with_conn(move |conn| {
            let sql = format!(
                "SELECT {} FROM knowledge WHERE embedding IS NULL ORDER BY id LIMIT ?1",
                CHUNK_COLS
            );
            let mut stmt = conn.prepare_cached(&sql)?;
            let rows = stmt.query_map(params![limit as i64], row_to_chunk)?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
        .await
    }

    pub async fn knowledge_count(&self) -> Result<i64, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare_cached("SELECT COUNT(*) FROM knowledge")?;
            Ok(stmt.query_row([], |row| row.get(0))?)
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
        s.ensure_vector_tables(4).unwrap();
        s
    }

    #[tokio::test]
    async fn duplicate_hash_is_noop() {
        let s = store().await;
        let first = s
            .insert_knowledge(
                KnowledgeSource::Memory,
                None,
                "the owner prefers short replies".into(),
                "h1".into(),
                None,
            )
            .await
            .unwrap();
        assert!(first.is_some());
        let second = s
            .insert_knowledge(
                KnowledgeSource::Memory,
                None,
                "the owner prefers short replies".into(),
                "h1".into(),
                None,
            )
            .await
            .unwrap();
        assert!(second.is_none());
        assert_eq!(s.knowledge_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn keyword_search_finds_inserted_text() {
        let s = store().await;
        s.insert_knowledge(
            KnowledgeSource::Memory,
            None,
            "wallet balance checks run hourly".into(),
            "h2".into(),
            None,
        )
        .await
        .unwrap();
        let hits = s
            .knowledge_keyword_search("\"wallet\" \"balance\"".into(), 10)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        // FTS5 rank is negative for matches.
        assert!(hits[0].1 < 0.0);
    }

    #[tokio::test]
    async fn vector_search_orders_by_distance() {
        let s = store().await;
        let a = s
            .insert_knowledge(KnowledgeSource::Memory, None, "alpha".into(), "ha".into(), None)
            .await
            .unwrap()
            .unwrap();
        let b = s
            .insert_knowledge(KnowledgeSource::Memory, None, "beta".into(), "hb".into(), None)
            .await
            .unwrap()
            .unwrap();
        s.set_knowledge_embeddings(vec![
            (a, vec![1.0, 0.0, 0.0, 0.0]),
            (b, vec![0.0, 1.0, 0.0, 0.0]),
        ])
        .await
        .unwrap();
        let hits = s
            .knowledge_vector_search(vec![0.9, 0.1, 0.0, 0.0], 2)
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].0, a);
        assert!(hits[0].1 < hits[1].1);
    }
}
