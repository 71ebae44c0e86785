//! Storage side of the tool index: `tool_index` rows plus their FTS and
//! vector companions. The scoring/merge logic lives in `tools::index`.

use rusqlite::params;

use super::{Store, StoreError};
use crate::hybrid;

/// One branch hit: tool name plus the branch's raw signal.
#[derive(Clone, Debug)]
pub struct ToolIndexHit {
    pub name: String,
    pub signal: f64,
}

impl Store {
    /// Replaces the indexed rows for `entries` (name, description). Rows for
    /// names not in `keep` are deleted. Embeddings are attached separately by
    /// [`Store::set_tool_embeddings`] because the vector table needs the
    /// embedder output.
    pub async fn tool_index_sync(
        &self,
        entries: Vec<(String, String)>,
        keep: Vec<String>,
    ) -> Result<Vec<(i64, String)>, StoreError> {
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            {
                // Remove rows (and their vectors) for tools that no longer exist.
                let mut stale_ids = Vec::new();
                {
                    let mut stmt = tx.prepare_cached("SELECT id, name FROM tool_index")?;
                    let rows = stmt.query_map([], |row| {
                        Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
                    })?;
                    for row in rows {
                        let (id, name) = row?;
                        if !keep.contains(&name) {
                            stale_ids.push(id);
                        }
                    }
                }
                for id in stale_ids {
                    tx.prepare_cached("DELETE FROM tool_index_vec WHERE rowid = ?1")?
                        .execute(params![id])?;
                    tx.prepare_cached("DELETE FROM tool_index WHERE id = ?1")?
                        .execute(params![id])?;
                }
            }
            let mut new_rows = Vec::new();
            for (name, description) in &entries {
                let existing: Option<i64> = {
                    let mut stmt =
                        tx.prepare_cached("SELECT id FROM tool_index WHERE name = ?1")?;
                    let mut rows = stmt.query(params![name])?;
                    match rows.next()? {
                        Some(row) => Some(row.get(0)?),
                        None => None,
                    }
                };
                match existing {
                    Some(id) => {
                        tx.prepare_cached(
                            "UPDATE tool_index SET description = ?2, embedded = 0 WHERE id = ?1",
                        )?
                        .execute(params![id, description])?;
                        tx.prepare_cached("DELETE FROM tool_index_vec WHERE rowid = ?1")?
                            .execute(params![id])?;
                        new_rows.push((id, name.clone()));
                    }
                    None => {
                        tx.prepare_cached(
                            "INSERT INTO tool_index (name, description) VALUES (?1, ?2)",
                        )?
                        .execute(params![name, description])?;
                        new_rows.push((tx.last_insert_rowid(), name.clone()));
                    }
                }
            }
            tx.commit()?;
            Ok(new_rows)
        })
        .await
    }

    /// Attaches embeddings to index rows (delete-then-insert in the vec0
    /// table; it has no upsert) and flips the `embedded` flag.
    pub async fn set_tool_embeddings(
        &self,
        entries: Vec<(i64, Vec<f32>)>,
    ) -> Result<(), StoreError> {
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            for (id, vector) in &entries {
                let json = hybrid::vector_to_json(vector);
                tx.prepare_cached("DELETE FROM tool_index_vec WHERE rowid = ?1")?
                    .execute(params![id])?;
                tx.prepare_cached("INSERT INTO tool_index_vec (rowid, embedding) VALUES (?1, ?2)")?
                    .execute(params![id, json])?;
                tx.prepare_cached("UPDATE tool_index SET embedded = 1 WHERE id = ?1")?
                    .execute(params![id])?;
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    /// Vector branch: KNN over `tool_index_vec`; signal is the raw distance.
    pub async fn tool_vector_search(
        &self,
        query: Vec<f32>,
        k: usize,
    ) -> Result<Vec<ToolIndexHit>, StoreError> {
        let json = hybrid::vector_to_json(&query);
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT t.name, v.distance
                 FROM tool_index_vec v JOIN tool_index t ON t.id = v.rowid
                 WHERE v.embedding MATCH ?1 AND k = ?2",
            )?;
            let rows = stmt.query_map(params![json, k as i64], |row| {
                Ok(ToolIndexHit {
                    name: row.get(0)?,
                    signal: row.get(1)?,
                })
            })?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
        .await
    }

    /// Keyword branch: BM25 over `tool_index_fts`; signal is the raw rank.
    pub async fn tool_keyword_search(
        &self,
        match_expr: String,
        limit: usize,
    ) -> Result<Vec<ToolIndexHit>, StoreError> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT t.name, f.rank
                 FROM tool_index_fts f JOIN tool_index t ON t.id = f.rowid
                 WHERE tool_index_fts MATCH ?1
                 ORDER BY f.rank LIMIT ?2",
            )?;
            let rows = stmt.query_map(params![match_expr, limit as i64], |row| {
                Ok(ToolIndexHit {
                    name: row.get(0)?,
                    signal: row.get(1)?,
                })
            })?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
        .await
    }

    pub async fn tool_index_names(&self) -> Result<Vec<String>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare_cached("SELECT name FROM tool_index ORDER BY name")?;
            let rows = stmt.query_map([], |row| row.get(0))?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
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
        s.ensure_vector_tables(3).unwrap();
        s
    }

    #[tokio::test]
    async fn sync_inserts_updates_and_prunes() {
        let s = store().await;
        s.tool_index_sync(
            vec![
                ("ton_send".into(), "send TON to an address".into()),
                ("web_fetch".into(), "fetch a web page".into()),
            ],
            vec!["ton_send".into(), "web_fetch".into()],
        )
        .await
        .unwrap();
        assert_eq!(
            s.tool_index_names().await.unwrap(),
            vec!["ton_send".to_string(), "web_fetch".to_string()]
        );

        // Drop one, keep one.
        s.tool_index_sync(vec![], vec!["ton_send".into()]).await.unwrap();
        assert_eq!(s.tool_index_names().await.unwrap(), vec!["ton_send".to_string()]);
    }

    #[tokio::test]
    async fn keyword_search_matches_description() {
        let s = store().await;
        s.tool_index_sync(
            vec![("ton_send".into(), "send TON coins to a wallet address".into())],
            vec!["ton_send".into()],
        )
        .await
        .unwrap();
        let hits = s
            .tool_keyword_search("\"wallet\"".into(), 10)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].name, "ton_send");
    }

    #[tokio::test]
    async fn vector_search_joins_names() {
        let s = store().await;
        let rows = s
            .tool_index_sync(
                vec![("a".into(), "alpha".into()), ("b".into(), "beta".into())],
                vec!["a".into(), "b".into()],
            )
            .await
            .unwrap();
        let entries = rows
            .iter()
            .map(|(id, name)| {
                let v = if name == "a" {
                    vec![1.0, 0.0, 0.0]
                } else {
                    vec![0.0, 1.0, 0.0]
                };
                (*id, v)
            })
            .collect();
        s.set_tool_embeddings(entries).await.unwrap();
        let hits = s.tool_vector_search(vec![1.0, 0.0, 0.0], 2).await.unwrap();
        assert_eq!(hits[0].name, "a");
        assert!(hits[0].signal < hits[1].signal);
    }
}
