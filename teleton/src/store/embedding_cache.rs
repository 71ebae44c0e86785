//! Embedding cache rows: `(hash, model, provider)` → raw vector, LRU by
//! `accessed_at`.

use rusqlite::params;

use super::{blob_to_vector, now_millis, vector_to_blob, Store, StoreError};

/// Row cap; eviction removes the least recently accessed entries beyond it.
pub const EMBEDDING_CACHE_MAX_ROWS: i64 = 10_000;

impl Store {
    /// Looks up a cached vector and bumps `accessed_at`. A hit whose `dims`
    /// disagrees with `expected_dims` is treated as a miss and deleted; the
    /// cache never hands out a stale-dimension vector.
    pub async fn embedding_cache_get(
        &self,
        hash: &str,
        model: &str,
        provider: &str,
        expected_dims: usize,
    ) -> Result<Option<Vec<f32>>, StoreError> {
        let hash = hash.to_string();
        let model = model.to_string();
        let provider = provider.to_string();
        self.with_conn(move |conn| {
            let found: Option<(Vec<u8>, i64)> = {
                let mut stmt = conn.prepare_cached(
                    "SELECT embedding, dims FROM embedding_cache
                     WHERE hash = ?1 AND model = ?2 AND provider = ?3",
                )?;
                let mut rows = stmt.query(params![hash, model, provider])?;
                match rows.next()? {
                    Some(row) => Some((row.get(0)?, row.get(1)?)),
                    None => None,
                }
            };
            let (blob, dims) = match found {
                Some(v) => v,
                None => return Ok(None),
            };
            if dims as usize != expected_dims {
                conn.prepare_cached(
                    "DELETE FROM embedding_cache WHERE hash = ?1 AND model = ?2 AND provider = ?3",
                )?
                .execute(params![hash, model, provider])?;
                return Ok(None);
            }
            conn.prepare_cached(
                "UPDATE embedding_cache SET accessed_at = ?4
                 WHERE hash = ?1 AND model = ?2 AND provider = ?3",
            )?
            .execute(params![hash, model, provider, now_millis()])?;
            Ok(Some(blob_to_vector(&blob)))
        })
        .await
    }

    pub async fn embedding_cache_put(
        &self,
        hash: &str,
        model: &str,
        provider: &str,
        vector: &[f32],
    ) -> Result<(), StoreError> {
        let hash = hash.to_string();
        let model = model.to_string();
        let provider = provider.to_string();
        let blob = vector_to_blob(vector);
        let dims = vector.len() as i64;
        self.with_conn(move |conn| {
            let now = now_millis();
            conn.prepare_cached(
                "INSERT INTO embedding_cache (hash, model, provider, embedding, dims, created_at, accessed_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
                 ON CONFLICT(hash, model, provider) DO UPDATE SET
                     embedding = excluded.embedding, dims = excluded.dims, accessed_at = excluded.accessed_at",
            )?
            .execute(params![hash, model, provider, blob, dims, now])?;
            Ok(())
        })
        .await
    }

    /// Evicts least-recently-accessed rows beyond the cap. Returns rows removed.
    pub async fn embedding_cache_prune(&self) -> Result<usize, StoreError> {
        self.with_conn(|conn| {
            let n = conn
                .prepare_cached(
                    "DELETE FROM embedding_cache WHERE rowid IN (
                         SELECT rowid FROM embedding_cache
                         ORDER BY accessed_at DESC
                         LIMIT -1 OFFSET ?1
                     )",
                )?
                .execute(params![EMBEDDING_CACHE_MAX_ROWS])?;
            Ok(n)
        })
        .await
    }

    pub async fn embedding_cache_len(&self) -> Result<i64, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare_cached("SELECT COUNT(*) FROM embedding_cache")?;
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
        s
    }

    #[tokio::test]
    async fn put_get_round_trip() {
        let s = store().await;
        let v = vec![0.1f32, 0.2, 0.3];
        s.embedding_cache_put("h", "m", "p", &v).await.unwrap();
        let out = s.embedding_cache_get("h", "m", "p", 3).await.unwrap();
        assert_eq!(out, Some(v));
    }

    #[tokio::test]
    async fn dims_mismatch_is_a_miss_and_deletes() {
        let s = store().await;
        s.embedding_cache_put("h", "m", "p", &[0.1, 0.2]).await.unwrap();
        assert_eq!(s.embedding_cache_get("h", "m", "p", 3).await.unwrap(), None);
        assert_eq!(s.embedding_cache_len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn key_includes_model_and_provider() {
        let s = store().await;
        s.embedding_cache_put("h", "m1", "p", &[1.0]).await.unwrap();
        assert_eq!(s.embedding_cache_get("h", "m2", "p", 1).await.unwrap(), None);
        assert!(s
            .embedding_cache_get("h", "m1", "p", 1)
            .await
            .unwrap()
            .is_some());
    }
}
