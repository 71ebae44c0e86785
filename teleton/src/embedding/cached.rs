//! Store-backed caching decorator around any [`Embedder`].
//!
//! Cache key is `(content_hash, model, provider)`. Hits bump `accessed_at`
//! for LRU pruning; misses call the inner embedder and write back.

use async_trait::async_trait;

use crate::store::{Store, StoreError};

use super::{content_hash, Embedder};

pub struct CachedEmbedder {
    inner: std::sync::Arc<dyn Embedder>,
    store: Store,
}

impl CachedEmbedder {
    pub fn new(inner: std::sync::Arc<dyn Embedder>, store: Store) -> Self {
        Self { inner, store }
    }
}

#[async_trait]
impl Embedder for CachedEmbedder {
    async fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, StoreError> {
        let model = self.inner.model().to_string();
        let provider = self.inner.provider().to_string();
        let dims = self.inner.dimension();

        let mut out: Vec<Option<Vec<f32>>> = vec![None; texts.len()];
        let mut misses: Vec<usize> = Vec::new();
        for (i, text) in texts.iter().enumerate() {
            let hash = content_hash(text);
            match self
                .store
                .embedding_cache_get(&hash, &model, &provider, dims)
                .await?
            {
                Some(v) => out[i] = Some(v),
                None => misses.push(i),
            }
        }

        if !misses.is_empty() {
            let miss_texts: Vec<&str> = misses.iter().map(|&i| texts[i]).collect();
            let fresh = self.inner.embed(&miss_texts).await?;
            if fresh.len() != misses.len() {
                return Err(StoreError::Embedding(format!(
                    "inner embedder returned {} vectors for {} texts",
                    fresh.len(),
                    misses.len()
                )));
            }
            for (&i, vector) in misses.iter().zip(fresh.into_iter()) {
                let hash = content_hash(texts[i]);
                self.store
                    .embedding_cache_put(&hash, &model, &provider, &vector)
                    .await?;
                out[i] = Some(vector);
            }
        }

        Ok(out.into_iter().map(|v| v.unwrap_or_default()).collect())
    }

    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    fn model(&self) -> &str {
        self.inner.model()
    }

    fn provider(&self) -> &str {
        self.inner.provider()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;

    struct CountingEmbedder {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Embedder for CountingEmbedder {
        async fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, StoreError> {
            self.calls.fetch_add(texts.len(), Ordering::SeqCst);
            Ok(texts.iter().map(|_| vec![1.0, 2.0]).collect())
        }

        fn dimension(&self) -> usize {
            2
        }

        fn model(&self) -> &str {
            "counting"
        }

        fn provider(&self) -> &str {
            "test"
        }
    }

    #[tokio::test]
    async fn second_embed_hits_cache() {
        let store = Store::open_in_memory().unwrap();
        store.migrate().unwrap();
        let inner = Arc::new(CountingEmbedder {
            calls: AtomicUsize::new(0),
        });
        let cached = CachedEmbedder::new(inner.clone(), store);

        let first = cached.embed(&["hello", "world"]).await.unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);

        let second = cached.embed(&["hello", "world"]).await.unwrap();
        assert_eq!(second, first);
        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn partial_miss_only_embeds_new_texts() {
        let store = Store::open_in_memory().unwrap();
        store.migrate().unwrap();
        let inner = Arc::new(CountingEmbedder {
            calls: AtomicUsize::new(0),
        });
        let cached = CachedEmbedder::new(inner.clone(), store);

        cached.embed(&["a"]).await.unwrap();
        cached.embed(&["a", "b"]).await.unwrap();
        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
    }
}
