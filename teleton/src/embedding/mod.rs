//! Embedder abstraction: fixed-size float vectors from text.
//!
//! Implementations: [`OpenAIEmbedder`] (real provider), [`CachedEmbedder`]
//! (store-backed decorator), [`MockEmbedder`] (deterministic, for tests).

mod cached;
mod mock;
mod openai;

pub use cached::CachedEmbedder;
pub use mock::MockEmbedder;
pub use openai::OpenAIEmbedder;

use async_trait::async_trait;

use crate::store::StoreError;

/// Batch size for embedding calls during ingestion and re-indexing.
pub const EMBED_BATCH_SIZE: usize = 128;

/// Produces fixed-size float vectors from text.
///
/// Implementations must be `Send + Sync`; the memory system and the tool
/// index hold them as `Arc<dyn Embedder>`.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embeds each text; one vector per input, same order.
    async fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, StoreError>;

    /// Vector dimension of every returned embedding.
    fn dimension(&self) -> usize;

    /// Model identifier, part of the embedding-cache key.
    fn model(&self) -> &str;

    /// Provider identifier, part of the embedding-cache key.
    fn provider(&self) -> &str;
}

/// Stable content hash used for chunk dedup and cache keys.
pub fn content_hash(text: &str) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_stable_and_distinct() {
        assert_eq!(content_hash("abc"), content_hash("abc"));
        assert_ne!(content_hash("abc"), content_hash("abd"));
        assert_eq!(content_hash("abc").len(), 64);
    }
}
