//! Long-term memory: knowledge ingestion and hybrid retrieval, plus daily
//! activity logs.

mod chunker;
mod daily_log;

pub use chunker::{chunk_markdown, Chunk, CHUNK_TARGET_CHARS};
pub use daily_log::DailyLog;

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info};

use crate::embedding::{content_hash, Embedder, EMBED_BATCH_SIZE};
use crate::hybrid;
use crate::store::{KnowledgeChunk, KnowledgeSource, Store, StoreError};

/// Knowledge hits below this merged score are dropped.
pub const MIN_KNOWLEDGE_SCORE: f64 = 0.15;
/// Default number of chunks hydrated into a turn.
pub const DEFAULT_RETRIEVE_K: usize = 5;

/// A retrieval hit: the chunk plus its merged score.
#[derive(Clone, Debug)]
pub struct ScoredChunk {
    pub chunk: KnowledgeChunk,
    pub score: f64,
}

pub struct MemorySystem {
    store: Store,
    embedder: Option<Arc<dyn Embedder>>,
    daily_log: DailyLog,
}

impl MemorySystem {
    pub fn new(
        store: Store,
        embedder: Option<Arc<dyn Embedder>>,
        memory_dir: impl Into<std::path::PathBuf>,
    ) -> Self {
        Self {
            store,
            embedder,
            daily_log: DailyLog::new(memory_dir),
        }
    }

    pub fn daily_log(&self) -> &DailyLog {
        &self.daily_log
    }

    /// Ingests a markdown document: chunk, hash, insert-if-new, embed new
    /// chunks in batches. Returns how many chunks were actually inserted;
    /// re-ingesting identical content is a no-op.
    pub async fn ingest(
        &self,
        source: KnowledgeSource,
        path: Option<String>,
        text: &str,
    ) -> Result<usize, StoreError> {
        let chunks = chunk_markdown(text);
        let mut inserted: Vec<(i64, String)> = Vec::new();
        for chunk in &chunks {
            let hash = content_hash(&chunk.text);
            if let Some(id) = self
                .store
                .insert_knowledge(
                    source,
                    path.clone(),
                    chunk.text.clone(),
                    hash,
                    Some((chunk.start_line as i64, chunk.end_line as i64)),
                )
                .await?
            {
                inserted.push((id, chunk.text.clone()));
            }
        }
        debug!(
            total = chunks.len(),
            new = inserted.len(),
            "knowledge ingestion"
        );
        self.embed_chunks(&inserted).await?;
        Ok(inserted.len())
    }

    /// Reads and ingests a markdown file from disk.
    pub async fn ingest_file(&self, path: &Path) -> Result<usize, StoreError> {
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| StoreError::Storage(format!("read {}: {}", path.display(), e)))?;
        self.ingest(
            KnowledgeSource::Memory,
            Some(path.display().to_string()),
            &text,
        )
        .await
    }

    async fn embed_chunks(&self, entries: &[(i64, String)]) -> Result<(), StoreError> {
        let embedder = match &self.embedder {
            Some(e) => e,
            None => return Ok(()),
        };
        for batch in entries.chunks(EMBED_BATCH_SIZE) {
            let texts: Vec<&str> = batch.iter().map(|(_, t)| t.as_str()).collect();
            let vectors = embedder.embed(&texts).await?;
            let rows: Vec<(i64, Vec<f32>)> = batch
                .iter()
                .map(|(id, _)| *id)
                .zip(vectors.into_iter())
                .collect();
            self.store.set_knowledge_embeddings(rows).await?;
        }
        Ok(())
    }

    /// Sweeps knowledge chunks and transcript rows that missed embedding
    /// (e.g. after a dims rebuild). Returns how many rows were embedded.
    pub async fn embed_pending(&self) -> Result<usize, StoreError> {
        let embedder = match &self.embedder {
            Some(e) => Arc::clone(e),
            None => return Ok(0),
        };
        let mut total = 0usize;

        let pending = self.store.unembedded_knowledge(EMBED_BATCH_SIZE).await?;
        if !pending.is_empty() {
            let entries: Vec<(i64, String)> =
                pending.into_iter().map(|c| (c.id, c.text)).collect();
            self.embed_chunks(&entries).await?;
            total += entries.len();
        }

        let messages = self.store.unembedded_messages(EMBED_BATCH_SIZE).await?;
        if !messages.is_empty() {
            let texts: Vec<&str> = messages.iter().map(|(_, t)| t.as_str()).collect();
            let vectors = embedder.embed(&texts).await?;
            for ((id, _), vector) in messages.iter().zip(vectors.into_iter()) {
                self.store.set_message_embedding(*id, vector).await?;
            }
            total += messages.len();
        }

        if total > 0 {
            info!(count = total, "embedded pending rows");
        }
        Ok(total)
    }

    /// Hybrid search over one chat's transcript (the tg_messages dual
    /// index), same merge as knowledge retrieval.
    pub async fn search_transcript(
        &self,
        chat_id: i64,
        query: &str,
        k: usize,
    ) -> Result<Vec<crate::message::ChatMessage>, StoreError> {
        let fetch = k * 3;
        let mut vector_scores: HashMap<i64, f64> = HashMap::new();
        if let Some(embedder) = &self.embedder {
            let vectors = embedder.embed(&[query]).await?;
            if let Some(qv) = vectors.into_iter().next() {
                for (id, dist) in self
                    .store
                    .transcript_vector_search(chat_id, qv, fetch)
                    .await?
                {
                    vector_scores.insert(id, hybrid::distance_to_score(dist));
                }
            }
        }
        let mut keyword_scores: HashMap<i64, f64> = HashMap::new();
        if let Some(expr) = hybrid::escape_fts_query(query) {
            for (id, rank) in self
                .store
                .transcript_keyword_search(chat_id, expr, fetch)
                .await?
            {
                keyword_scores.insert(id, hybrid::bm25_to_score(rank));
            }
        }

        let mut merged: Vec<(i64, f64)> = vector_scores
            .keys()
            .chain(keyword_scores.keys())
            .collect::<std::collections::HashSet<_>>()
            .into_iter()
            .map(|id| {
                (
                    *id,
                    hybrid::merge(
                        vector_scores.get(id).copied(),
                        keyword_scores.get(id).copied(),
                    ),
                )
            })
            .filter(|(_, score)| *score >= MIN_KNOWLEDGE_SCORE)
            .collect();
        merged.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        merged.truncate(k);

        let ids: Vec<i64> = merged.iter().map(|(id, _)| *id).collect();
        self.store.get_messages(ids).await
    }

    /// Hybrid retrieval over the knowledge base, same merge as the tool index
    /// but with the higher score floor.
    pub async fn retrieve(&self, query: &str, k: usize) -> Result<Vec<ScoredChunk>, StoreError> {
        let fetch = k * 3;
        let mut vector_scores: HashMap<i64, f64> = HashMap::new();
        if let Some(embedder) = &self.embedder {
            let vectors = embedder.embed(&[query]).await?;
            if let Some(qv) = vectors.into_iter().next() {
                for (id, dist) in self.store.knowledge_vector_search(qv, fetch).await? {
                    vector_scores.insert(id, hybrid::distance_to_score(dist));
                }
            }
        }

        let mut keyword_scores: HashMap<i64, f64> = HashMap::new();
        if let Some(expr) = hybrid::escape_fts_query(query) {
            for (id, rank) in self.store.knowledge_keyword_search(expr, fetch).await? {
                keyword_scores.insert(id, hybrid::bm25_to_score(rank));
            }
        }

        let mut merged: Vec<(i64, f64)> = vector_scores
            .keys()
            .chain(keyword_scores.keys())
            .collect::<std::collections::HashSet<_>>()
            .into_iter()
            .map(|id| {
                (
                    *id,
                    hybrid::merge(
                        vector_scores.get(id).copied(),
                        keyword_scores.get(id).copied(),
                    ),
                )
            })
            .filter(|(_, score)| *score >= MIN_KNOWLEDGE_SCORE)
            .collect();
        merged.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        merged.truncate(k);

        let ids: Vec<i64> = merged.iter().map(|(id, _)| *id).collect();
        let scores: HashMap<i64, f64> = merged.into_iter().collect();
        let chunks = self.store.get_knowledge_chunks(ids).await?;
        let mut out: Vec<ScoredChunk> = chunks
            .into_iter()
            .map(|chunk| {
                let score = scores.get(&chunk.id).copied().unwrap_or(0.0);
                ScoredChunk { chunk, score }
            })
            .collect();
        out.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        Ok(out)
    }

    /// Short digest of the most relevant memories for the system prompt.
    pub async fn digest(&self, query: &str) -> Result<String, StoreError> {
        let hits = self.retrieve(query, DEFAULT_RETRIEVE_K).await?;
        if hits.is_empty() {
            return Ok(String::new());
        }
        let mut out = String::from("Relevant memories:\n");
        for hit in hits {
            out.push_str("- ");
            out.push_str(hit.chunk.text.trim());
            out.push('\n');
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::MockEmbedder;

    async fn memory(with_embedder: bool) -> (MemorySystem, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open_in_memory().unwrap();
        store.migrate().unwrap();
        store.ensure_vector_tables(8).unwrap();
        let embedder: Option<Arc<dyn Embedder>> = if with_embedder {
            Some(Arc::new(MockEmbedder::new(8)))
        } else {
            None
        };
        (MemorySystem::new(store, embedder, dir.path()), dir)
    }

    #[tokio::test]
    async fn double_ingest_is_noop() {
        let (mem, _dir) = memory(true).await;
        let text = "The owner's wallet address rotates monthly.\n\nBalance checks run hourly.";
        let first = mem.ingest(KnowledgeSource::Memory, None, text).await.unwrap();
        assert!(first >= 1);
        let second = mem.ingest(KnowledgeSource::Memory, None, text).await.unwrap();
        assert_eq!(second, 0);
    }

    #[tokio::test]
    async fn retrieve_finds_ingested_text_by_keyword() {
        let (mem, _dir) = memory(false).await;
        mem.ingest(
            KnowledgeSource::Memory,
            None,
            "The staking rewards arrive every Tuesday morning.",
        )
        .await
        .unwrap();
        let hits = mem.retrieve("when do staking rewards arrive", 5).await.unwrap();
        assert!(!hits.is_empty());
        assert!(hits[0].chunk.text.contains("staking rewards"));
        assert!(hits[0].score >= MIN_KNOWLEDGE_SCORE);
    }

    #[tokio::test]
    async fn retrieve_with_embedder_merges_branches() {
        let (mem, _dir) = memory(true).await;
        mem.ingest(
            KnowledgeSource::Learned,
            None,
            "Gas fees spike on weekends.",
        )
        .await
        .unwrap();
        let hits = mem.retrieve("Gas fees spike on weekends.", 5).await.unwrap();
        assert!(!hits.is_empty());
    }

    #[tokio::test]
    async fn transcript_sweep_then_search_finds_old_message() {
        let (mem, _dir) = memory(true).await;
        let mut msg = crate::message::ChatMessage::user(7, "owner", "the seed phrase is in the red notebook");
        msg.timestamp = 1000;
        mem.store.append_message(&msg).await.unwrap();
        mem.store
            .append_message(&crate::message::ChatMessage::assistant(7, "noted"))
            .await
            .unwrap();

        let embedded = mem.embed_pending().await.unwrap();
        assert_eq!(embedded, 2);
        // Second sweep has nothing left.
        assert_eq!(mem.embed_pending().await.unwrap(), 0);

        let hits = mem
            .search_transcript(7, "where is the seed phrase", 5)
            .await
            .unwrap();
        assert!(hits.iter().any(|m| m.text.contains("red notebook")));
        // Other chats see nothing.
        let other = mem
            .search_transcript(8, "where is the seed phrase", 5)
            .await
            .unwrap();
        assert!(other.is_empty());
    }

    #[tokio::test]
    async fn digest_formats_bullets() {
        let (mem, _dir) = memory(false).await;
        mem.ingest(KnowledgeSource::Memory, None, "Important: never auto-send funds.")
            .await
            .unwrap();
        let digest = mem.digest("auto-send funds").await.unwrap();
        assert!(digest.starts_with("Relevant memories:"));
        assert!(digest.contains("never auto-send"));
    }
}
