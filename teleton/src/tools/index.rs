//! Semantic tool retrieval: hybrid vector + BM25 search over tool
//! descriptions, with always-include patterns.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::embedding::{Embedder, EMBED_BATCH_SIZE};
use crate::hybrid;
use crate::store::{Store, StoreError};

use super::r#trait::ToolSpec;

/// Default number of tools surfaced to the model per turn.
pub const DEFAULT_TOP_K: usize = 25;
/// Hits below this merged score are dropped before the top-K cut.
pub const MIN_SCORE: f64 = 0.10;

/// A scored retrieval hit.
#[derive(Clone, Debug, PartialEq)]
pub struct RankedTool {
    pub name: String,
    pub score: f64,
}

pub struct ToolIndex {
    store: Store,
    embedder: Option<Arc<dyn Embedder>>,
    always_include: Vec<String>,
}

impl ToolIndex {
    pub fn new(store: Store, embedder: Option<Arc<dyn Embedder>>) -> Self {
        Self {
            store,
            embedder,
            always_include: Vec::new(),
        }
    }

    /// Patterns that are always part of the result set: an exact tool name,
    /// or a `prefix*` form matching by name prefix.
    pub fn with_always_include(mut self, patterns: Vec<String>) -> Self {
        self.always_include = patterns;
        self
    }

    fn pattern_matches(pattern: &str, name: &str) -> bool {
        match pattern.strip_suffix('*') {
            Some(prefix) => name.starts_with(prefix),
            None => name == pattern,
        }
    }

    /// Rebuilds the index for the given catalog. New and changed descriptions
    /// are embedded in batches; rows for vanished tools are pruned. The vec0
    /// table has no upsert, so the store layer does delete-then-insert inside
    /// one transaction.
    pub async fn reindex(&self, specs: &[ToolSpec]) -> Result<(), StoreError> {
        let entries: Vec<(String, String)> = specs
            .iter()
            .map(|s| (s.name.clone(), s.description.clone()))
            .collect();
        let keep: Vec<String> = specs.iter().map(|s| s.name.clone()).collect();
        let rows = self.store.tool_index_sync(entries, keep).await?;
        debug!(count = rows.len(), "tool index rows synced");

        let embedder = match &self.embedder {
            Some(e) => e,
            None => return Ok(()),
        };
        let by_name: HashMap<&str, &ToolSpec> =
            specs.iter().map(|s| (s.name.as_str(), s)).collect();
        for batch in rows.chunks(EMBED_BATCH_SIZE) {
            let texts: Vec<String> = batch
                .iter()
                .map(|(_, name)| {
                    let desc = by_name
                        .get(name.as_str())
                        .map(|s| s.description.as_str())
                        .unwrap_or("");
                    format!("{}: {}", name, desc)
                })
                .collect();
            let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
            let vectors = embedder.embed(&refs).await?;
            let entries: Vec<(i64, Vec<f32>)> = batch
                .iter()
                .map(|(id, _)| *id)
                .zip(vectors.into_iter())
                .collect();
            self.store.set_tool_embeddings(entries).await?;
        }
        Ok(())
    }

    /// Hybrid search. Returns at most `k` scored hits plus any always-include
    /// matches, score-descending.
    pub async fn search(&self, query: &str, k: usize) -> Result<Vec<RankedTool>, StoreError> {
        let fetch = k * 3;
        let mut vector_scores: HashMap<String, f64> = HashMap::new();
        if let Some(embedder) = &self.embedder {
            let vectors = embedder.embed(&[query]).await?;
            if let Some(qv) = vectors.into_iter().next() {
                for hit in self.store.tool_vector_search(qv, fetch).await? {
                    vector_scores.insert(hit.name, hybrid::distance_to_score(hit.signal));
                }
            }
        }

        let mut keyword_scores: HashMap<String, f64> = HashMap::new();
        if let Some(match_expr) = hybrid::escape_fts_query(query) {
            for hit in self.store.tool_keyword_search(match_expr, fetch).await? {
                keyword_scores.insert(hit.name, hybrid::bm25_to_score(hit.signal));
            }
        }

        let mut merged: HashMap<String, f64> = HashMap::new();
        for name in vector_scores.keys().chain(keyword_scores.keys()) {
            if merged.contains_key(name) {
                continue;
            }
            let score = hybrid::merge(
                vector_scores.get(name).copied(),
                keyword_scores.get(name).copied(),
            );
            merged.insert(name.clone(), score);
        }

        let mut ranked: Vec<RankedTool> = merged
            .into_iter()
            .filter(|(_, score)| *score >= MIN_SCORE)
            .map(|(name, score)| RankedTool { name, score })
            .collect();
        ranked.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        ranked.truncate(k);

        if !self.always_include.is_empty() {
            let all_names = self.store.tool_index_names().await?;
            for name in all_names {
                let wanted = self
                    .always_include
                    .iter()
                    .any(|p| Self::pattern_matches(p, &name));
                if wanted && !ranked.iter().any(|r| r.name == name) {
                    ranked.push(RankedTool { name, score: 0.0 });
                }
            }
        }

        Ok(ranked)
    }
}
