//! Shared hybrid-search scoring: BM25 + vector distance normalisation and merge.
//!
//! Used by the tool index and the knowledge retrieval path. Either branch may
//! be missing (no embedder, or a query FTS5 cannot parse); a missing branch
//! contributes zero.

/// Weight of the vector branch in the merged score.
pub const VECTOR_WEIGHT: f64 = 0.6;
/// Weight of the keyword (BM25) branch in the merged score.
pub const KEYWORD_WEIGHT: f64 = 0.4;

/// FTS5 BM25 rank is negative (better matches are more negative); squash to (0, 1).
pub fn bm25_to_score(rank: f64) -> f64 {
    1.0 / (1.0 + rank.exp())
}

/// Cosine distance from the vector table, already in [0, 2]; invert to a score.
pub fn distance_to_score(distance: f64) -> f64 {
    1.0 - distance
}

/// Weighted merge; a missing branch counts as zero.
pub fn merge(vector: Option<f64>, keyword: Option<f64>) -> f64 {
    VECTOR_WEIGHT * vector.unwrap_or(0.0) + KEYWORD_WEIGHT * keyword.unwrap_or(0.0)
}

/// Rewrites free text into a safe FTS5 MATCH expression: every token is
/// double-quoted, reserved syntax never reaches the parser. Returns `None`
/// when no searchable token remains (caller skips the keyword branch).
pub fn escape_fts_query(query: &str) -> Option<String> {
    let tokens: Vec<String> = query
        .split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|t| !t.is_empty())
        .map(|t| format!("\"{}\"", t))
        .collect();
    if tokens.is_empty() {
        None
    } else {
        Some(tokens.join(" "))
    }
}

/// Serialises a vector the way sqlite-vec expects its JSON input.
pub fn vector_to_json(v: &[f32]) -> String {
    let parts: Vec<String> = v.iter().map(|f| f.to_string()).collect();
    format!("[{}]", parts.join(","))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bm25_better_rank_scores_higher() {
        assert!(bm25_to_score(-5.0) > bm25_to_score(-1.0));
        assert!(bm25_to_score(-1.0) > bm25_to_score(0.0));
    }

    #[test]
    fn merge_weights_sum() {
        let merged = merge(Some(1.0), Some(1.0));
        assert!((merged - 1.0).abs() < 1e-9);
        assert!((merge(Some(1.0), None) - VECTOR_WEIGHT).abs() < 1e-9);
        assert!((merge(None, Some(1.0)) - KEYWORD_WEIGHT).abs() < 1e-9);
    }

    #[test]
    fn escape_quotes_tokens() {
        assert_eq!(
            escape_fts_query("swap TON for USDT!").as_deref(),
            Some("\"swap\" \"TON\" \"for\" \"USDT\"")
        );
        assert_eq!(escape_fts_query("(*)"), None);
    }

    #[test]
    fn vector_json_shape() {
        assert_eq!(vector_to_json(&[0.5, -1.0]), "[0.5,-1]");
    }
}
