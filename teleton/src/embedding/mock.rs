//! Deterministic embedder for tests: vectors derived from a content hash, so
//! equal texts embed equally and nothing leaves the process.

use async_trait::async_trait;

use crate::store::StoreError;

use super::{content_hash, Embedder};

pub struct MockEmbedder {
    dims: usize,
}

impl MockEmbedder {
    pub fn new(dims: usize) -> Self {
        Self { dims }
    }
}

impl Default for MockEmbedder {
    fn default() -> Self {
        Self::new(8)
    }
}

#[async_trait]
impl Embedder for MockEmbedder {
    async fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, StoreError> {
        Ok(texts
            .iter()
            .map(|t| {
                let hash = content_hash(t);
                let bytes = hash.as_bytes();
                let mut v: Vec<f32> = (0..self.dims)
                    .map(|i| bytes[i % bytes.len()] as f32)
                    .collect();
                let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
                if norm > 0.0 {
                    for x in &mut v {
                        *x /= norm;
                    }
                }
                v
            })
            .collect())
    }

    fn dimension(&self) -> usize {
        self.dims
    }

    fn model(&self) -> &str {
        "mock-embed"
    }

    fn provider(&self) -> &str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn deterministic_and_normalised() {
        let e = MockEmbedder::new(4);
        let a = e.embed(&["same text"]).await.unwrap();
        let b = e.embed(&["same text"]).await.unwrap();
        assert_eq!(a, b);
        let norm: f32 = a[0].iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }
}
