use async_trait::async_trait;

use super::traits::Embedder;
use crate::error::ClientError;

/// Returns zero vectors. Lets the pipeline run end to end without an
/// embedding service.
pub struct StubEmbedder {
    dimensions: usize,
}

impl StubEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }
}

#[async_trait]
impl Embedder for StubEmbedder {
    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, ClientError> {
        Ok(texts.iter().map(|_| vec![0.0; self.dimensions]).collect())
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn one_zero_vector_per_text() {
        let e = StubEmbedder::new(4);
        let out = e.embed_batch(&["a", "b", "c"]).await.unwrap();
        assert_eq!(out.len(), 3);
        assert!(out.iter().all(|v| v == &vec![0.0; 4]));
    }
}
