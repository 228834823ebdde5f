use async_trait::async_trait;

use crate::error::ClientError;

/// Trait for embedding backends (OpenAI, Ollama, stub).
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a batch of texts in document mode, returning one vector per
    /// input text (in order).
    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, ClientError>;

    /// The dimensionality of the output vectors.
    fn dimensions(&self) -> usize;
}
