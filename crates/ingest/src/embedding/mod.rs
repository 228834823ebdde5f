pub mod ollama;
pub mod openai;
pub mod stub;
pub mod traits;

use std::sync::Arc;

use quarry_core::config::EmbeddingConfig;

use crate::error::ClientError;
pub(crate) use crate::http::check_status;

pub use ollama::OllamaEmbedder;
pub use openai::OpenAiEmbedder;
pub use stub::StubEmbedder;
pub use traits::Embedder;

/// Validate dimensions on the first vector.
pub(crate) fn check_dimensions(vectors: &[Vec<f32>], dimensions: usize) -> Result<(), ClientError> {
    match vectors.first() {
        Some(first) if first.len() != dimensions => Err(ClientError::DimensionMismatch {
            expected: dimensions,
            actual: first.len(),
        }),
        _ => Ok(()),
    }
}

/// Build the embedder selected by `config.provider`.
pub fn from_config(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>, ClientError> {
    let dimensions = config.dimensions as usize;
    match config.provider.as_str() {
        "stub" => Ok(Arc::new(StubEmbedder::new(dimensions))),
        "ollama" => Ok(Arc::new(OllamaEmbedder::new(
            config.ollama_url.clone(),
            config.model.clone(),
            dimensions,
        ))),
        "openai" => {
            let api_key = config
                .openai_api_key
                .clone()
                .ok_or_else(|| ClientError::Unsupported("openai embedder needs OPENAI_API_KEY".into()))?;
            Ok(Arc::new(OpenAiEmbedder::new(
                api_key,
                config.model.clone(),
                config.openai_base_url.clone(),
                dimensions,
            )))
        }
        other => Err(ClientError::Unsupported(format!("embedding provider {other}"))),
    }
}
