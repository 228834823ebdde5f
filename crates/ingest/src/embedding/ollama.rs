use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::traits::Embedder;
use super::{check_dimensions, check_status};
use crate::error::ClientError;

/// Embedder backed by a local Ollama instance.
///
/// Models of the nomic family expect document text to carry a task prefix;
/// it is added automatically for them.
pub struct OllamaEmbedder {
    client: Client,
    url: String,
    model: String,
    dimensions: usize,
    document_prefix: Option<&'static str>,
}

impl OllamaEmbedder {
    pub fn new(url: String, model: String, dimensions: usize) -> Self {
        let document_prefix = model.starts_with("nomic-embed").then_some("search_document: ");
        Self {
            client: Client::new(),
            url: url.trim_end_matches('/').to_string(),
            model,
            dimensions,
            document_prefix,
        }
    }
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: Vec<String>,
    truncate: bool,
}

#[derive(Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, ClientError> {
        let prefix = self.document_prefix.unwrap_or("");
        let request = EmbedRequest {
            model: &self.model,
            input: texts.iter().map(|t| format!("{prefix}{t}")).collect(),
            truncate: true,
        };

        debug!(model = %self.model, texts = texts.len(), "ollama embed");
        let response = self
            .client
            .post(format!("{}/api/embed", self.url))
            .json(&request)
            .send()
            .await?;

        let parsed: EmbedResponse = check_status(response).await?.json().await?;
        check_dimensions(&parsed.embeddings, self.dimensions)?;
        Ok(parsed.embeddings)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}
