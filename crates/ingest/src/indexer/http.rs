use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, USER_AGENT};
use reqwest::Client;
use tracing::debug;

use quarry_core::config::IndexerConfig;
use quarry_core::Language;

use crate::contracts::{IndexRequest, IndexResult, StructuralIndexer};
use crate::error::ClientError;
use crate::http::{check_status, USER_AGENT as AGENT};

/// Header an indexing service uses to report its own failure on a 2xx reply.
pub const INDEXER_ERROR_HEADER: &str = "x-indexer-error";

/// Per-language indexing services reached over HTTP.
///
/// `POST {endpoint}/index` takes the JSON [`IndexRequest`]; a successful
/// reply body is the raw protobuf index.
pub struct HttpIndexer {
    client: Client,
    endpoints: HashMap<Language, String>,
}

impl HttpIndexer {
    pub fn new(endpoints: impl IntoIterator<Item = (Language, String)>, timeout: Duration) -> Result<Self, ClientError> {
        let client = Client::builder().timeout(timeout).build()?;
        let endpoints = endpoints
            .into_iter()
            .map(|(lang, url)| (lang, url.trim_end_matches('/').to_string()))
            .collect();
        Ok(Self { client, endpoints })
    }

    pub fn from_config(config: &IndexerConfig) -> Result<Self, ClientError> {
        Self::new(config.endpoints(), config.timeout)
    }

    fn endpoint(&self, language: Language) -> Result<&str, ClientError> {
        self.endpoints
            .get(&language)
            .map(String::as_str)
            .ok_or_else(|| ClientError::Unsupported(format!("no indexer for {language}")))
    }
}

#[async_trait]
impl StructuralIndexer for HttpIndexer {
    fn supports(&self, language: Language) -> bool {
        self.endpoints.contains_key(&language)
    }

    async fn index(&self, request: &IndexRequest) -> Result<IndexResult, ClientError> {
        let endpoint = self.endpoint(request.language)?;
        debug!(job_id = request.job_id, language = %request.language, endpoint, "requesting structural index");

        let response = self
            .client
            .post(format!("{endpoint}/index"))
            .header(USER_AGENT, AGENT)
            .header(ACCEPT, "application/octet-stream")
            .json(request)
            .send()
            .await?;
        let response = check_status(response).await?;

        let error = response
            .headers()
            .get(INDEXER_ERROR_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .filter(|e| !e.is_empty());
        let index_data = response.bytes().await?.to_vec();

        debug!(job_id = request.job_id, bytes = index_data.len(), "structural index received");
        Ok(IndexResult { index_data, error })
    }
}
