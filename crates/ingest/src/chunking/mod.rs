//! In-process chunking engine.
//!
//! Markdown is split at headings (each chunk carries its heading as symbol
//! and the enclosing headings as context); code languages are split into
//! blank-line separated blocks packed up to the token limit.

mod helpers;
mod strategies;

use async_trait::async_trait;

use quarry_core::config::ChunkerConfig;
use quarry_core::DOCS_LANGUAGE;

use crate::contracts::{ChunkSegment, Chunker};
use crate::error::ClientError;

use strategies::{chunk_code, chunk_markdown, Limits};

#[derive(Debug, Clone)]
pub struct TextChunker {
    max_tokens: usize,
    min_tokens: usize,
    code_languages: Vec<String>,
}

impl TextChunker {
    pub fn new(max_tokens: usize, min_tokens: usize, code_languages: Vec<String>) -> Self {
        Self {
            max_tokens: max_tokens.max(1),
            min_tokens,
            code_languages,
        }
    }

    pub fn from_config(config: &ChunkerConfig) -> Self {
        Self::new(
            config.max_chunk_tokens,
            config.min_chunk_tokens,
            config.code_languages.clone(),
        )
    }

    /// Split `text` for `language`. Empty for unsupported languages.
    pub fn split(&self, language: &str, text: &str) -> Vec<ChunkSegment> {
        let limits = Limits {
            max_tokens: self.max_tokens,
            min_tokens: self.min_tokens,
        };
        if language == DOCS_LANGUAGE {
            chunk_markdown(text, limits)
        } else if self.is_code_language(language) {
            chunk_code(text, limits)
        } else {
            Vec::new()
        }
    }

    fn is_code_language(&self, language: &str) -> bool {
        self.code_languages.iter().any(|l| l == language)
    }
}

#[async_trait]
impl Chunker for TextChunker {
    fn supports(&self, language: &str) -> bool {
        language == DOCS_LANGUAGE || self.is_code_language(language)
    }

    async fn chunk(
        &self,
        language: &str,
        filename: &str,
        content: &[u8],
    ) -> Result<Vec<ChunkSegment>, ClientError> {
        if !self.supports(language) {
            return Err(ClientError::Unsupported(format!("no chunker for {language}")));
        }
        let text = std::str::from_utf8(content)
            .map_err(|e| ClientError::Decode(format!("{filename} is not UTF-8: {e}")))?;
        Ok(self.split(language, text))
    }
}
