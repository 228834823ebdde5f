use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Raw file content captured during fetch, addressed by its SHA-256.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Blob {
    pub path: String,
    pub content: Vec<u8>,
    pub language: String,
    pub owner: String,
    pub repo: String,
    pub tag: String,
    pub content_hash: String,
}

impl Blob {
    pub fn new(
        path: impl Into<String>,
        content: Vec<u8>,
        language: impl Into<String>,
        owner: impl Into<String>,
        repo: impl Into<String>,
        tag: impl Into<String>,
    ) -> Self {
        let content_hash = format!("{:x}", Sha256::digest(&content));
        Self {
            path: path.into(),
            content,
            language: language.into(),
            owner: owner.into(),
            repo: repo.into(),
            tag: tag.into(),
            content_hash,
        }
    }
}
