use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Extensions treated as documentation rather than code.
pub const DOC_EXTENSIONS: &[&str] = &[".md", ".mdx", ".markdown"];

/// Language value used for documentation content when chunking.
pub const DOCS_LANGUAGE: &str = "markdown";

/// Lowercased extension of `path`, including the leading dot.
pub fn extension_of(path: &str) -> Option<String> {
    let name = path.rsplit('/').next().unwrap_or(path);
    name.rfind('.')
        .filter(|&i| i > 0)
        .map(|i| name[i..].to_ascii_lowercase())
}

pub fn is_doc_path(path: &str) -> bool {
    extension_of(path)
        .map(|ext| DOC_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or(false)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Code,
    Docs,
}

impl ContentType {
    pub fn for_path(path: &str) -> Self {
        if is_doc_path(path) {
            ContentType::Docs
        } else {
            ContentType::Code
        }
    }
}

/// One file of an indexed version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Assigned by the store on create.
    pub id: i64,
    pub version_id: i64,
    pub user_id: i64,
    pub owner: String,
    pub repo_name: String,
    pub tag: String,
    pub path: String,
    pub content_type: ContentType,
    pub content_hash: String,
    pub created_at: DateTime<Utc>,
}

impl Document {
    /// Stable identity hash for a file at a tag: SHA-256 hex of `"{path}:{tag}"`.
    pub fn identity_hash(path: &str, tag: &str) -> String {
        format!("{:x}", Sha256::digest(format!("{path}:{tag}").as_bytes()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_is_lowercased() {
        assert_eq!(extension_of("docs/README.MD").as_deref(), Some(".md"));
        assert_eq!(extension_of("cmd/main.go").as_deref(), Some(".go"));
        assert_eq!(extension_of("Makefile"), None);
        assert_eq!(extension_of(".gitignore"), None);
    }

    #[test]
    fn content_type_by_extension() {
        assert_eq!(ContentType::for_path("guide.mdx"), ContentType::Docs);
        assert_eq!(ContentType::for_path("src/app.ts"), ContentType::Code);
    }

    #[test]
    fn identity_hash_depends_on_tag() {
        let a = Document::identity_hash("main.go", "v1");
        let b = Document::identity_hash("main.go", "v2");
        assert_eq!(a.len(), 64);
        assert_ne!(a, b);
        assert_eq!(a, Document::identity_hash("main.go", "v1"));
    }
}
