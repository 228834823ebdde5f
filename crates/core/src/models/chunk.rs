use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkKind {
    Function,
    Method,
    Class,
    Interface,
    Type,
    Enum,
    Constant,
    Variable,
    Module,
    Section,
    Paragraph,
    Code,
}

/// An embeddable segment of a document.
///
/// `vector` stays `None` between the chunk and embed stages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// Assigned by the store on create.
    pub id: i64,
    pub document_id: i64,
    pub version_id: i64,
    pub user_id: i64,
    pub owner: String,
    pub repo_name: String,
    pub tag: String,
    pub path: String,
    pub kind: ChunkKind,
    pub start_line: u32,
    pub end_line: u32,
    pub symbol: Option<String>,
    #[serde(default)]
    pub context: Vec<String>,
    pub content: String,
    pub vector: Option<Vec<f32>>,
    pub created_at: DateTime<Utc>,
}
