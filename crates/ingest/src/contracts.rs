//! Collaborator contracts the pipeline is written against.
//!
//! Stores persist pipeline state; clients reach external services. Every
//! implementation must be safe to share across tasks.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use quarry_core::{
    Blob, Chunk, ChunkKind, Document, IngestionConfig, Job, JobId, JobStage, Language,
    OccurrenceRecord, RelationshipRecord, SymbolRecord, Version, VersionStatus,
};

use crate::error::{ClientError, StoreError};

// ── Stores ──────────────────────────────────────────────────────────

#[async_trait]
pub trait JobStore: Send + Sync {
    async fn get(&self, id: JobId) -> Result<Job, StoreError>;

    async fn set(&self, job: &Job) -> Result<(), StoreError>;

    /// pending → running. Fails if the stored job is not pending.
    async fn start(&self, id: JobId) -> Result<(), StoreError>;

    /// Record the stage a job has reached and that stage's counts.
    /// Leaves the status untouched.
    async fn update_progress(
        &self,
        id: JobId,
        stage: JobStage,
        items_total: usize,
        items_processed: usize,
    ) -> Result<(), StoreError>;

    async fn mark_failed(&self, id: JobId, message: &str) -> Result<(), StoreError>;

    async fn mark_completed(&self, id: JobId) -> Result<(), StoreError>;

    async fn mark_cancelled(&self, id: JobId) -> Result<(), StoreError>;

    /// Whether an external cancellation request is pending for the job.
    async fn is_cancelling(&self, id: JobId) -> Result<bool, StoreError>;
}

#[async_trait]
pub trait VersionStore: Send + Sync {
    async fn get(&self, id: i64) -> Result<Version, StoreError>;

    async fn update_status(
        &self,
        id: i64,
        status: VersionStatus,
        error: Option<String>,
    ) -> Result<(), StoreError>;
}

/// Access tokens for the source host, per user.
#[async_trait]
pub trait Credentials: Send + Sync {
    async fn access_token(&self, user_id: i64) -> Result<String, StoreError>;
}

#[async_trait]
pub trait IngestionConfigStore: Send + Sync {
    async fn get_by_repository(&self, repository_id: i64) -> Result<IngestionConfig, StoreError>;
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(&self, user_id: i64, blob: &Blob) -> Result<(), StoreError>;

    async fn get_by_path(
        &self,
        user_id: i64,
        owner: &str,
        repo: &str,
        tag: &str,
        path: &str,
    ) -> Result<Blob, StoreError>;
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Persist a new document, assigning its `id`.
    async fn create(&self, document: &mut Document) -> Result<(), StoreError>;

    async fn list_by_version(&self, version_id: i64) -> Result<Vec<Document>, StoreError>;
}

#[async_trait]
pub trait ChunkStore: Send + Sync {
    /// Persist a new chunk, assigning its `id`.
    async fn create(&self, chunk: &mut Chunk) -> Result<(), StoreError>;

    async fn update(&self, chunk: &Chunk) -> Result<(), StoreError>;

    async fn list_by_version(&self, version_id: i64) -> Result<Vec<Chunk>, StoreError>;
}

#[async_trait]
pub trait SymbolStore: Send + Sync {
    async fn create_symbol(&self, symbol: &mut SymbolRecord) -> Result<(), StoreError>;

    async fn create_occurrence(&self, occurrence: &mut OccurrenceRecord) -> Result<(), StoreError>;

    async fn create_relationship(
        &self,
        relationship: &mut RelationshipRecord,
    ) -> Result<(), StoreError>;
}

// ── Source host ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    Blob,
    Tree,
    Commit,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeEntry {
    pub path: String,
    #[serde(rename = "type")]
    pub kind: EntryKind,
    #[serde(default)]
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileContent {
    pub path: String,
    pub content: Vec<u8>,
}

#[async_trait]
pub trait SourceClient: Send + Sync {
    /// Recursive listing of the repository at `reference`.
    async fn get_tree(
        &self,
        token: &str,
        owner: &str,
        repo: &str,
        reference: &str,
    ) -> Result<Vec<TreeEntry>, ClientError>;

    /// Contents for `paths`. Files that cannot be read may be left out.
    async fn get_file_content_batch(
        &self,
        token: &str,
        owner: &str,
        repo: &str,
        reference: &str,
        paths: &[String],
    ) -> Result<Vec<FileContent>, ClientError>;
}

// ── Structural indexer ──────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexRequest {
    pub job_id: JobId,
    pub repository_id: i64,
    pub version_id: i64,
    pub user_id: i64,
    pub owner: String,
    pub repo_name: String,
    pub tag: String,
    pub commit_sha: String,
    pub language: Language,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexResult {
    /// Protobuf-encoded structural index.
    pub index_data: Vec<u8>,
    /// Failure reported by the indexer itself.
    pub error: Option<String>,
}

#[async_trait]
pub trait StructuralIndexer: Send + Sync {
    fn supports(&self, language: Language) -> bool;

    async fn index(&self, request: &IndexRequest) -> Result<IndexResult, ClientError>;
}

// ── Chunker ─────────────────────────────────────────────────────────

/// One segment returned by a [`Chunker`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkSegment {
    pub content: String,
    pub kind: ChunkKind,
    pub start_line: u32,
    pub end_line: u32,
    pub symbol: Option<String>,
    pub context: Vec<String>,
}

#[async_trait]
pub trait Chunker: Send + Sync {
    fn supports(&self, language: &str) -> bool;

    async fn chunk(
        &self,
        language: &str,
        filename: &str,
        content: &[u8],
    ) -> Result<Vec<ChunkSegment>, ClientError>;
}
