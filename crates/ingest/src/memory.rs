//! In-process implementation of every store contract.
//!
//! Backs the local `ingest-worker` binary and the test suite. Nothing is
//! persisted across restarts.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::Utc;

use quarry_core::{
    Blob, Chunk, CoreError, Document, IngestionConfig, Job, JobId, JobStage, JobStatus,
    OccurrenceRecord, RelationshipRecord, SymbolRecord, Version, VersionStatus,
};

use crate::contracts::{
    BlobStore, ChunkStore, Credentials, DocumentStore, IngestionConfigStore, JobStore,
    SymbolStore, VersionStore,
};
use crate::error::StoreError;

type BlobKey = (i64, String, String, String, String);

fn read<T>(lock: &RwLock<T>) -> Result<RwLockReadGuard<'_, T>, StoreError> {
    lock.read()
        .map_err(|_| StoreError::Backend("lock poisoned".into()))
}

fn write<T>(lock: &RwLock<T>) -> Result<RwLockWriteGuard<'_, T>, StoreError> {
    lock.write()
        .map_err(|_| StoreError::Backend("lock poisoned".into()))
}

fn conflict(e: CoreError) -> StoreError {
    StoreError::Conflict(e.to_string())
}

#[derive(Default)]
pub struct MemoryStore {
    jobs: RwLock<HashMap<JobId, Job>>,
    stage_log: RwLock<HashMap<JobId, Vec<JobStage>>>,
    versions: RwLock<HashMap<i64, Version>>,
    configs: RwLock<HashMap<i64, IngestionConfig>>,
    tokens: RwLock<HashMap<i64, String>>,
    default_token: RwLock<Option<String>>,
    blobs: RwLock<HashMap<BlobKey, Blob>>,
    documents: RwLock<Vec<Document>>,
    chunks: RwLock<BTreeMap<i64, Chunk>>,
    symbols: RwLock<Vec<SymbolRecord>>,
    occurrences: RwLock<Vec<OccurrenceRecord>>,
    relationships: RwLock<Vec<RelationshipRecord>>,
    next_id: AtomicI64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    // ── Seeding ─────────────────────────────────────────────────

    pub fn insert_job(&self, job: Job) -> Result<(), StoreError> {
        write(&self.jobs)?.insert(job.id, job);
        Ok(())
    }

    pub fn insert_version(&self, version: Version) -> Result<(), StoreError> {
        write(&self.versions)?.insert(version.id, version);
        Ok(())
    }

    pub fn insert_config(&self, config: IngestionConfig) -> Result<(), StoreError> {
        write(&self.configs)?.insert(config.repository_id, config);
        Ok(())
    }

    pub fn set_token(&self, user_id: i64, token: impl Into<String>) -> Result<(), StoreError> {
        write(&self.tokens)?.insert(user_id, token.into());
        Ok(())
    }

    /// Token used for users without their own.
    pub fn set_default_token(&self, token: Option<String>) -> Result<(), StoreError> {
        *write(&self.default_token)? = token;
        Ok(())
    }

    /// External cancellation request.
    pub fn request_cancel(&self, id: JobId) -> Result<(), StoreError> {
        let mut jobs = write(&self.jobs)?;
        let job = jobs.get_mut(&id).ok_or_else(|| job_not_found(id))?;
        job.request_cancel(Utc::now()).map_err(conflict)
    }

    // ── Inspection ──────────────────────────────────────────────

    pub fn job(&self, id: JobId) -> Option<Job> {
        read(&self.jobs).ok()?.get(&id).cloned()
    }

    pub fn version(&self, id: i64) -> Option<Version> {
        read(&self.versions).ok()?.get(&id).cloned()
    }

    /// Stages recorded through `update_progress`, in the order reached.
    pub fn stage_log(&self, id: JobId) -> Vec<JobStage> {
        read(&self.stage_log)
            .ok()
            .and_then(|log| log.get(&id).cloned())
            .unwrap_or_default()
    }

    pub fn blob_count(&self) -> usize {
        read(&self.blobs).map(|b| b.len()).unwrap_or(0)
    }

    pub fn documents(&self) -> Vec<Document> {
        read(&self.documents).map(|d| d.clone()).unwrap_or_default()
    }

    pub fn chunks(&self) -> Vec<Chunk> {
        read(&self.chunks)
            .map(|c| c.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn symbols(&self) -> Vec<SymbolRecord> {
        read(&self.symbols).map(|s| s.clone()).unwrap_or_default()
    }

    pub fn occurrences(&self) -> Vec<OccurrenceRecord> {
        read(&self.occurrences).map(|o| o.clone()).unwrap_or_default()
    }

    pub fn relationships(&self) -> Vec<RelationshipRecord> {
        read(&self.relationships).map(|r| r.clone()).unwrap_or_default()
    }

    fn with_job<R>(
        &self,
        id: JobId,
        f: impl FnOnce(&mut Job) -> Result<R, CoreError>,
    ) -> Result<R, StoreError> {
        let mut jobs = write(&self.jobs)?;
        let job = jobs.get_mut(&id).ok_or_else(|| job_not_found(id))?;
        f(job).map_err(conflict)
    }
}

fn job_not_found(id: JobId) -> StoreError {
    StoreError::NotFound {
        entity: "job",
        key: id.to_string(),
    }
}

// ── Contracts ───────────────────────────────────────────────────────

#[async_trait]
impl JobStore for MemoryStore {
    async fn get(&self, id: JobId) -> Result<Job, StoreError> {
        read(&self.jobs)?
            .get(&id)
            .cloned()
            .ok_or_else(|| job_not_found(id))
    }

    async fn set(&self, job: &Job) -> Result<(), StoreError> {
        write(&self.jobs)?.insert(job.id, job.clone());
        Ok(())
    }

    async fn start(&self, id: JobId) -> Result<(), StoreError> {
        self.with_job(id, |job| job.start(Utc::now()))
    }

    async fn update_progress(
        &self,
        id: JobId,
        stage: JobStage,
        items_total: usize,
        items_processed: usize,
    ) -> Result<(), StoreError> {
        self.with_job(id, |job| {
            job.enter_stage(stage)?;
            job.set_counts(items_total, items_processed);
            Ok(())
        })?;
        let mut log = write(&self.stage_log)?;
        let stages = log.entry(id).or_default();
        if stages.last() != Some(&stage) {
            stages.push(stage);
        }
        Ok(())
    }

    async fn mark_failed(&self, id: JobId, message: &str) -> Result<(), StoreError> {
        self.with_job(id, |job| job.fail(message, Utc::now()))
    }

    async fn mark_completed(&self, id: JobId) -> Result<(), StoreError> {
        self.with_job(id, |job| job.complete(Utc::now()))
    }

    async fn mark_cancelled(&self, id: JobId) -> Result<(), StoreError> {
        self.with_job(id, |job| job.cancel(Utc::now()))
    }

    async fn is_cancelling(&self, id: JobId) -> Result<bool, StoreError> {
        read(&self.jobs)?
            .get(&id)
            .map(|job| job.status == JobStatus::Cancelling)
            .ok_or_else(|| job_not_found(id))
    }
}

#[async_trait]
impl VersionStore for MemoryStore {
    async fn get(&self, id: i64) -> Result<Version, StoreError> {
        read(&self.versions)?
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                entity: "version",
                key: id.to_string(),
            })
    }

    async fn update_status(
        &self,
        id: i64,
        status: VersionStatus,
        error: Option<String>,
    ) -> Result<(), StoreError> {
        let mut versions = write(&self.versions)?;
        let version = versions.get_mut(&id).ok_or_else(|| StoreError::NotFound {
            entity: "version",
            key: id.to_string(),
        })?;
        version.status = status;
        version.error = error;
        version.updated_at = Utc::now();
        Ok(())
    }
}

#[async_trait]
impl Credentials for MemoryStore {
    async fn access_token(&self, user_id: i64) -> Result<String, StoreError> {
        if let Some(token) = read(&self.tokens)?.get(&user_id) {
            return Ok(token.clone());
        }
        read(&self.default_token)?
            .clone()
            .ok_or_else(|| StoreError::NotFound {
                entity: "access token",
                key: user_id.to_string(),
            })
    }
}

#[async_trait]
impl IngestionConfigStore for MemoryStore {
    async fn get_by_repository(&self, repository_id: i64) -> Result<IngestionConfig, StoreError> {
        read(&self.configs)?
            .get(&repository_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                entity: "ingestion config",
                key: repository_id.to_string(),
            })
    }
}

#[async_trait]
impl BlobStore for MemoryStore {
    async fn put(&self, user_id: i64, blob: &Blob) -> Result<(), StoreError> {
        let key = (
            user_id,
            blob.owner.clone(),
            blob.repo.clone(),
            blob.tag.clone(),
            blob.path.clone(),
        );
        write(&self.blobs)?.insert(key, blob.clone());
        Ok(())
    }

    async fn get_by_path(
        &self,
        user_id: i64,
        owner: &str,
        repo: &str,
        tag: &str,
        path: &str,
    ) -> Result<Blob, StoreError> {
        let key = (
            user_id,
            owner.to_string(),
            repo.to_string(),
            tag.to_string(),
            path.to_string(),
        );
        read(&self.blobs)?
            .get(&key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                entity: "blob",
                key: path.to_string(),
            })
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn create(&self, document: &mut Document) -> Result<(), StoreError> {
        document.id = self.next_id();
        write(&self.documents)?.push(document.clone());
        Ok(())
    }

    async fn list_by_version(&self, version_id: i64) -> Result<Vec<Document>, StoreError> {
        Ok(read(&self.documents)?
            .iter()
            .filter(|d| d.version_id == version_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl ChunkStore for MemoryStore {
    async fn create(&self, chunk: &mut Chunk) -> Result<(), StoreError> {
        chunk.id = self.next_id();
        write(&self.chunks)?.insert(chunk.id, chunk.clone());
        Ok(())
    }

    async fn update(&self, chunk: &Chunk) -> Result<(), StoreError> {
        let mut chunks = write(&self.chunks)?;
        match chunks.get_mut(&chunk.id) {
            Some(existing) => {
                *existing = chunk.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound {
                entity: "chunk",
                key: chunk.id.to_string(),
            }),
        }
    }

    async fn list_by_version(&self, version_id: i64) -> Result<Vec<Chunk>, StoreError> {
        Ok(read(&self.chunks)?
            .values()
            .filter(|c| c.version_id == version_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl SymbolStore for MemoryStore {
    async fn create_symbol(&self, symbol: &mut SymbolRecord) -> Result<(), StoreError> {
        symbol.id = self.next_id();
        write(&self.symbols)?.push(symbol.clone());
        Ok(())
    }

    async fn create_occurrence(&self, occurrence: &mut OccurrenceRecord) -> Result<(), StoreError> {
        occurrence.id = self.next_id();
        write(&self.occurrences)?.push(occurrence.clone());
        Ok(())
    }

    async fn create_relationship(
        &self,
        relationship: &mut RelationshipRecord,
    ) -> Result<(), StoreError> {
        relationship.id = self.next_id();
        write(&self.relationships)?.push(relationship.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job() -> Job {
        Job::pending(5, 1, 1, 1, "acme", "widgets", "v1")
    }

    #[tokio::test]
    async fn job_lifecycle_through_store() {
        let store = MemoryStore::new();
        store.insert_job(job()).unwrap();

        JobStore::start(&store, 5).await.unwrap();
        assert!(JobStore::start(&store, 5).await.is_err(), "second start must conflict");

        store.update_progress(5, JobStage::Parse, 3, 1).await.unwrap();
        store.update_progress(5, JobStage::Parse, 3, 3).await.unwrap();
        assert!(store.update_progress(5, JobStage::Fetch, 0, 0).await.is_err());
        assert_eq!(store.stage_log(5), vec![JobStage::Parse]);

        assert!(!store.is_cancelling(5).await.unwrap());
        store.request_cancel(5).unwrap();
        assert!(store.is_cancelling(5).await.unwrap());

        store.mark_cancelled(5).await.unwrap();
        let stored = store.job(5).unwrap();
        assert_eq!(stored.status, JobStatus::Cancelled);
        assert_eq!(stored.items_processed, 3);
    }

    #[tokio::test]
    async fn unknown_job_is_not_found() {
        let store = MemoryStore::new();
        assert!(matches!(
            store.is_cancelling(9).await,
            Err(StoreError::NotFound { entity: "job", .. })
        ));
    }

    #[tokio::test]
    async fn access_token_falls_back_to_default() {
        let store = MemoryStore::new();
        assert!(store.access_token(1).await.is_err());
        store.set_default_token(Some("fallback".into())).unwrap();
        store.set_token(2, "own").unwrap();
        assert_eq!(store.access_token(1).await.unwrap(), "fallback");
        assert_eq!(store.access_token(2).await.unwrap(), "own");
    }

    #[tokio::test]
    async fn created_rows_get_distinct_ids() {
        let store = MemoryStore::new();
        let mut a = SymbolRecord {
            id: 0,
            scope: quarry_core::RecordScope {
                user_id: 1,
                version_id: 1,
                document_id: 1,
                owner: "o".into(),
                repo_name: "r".into(),
                tag: "t".into(),
            },
            symbol: "s".into(),
            kind: 0,
            display_name: "s".into(),
            documentation: vec![],
            enclosing_symbol: None,
        };
        let mut b = a.clone();
        store.create_symbol(&mut a).await.unwrap();
        store.create_symbol(&mut b).await.unwrap();
        assert_ne!(a.id, b.id);
        assert_eq!(store.symbols().len(), 2);
    }
}
