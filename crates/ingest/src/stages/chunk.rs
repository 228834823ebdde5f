use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info};

use quarry_core::{Chunk, ContentType, Document, Job, JobId, JobStage, DOCS_LANGUAGE};

use crate::contracts::{BlobStore, ChunkStore, Chunker, DocumentStore, IngestionConfigStore};
use crate::error::{IngestError, ResultExt};
use crate::events::{emit, EventSink, IngestEvent};
use crate::pool::WorkHandler;
use crate::runtime::{IngestDeps, StagePools};
use crate::stages::{begin, drain_all, finish, Stage};

pub struct ChunkItem {
    pub job_id: JobId,
    pub document: Document,
    /// Repository language; docs override it with markdown.
    pub language: String,
    pub total_chunks: Arc<AtomicUsize>,
}

/// Splits one document's blob into chunks and stores them.
pub struct ChunkDocument {
    blobs: Arc<dyn BlobStore>,
    chunker: Arc<dyn Chunker>,
    chunks: Arc<dyn ChunkStore>,
    events: Arc<dyn EventSink>,
}

impl ChunkDocument {
    pub fn new(
        blobs: Arc<dyn BlobStore>,
        chunker: Arc<dyn Chunker>,
        chunks: Arc<dyn ChunkStore>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            blobs,
            chunker,
            chunks,
            events,
        }
    }
}

#[async_trait]
impl WorkHandler<ChunkItem> for ChunkDocument {
    /// Chunks written for the document.
    type Output = usize;
    type Error = IngestError;

    async fn handle(&self, item: ChunkItem) -> Result<usize, IngestError> {
        let doc = &item.document;
        let blob = self
            .blobs
            .get_by_path(doc.user_id, &doc.owner, &doc.repo_name, &doc.tag, &doc.path)
            .await
            .or_dependency(format!("load blob {}", doc.path))?;

        let language = match doc.content_type {
            ContentType::Docs => DOCS_LANGUAGE,
            ContentType::Code => item.language.as_str(),
        };
        if !self.chunker.supports(language) {
            debug!(path = %doc.path, language, "no chunker for language, skipping document");
            emit(
                &*self.events,
                IngestEvent::ChunkSkipped {
                    job_id: item.job_id,
                    path: doc.path.clone(),
                    language: language.to_string(),
                },
            );
            return Ok(0);
        }

        let segments = self
            .chunker
            .chunk(language, &doc.path, &blob.content)
            .await
            .or_dependency(format!("chunk {}", doc.path))?;

        let mut written = 0;
        for segment in segments {
            let mut chunk = Chunk {
                id: 0,
                document_id: doc.id,
                version_id: doc.version_id,
                user_id: doc.user_id,
                owner: doc.owner.clone(),
                repo_name: doc.repo_name.clone(),
                tag: doc.tag.clone(),
                path: doc.path.clone(),
                kind: segment.kind,
                start_line: segment.start_line,
                end_line: segment.end_line,
                symbol: segment.symbol,
                context: segment.context,
                content: segment.content,
                vector: None,
                created_at: Utc::now(),
            };
            self.chunks
                .create(&mut chunk)
                .await
                .or_persistence(format!("store chunk in {}", doc.path))?;
            written += 1;
            item.total_chunks.fetch_add(1, Ordering::Relaxed);
        }
        Ok(written)
    }
}

/// Chunks every document of the version through the chunk pool.
pub struct ChunkStage {
    configs: Arc<dyn IngestionConfigStore>,
    documents: Arc<dyn DocumentStore>,
    events: Arc<dyn EventSink>,
    pools: Arc<StagePools>,
}

impl ChunkStage {
    pub fn new(deps: &IngestDeps, pools: Arc<StagePools>) -> Self {
        Self {
            configs: deps.configs.clone(),
            documents: deps.documents.clone(),
            events: deps.events.clone(),
            pools,
        }
    }
}

#[async_trait]
impl Stage for ChunkStage {
    fn kind(&self) -> JobStage {
        JobStage::Chunk
    }

    async fn execute(&self, mut job: Job) -> Result<Job, IngestError> {
        begin(&mut job, JobStage::Chunk, &*self.events)?;

        let config = self
            .configs
            .get_by_repository(job.repository_id)
            .await
            .or_dependency("get ingestion config")?;
        let documents = self
            .documents
            .list_by_version(job.version_id)
            .await
            .or_dependency("list documents")?;

        let total = documents.len();
        job.set_counts(total, 0);

        let total_chunks = Arc::new(AtomicUsize::new(0));
        let language = config.language.as_str();
        drain_all(documents.into_iter().map(|document| {
            self.pools.chunk.process(ChunkItem {
                job_id: job.id,
                document,
                language: language.to_string(),
                total_chunks: total_chunks.clone(),
            })
        }))
        .await?;

        job.set_counts(total, total);
        info!(
            job_id = job.id,
            documents = total,
            chunks = total_chunks.load(Ordering::Relaxed),
            "chunk complete"
        );
        finish(&job, &*self.events);
        Ok(job)
    }
}
