//! Process-wide wiring: collaborators, the four shared stage pools and the
//! live tuning path.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use quarry_core::config::{EmbedPoolConfig, PipelineTuning, StagePoolConfig};
use quarry_core::CoreError;

use crate::contracts::{
    BlobStore, ChunkStore, Chunker, Credentials, DocumentStore, IngestionConfigStore, JobStore,
    SourceClient, StructuralIndexer, SymbolStore, VersionStore,
};
use crate::embedding::Embedder;
use crate::events::EventSink;
use crate::memory::MemoryStore;
use crate::pipeline::PipelineSequence;
use crate::pool::{WorkHandler, WorkerPool};
use crate::stages::{
    ChunkDocument, ChunkItem, EmbedBatch, EmbedItem, FetchItem, ParseItem, PersistSymbols,
    StoreBlob,
};

// ── Dependencies ────────────────────────────────────────────────────

/// Every collaborator the pipeline talks to.
#[derive(Clone)]
pub struct IngestDeps {
    pub jobs: Arc<dyn JobStore>,
    pub versions: Arc<dyn VersionStore>,
    pub credentials: Arc<dyn Credentials>,
    pub configs: Arc<dyn IngestionConfigStore>,
    pub blobs: Arc<dyn BlobStore>,
    pub documents: Arc<dyn DocumentStore>,
    pub chunks: Arc<dyn ChunkStore>,
    pub symbols: Arc<dyn SymbolStore>,
    pub source: Arc<dyn SourceClient>,
    pub indexer: Arc<dyn StructuralIndexer>,
    pub chunker: Arc<dyn Chunker>,
    pub embedder: Arc<dyn Embedder>,
    pub events: Arc<dyn EventSink>,
}

impl IngestDeps {
    /// All stores backed by one [`MemoryStore`].
    pub fn in_memory(
        store: Arc<MemoryStore>,
        source: Arc<dyn SourceClient>,
        indexer: Arc<dyn StructuralIndexer>,
        chunker: Arc<dyn Chunker>,
        embedder: Arc<dyn Embedder>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            jobs: store.clone(),
            versions: store.clone(),
            credentials: store.clone(),
            configs: store.clone(),
            blobs: store.clone(),
            documents: store.clone(),
            chunks: store.clone(),
            symbols: store,
            source,
            indexer,
            chunker,
            embedder,
            events,
        }
    }
}

// ── Stage pools ─────────────────────────────────────────────────────

pub type FetchPool = WorkerPool<FetchItem, StoreBlob>;
pub type ParsePool = WorkerPool<ParseItem, PersistSymbols>;
pub type ChunkPool = WorkerPool<ChunkItem, ChunkDocument>;
pub type EmbedPool = WorkerPool<EmbedItem, EmbedBatch>;

/// The four sub-item pools, shared by every job in the process.
pub struct StagePools {
    pub fetch: Arc<FetchPool>,
    pub parse: Arc<ParsePool>,
    pub chunk: Arc<ChunkPool>,
    pub embed: Arc<EmbedPool>,
    embed_batch_size: AtomicUsize,
}

impl StagePools {
    pub fn new(deps: &IngestDeps, tuning: &PipelineTuning) -> Self {
        let fetch = WorkerPool::new("fetch", tuning.fetch.workers, StoreBlob::new(deps.blobs.clone()))
            .with_timeout(tuning.fetch.timeout);
        let parse = WorkerPool::new(
            "parse",
            tuning.parse.workers,
            PersistSymbols::new(deps.symbols.clone()),
        )
        .with_timeout(tuning.parse.timeout);
        let chunk = WorkerPool::new(
            "chunk",
            tuning.chunk.workers,
            ChunkDocument::new(
                deps.blobs.clone(),
                deps.chunker.clone(),
                deps.chunks.clone(),
                deps.events.clone(),
            ),
        )
        .with_timeout(tuning.chunk.timeout);
        let embed = WorkerPool::new(
            "embed",
            tuning.embed.workers,
            EmbedBatch::new(deps.embedder.clone(), deps.chunks.clone()),
        )
        .with_timeout(tuning.embed.timeout);

        Self {
            fetch: Arc::new(fetch),
            parse: Arc::new(parse),
            chunk: Arc::new(chunk),
            embed: Arc::new(embed),
            embed_batch_size: AtomicUsize::new(tuning.embed.batch_size.max(1)),
        }
    }

    pub fn embed_batch_size(&self) -> usize {
        self.embed_batch_size.load(Ordering::SeqCst)
    }

    pub fn set_fetch_config(&self, config: StagePoolConfig) {
        apply_pool_config(&self.fetch, config);
    }

    pub fn set_parse_config(&self, config: StagePoolConfig) {
        apply_pool_config(&self.parse, config);
    }

    pub fn set_chunk_config(&self, config: StagePoolConfig) {
        apply_pool_config(&self.chunk, config);
    }

    pub fn set_embed_config(&self, config: EmbedPoolConfig) {
        apply_pool_config(&self.embed, config.pool());
        if config.batch_size > 0 {
            self.embed_batch_size.store(config.batch_size, Ordering::SeqCst);
        }
    }

    pub async fn shutdown(&self) {
        tokio::join!(
            self.fetch.shutdown(),
            self.parse.shutdown(),
            self.chunk.shutdown(),
            self.embed.shutdown(),
        );
    }
}

/// Zero fields leave the running pool untouched.
fn apply_pool_config<T, H>(pool: &WorkerPool<T, H>, config: StagePoolConfig)
where
    T: Send + 'static,
    H: WorkHandler<T>,
{
    if config.workers > 0 {
        pool.set_worker_count(config.workers);
    }
    if !config.timeout.is_zero() {
        pool.set_timeout(Some(config.timeout));
    }
}

// ── Live tuning ─────────────────────────────────────────────────────

/// Accepts new tuning while the pipeline runs.
pub trait ConfigSink: Send + Sync {
    /// Validate and apply. Invalid tuning is rejected whole and nothing
    /// changes.
    fn apply(&self, tuning: &PipelineTuning) -> Result<(), CoreError>;
}

impl ConfigSink for StagePools {
    fn apply(&self, tuning: &PipelineTuning) -> Result<(), CoreError> {
        tuning.validate()?;
        self.set_fetch_config(tuning.fetch);
        self.set_parse_config(tuning.parse);
        self.set_chunk_config(tuning.chunk);
        self.set_embed_config(tuning.embed);
        Ok(())
    }
}

/// Apply every tuning published on `updates` until the sender goes away.
pub fn spawn_tuning_listener(
    sink: Arc<dyn ConfigSink>,
    mut updates: watch::Receiver<PipelineTuning>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while updates.changed().await.is_ok() {
            let tuning = *updates.borrow_and_update();
            match sink.apply(&tuning) {
                Ok(()) => info!(
                    job_workers = tuning.job_workers,
                    fetch_workers = tuning.fetch.workers,
                    parse_workers = tuning.parse.workers,
                    chunk_workers = tuning.chunk.workers,
                    embed_workers = tuning.embed.workers,
                    embed_batch_size = tuning.embed.batch_size,
                    "pipeline tuning applied"
                ),
                Err(e) => warn!(error = %e, "rejected pipeline tuning"),
            }
        }
    })
}

// ── Runtime ─────────────────────────────────────────────────────────

/// Collaborators, pools and the standard stage sequence built over them.
pub struct IngestRuntime {
    pub deps: IngestDeps,
    pub pools: Arc<StagePools>,
    pub pipeline: Arc<PipelineSequence>,
}

impl IngestRuntime {
    /// Must be called inside a tokio runtime.
    pub fn new(deps: IngestDeps, tuning: &PipelineTuning) -> Self {
        let pools = Arc::new(StagePools::new(&deps, tuning));
        let pipeline = Arc::new(PipelineSequence::standard(&deps, &pools));
        Self {
            deps,
            pools,
            pipeline,
        }
    }
}
