use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info, warn};

use quarry_core::{ContentType, Document, Job, JobStage, RecordScope};

use crate::contracts::{
    DocumentStore, IndexRequest, IngestionConfigStore, StructuralIndexer, SymbolStore, VersionStore,
};
use crate::error::{IngestError, ResultExt};
use crate::events::{emit, EventSink, IngestEvent};
use crate::pool::WorkHandler;
use crate::runtime::{IngestDeps, StagePools};
use crate::scip::{self, IndexedFile};
use crate::stages::{begin, drain_all, finish, Stage};

/// One indexed file whose document row already exists.
pub struct ParseItem {
    pub scope: RecordScope,
    pub file: IndexedFile,
}

/// Rows written for one file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SymbolCounts {
    pub symbols: usize,
    pub occurrences: usize,
    pub relationships: usize,
    /// Rows whose write failed and were dropped.
    pub skipped: usize,
}

/// Writes a file's symbols (with their relationships) and occurrences.
///
/// Individual row failures are logged and skipped; the file still counts
/// as processed.
pub struct PersistSymbols {
    symbols: Arc<dyn SymbolStore>,
}

impl PersistSymbols {
    pub fn new(symbols: Arc<dyn SymbolStore>) -> Self {
        Self { symbols }
    }
}

#[async_trait]
impl WorkHandler<ParseItem> for PersistSymbols {
    type Output = SymbolCounts;
    type Error = IngestError;

    async fn handle(&self, item: ParseItem) -> Result<SymbolCounts, IngestError> {
        let ParseItem { scope, file } = item;
        let mut counts = SymbolCounts::default();

        for symbol in &file.symbols {
            let mut record = symbol.to_record(scope.clone());
            if let Err(e) = self.symbols.create_symbol(&mut record).await {
                warn!(path = %file.path, symbol = %symbol.symbol, error = %e, "symbol write failed, skipping");
                counts.skipped += 1;
                continue;
            }
            counts.symbols += 1;

            for rel in &symbol.relationships {
                let mut row = rel.to_record(record.id);
                match self.symbols.create_relationship(&mut row).await {
                    Ok(()) => counts.relationships += 1,
                    Err(e) => {
                        warn!(symbol = %symbol.symbol, target = %rel.target_symbol, error = %e, "relationship write failed, skipping");
                        counts.skipped += 1;
                    }
                }
            }
        }

        for occurrence in &file.occurrences {
            let mut row = occurrence.to_record(scope.clone());
            match self.symbols.create_occurrence(&mut row).await {
                Ok(()) => counts.occurrences += 1,
                Err(e) => {
                    debug!(path = %file.path, symbol = %occurrence.symbol, error = %e, "occurrence write failed, skipping");
                    counts.skipped += 1;
                }
            }
        }

        Ok(counts)
    }
}

/// Asks the structural indexer for the repository's symbol index, creates a
/// document per indexed file and persists symbols through the parse pool.
///
/// Languages without an indexer skip the stage with zero counts.
pub struct ParseStage {
    configs: Arc<dyn IngestionConfigStore>,
    versions: Arc<dyn VersionStore>,
    documents: Arc<dyn DocumentStore>,
    indexer: Arc<dyn StructuralIndexer>,
    events: Arc<dyn EventSink>,
    pools: Arc<StagePools>,
}

impl ParseStage {
    pub fn new(deps: &IngestDeps, pools: Arc<StagePools>) -> Self {
        Self {
            configs: deps.configs.clone(),
            versions: deps.versions.clone(),
            documents: deps.documents.clone(),
            indexer: deps.indexer.clone(),
            events: deps.events.clone(),
            pools,
        }
    }

    async fn create_document(&self, job: &Job, path: &str) -> Result<Document, IngestError> {
        let mut document = Document {
            id: 0,
            version_id: job.version_id,
            user_id: job.user_id,
            owner: job.owner.clone(),
            repo_name: job.repo_name.clone(),
            tag: job.tag.clone(),
            path: path.to_string(),
            content_type: ContentType::for_path(path),
            content_hash: Document::identity_hash(path, &job.tag),
            created_at: Utc::now(),
        };
        self.documents
            .create(&mut document)
            .await
            .or_persistence(format!("create document {path}"))?;
        Ok(document)
    }
}

#[async_trait]
impl Stage for ParseStage {
    fn kind(&self) -> JobStage {
        JobStage::Parse
    }

    async fn execute(&self, mut job: Job) -> Result<Job, IngestError> {
        begin(&mut job, JobStage::Parse, &*self.events)?;

        let config = self
            .configs
            .get_by_repository(job.repository_id)
            .await
            .or_dependency("get ingestion config")?;

        if !self.indexer.supports(config.language) {
            info!(job_id = job.id, language = %config.language, "no structural indexer, skipping parse");
            emit(
                &*self.events,
                IngestEvent::ParseSkipped {
                    job_id: job.id,
                    language: config.language.to_string(),
                },
            );
            job.set_counts(0, 0);
            finish(&job, &*self.events);
            return Ok(job);
        }

        let version = self
            .versions
            .get(job.version_id)
            .await
            .or_dependency("get version")?;

        let request = IndexRequest {
            job_id: job.id,
            repository_id: job.repository_id,
            version_id: job.version_id,
            user_id: job.user_id,
            owner: job.owner.clone(),
            repo_name: job.repo_name.clone(),
            tag: job.tag.clone(),
            commit_sha: version.commit_sha,
            language: config.language,
        };
        let result = self
            .indexer
            .index(&request)
            .await
            .or_dependency("index repository")?;
        if let Some(err) = result.error.filter(|e| !e.is_empty()) {
            return Err(IngestError::dependency("indexer reported an error", err));
        }

        let index = scip::decode(&result.index_data).or_dependency("decode structural index")?;
        job.set_counts(index.files.len(), 0);

        // Documents are created up front so every symbol row can reference one.
        let mut items = Vec::with_capacity(index.files.len());
        for file in index.files {
            let document = self.create_document(&job, &file.path).await?;
            let scope = RecordScope {
                user_id: job.user_id,
                version_id: job.version_id,
                document_id: document.id,
                owner: job.owner.clone(),
                repo_name: job.repo_name.clone(),
                tag: job.tag.clone(),
            };
            items.push(ParseItem { scope, file });
        }

        let counts = drain_all(items.into_iter().map(|item| self.pools.parse.process(item))).await?;

        let total = counts.iter().fold(SymbolCounts::default(), |acc, c| SymbolCounts {
            symbols: acc.symbols + c.symbols,
            occurrences: acc.occurrences + c.occurrences,
            relationships: acc.relationships + c.relationships,
            skipped: acc.skipped + c.skipped,
        });
        job.items_processed = counts.len();
        info!(
            job_id = job.id,
            files = job.items_total,
            symbols = total.symbols,
            occurrences = total.occurrences,
            relationships = total.relationships,
            skipped = total.skipped,
            "parse complete"
        );
        finish(&job, &*self.events);
        Ok(job)
    }
}
