//! Fakes and a seeded harness shared by the unit tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};

use quarry_core::config::PipelineTuning;
use quarry_core::{ChunkKind, IngestionConfig, Job, JobId, Language, Version, VersionStatus};

use crate::contracts::{
    ChunkSegment, Chunker, EntryKind, FileContent, IndexRequest, IndexResult, SourceClient,
    StructuralIndexer, TreeEntry,
};
use crate::embedding::Embedder;
use crate::error::ClientError;
use crate::events::{EventSink, IngestEvent, SinkError};
use crate::memory::MemoryStore;
use crate::runtime::{IngestDeps, IngestRuntime, StagePools};
use crate::scip::fixtures::{encode, FileSpec};

// ── Source ──────────────────────────────────────────────────────────

type Hook = Box<dyn Fn() + Send + Sync>;

#[derive(Default)]
pub struct FakeSource {
    tree: Mutex<Vec<TreeEntry>>,
    requested: Mutex<Vec<String>>,
    on_tree: Mutex<Option<Hook>>,
    stall: Mutex<Option<Duration>>,
}

impl FakeSource {
    pub fn set_tree(&self, entries: Vec<TreeEntry>) {
        *self.tree.lock().unwrap() = entries;
    }

    /// Run `hook` every time the tree is listed.
    pub fn on_tree(&self, hook: impl Fn() + Send + Sync + 'static) {
        *self.on_tree.lock().unwrap() = Some(Box::new(hook));
    }

    /// Hold every tree listing for `delay` after the hook ran.
    pub fn stall_tree(&self, delay: Duration) {
        *self.stall.lock().unwrap() = Some(delay);
    }

    pub fn requested_paths(&self) -> Vec<String> {
        self.requested.lock().unwrap().clone()
    }
}

#[async_trait]
impl SourceClient for FakeSource {
    async fn get_tree(&self, _: &str, _: &str, _: &str, _: &str) -> Result<Vec<TreeEntry>, ClientError> {
        if let Some(hook) = self.on_tree.lock().unwrap().as_ref() {
            hook();
        }
        let stall = *self.stall.lock().unwrap();
        if let Some(delay) = stall {
            tokio::time::sleep(delay).await;
        }
        Ok(self.tree.lock().unwrap().clone())
    }

    async fn get_file_content_batch(
        &self,
        _: &str,
        _: &str,
        _: &str,
        _: &str,
        paths: &[String],
    ) -> Result<Vec<FileContent>, ClientError> {
        self.requested.lock().unwrap().extend(paths.iter().cloned());
        Ok(paths
            .iter()
            .map(|path| FileContent {
                path: path.clone(),
                content: format!("// {path}\n\nfunc handler() {{}}\n").into_bytes(),
            })
            .collect())
    }
}

// ── Indexer ─────────────────────────────────────────────────────────

pub struct FakeIndexer {
    languages: Vec<Language>,
    response: Mutex<IndexResult>,
    calls: AtomicUsize,
}

impl FakeIndexer {
    fn go() -> Self {
        let index_data = encode(&[
            FileSpec {
                path: "main.go",
                symbols: &[("pkg/handler", &[])],
                occurrences: &[("pkg/handler", &[2, 5, 12])],
            },
            FileSpec {
                path: "README.md",
                symbols: &[],
                occurrences: &[],
            },
        ]);
        Self {
            languages: vec![Language::Go],
            response: Mutex::new(IndexResult {
                index_data,
                error: None,
            }),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn respond(&self, index_data: Vec<u8>, error: Option<String>) {
        *self.response.lock().unwrap() = IndexResult { index_data, error };
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StructuralIndexer for FakeIndexer {
    fn supports(&self, language: Language) -> bool {
        self.languages.contains(&language)
    }

    async fn index(&self, _: &IndexRequest) -> Result<IndexResult, ClientError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.response.lock().unwrap().clone())
    }
}

// ── Chunker ─────────────────────────────────────────────────────────

/// Splits on blank lines; markdown blocks become sections.
pub struct FakeChunker {
    languages: Mutex<Vec<String>>,
    seen: Mutex<Vec<String>>,
}

impl Default for FakeChunker {
    fn default() -> Self {
        Self {
            languages: Mutex::new(vec!["go".into(), "markdown".into()]),
            seen: Mutex::default(),
        }
    }
}

impl FakeChunker {
    pub fn only(&self, language: &str) {
        *self.languages.lock().unwrap() = vec![language.to_string()];
    }

    /// Distinct languages chunked so far, sorted.
    pub fn languages_seen(&self) -> Vec<String> {
        let mut seen = self.seen.lock().unwrap().clone();
        seen.sort();
        seen.dedup();
        seen
    }
}

#[async_trait]
impl Chunker for FakeChunker {
    fn supports(&self, language: &str) -> bool {
        self.languages.lock().unwrap().iter().any(|l| l == language)
    }

    async fn chunk(&self, language: &str, _: &str, content: &[u8]) -> Result<Vec<ChunkSegment>, ClientError> {
        self.seen.lock().unwrap().push(language.to_string());
        let text = String::from_utf8_lossy(content);
        let kind = if language == "markdown" {
            ChunkKind::Section
        } else {
            ChunkKind::Code
        };

        let mut segments = Vec::new();
        let mut line = 1u32;
        for block in text.split("\n\n") {
            let lines = block.lines().count() as u32;
            if !block.trim().is_empty() {
                segments.push(ChunkSegment {
                    content: block.trim().to_string(),
                    kind,
                    start_line: line,
                    end_line: line + lines.saturating_sub(1),
                    symbol: None,
                    context: vec![],
                });
            }
            line += lines + 1;
        }
        Ok(segments)
    }
}

// ── Embedder ────────────────────────────────────────────────────────

#[derive(Default)]
pub struct FakeEmbedder {
    batches: Mutex<Vec<usize>>,
    drop_last: AtomicBool,
}

impl FakeEmbedder {
    /// Return one vector fewer than asked for.
    pub fn drop_last_vector(&self) {
        self.drop_last.store(true, Ordering::SeqCst);
    }

    pub fn batch_sizes_sorted(&self) -> Vec<usize> {
        let mut sizes = self.batches.lock().unwrap().clone();
        sizes.sort();
        sizes
    }
}

#[async_trait]
impl Embedder for FakeEmbedder {
    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, ClientError> {
        self.batches.lock().unwrap().push(texts.len());
        let mut n = texts.len();
        if self.drop_last.load(Ordering::SeqCst) {
            n = n.saturating_sub(1);
        }
        Ok(vec![vec![texts.len() as f32; self.dimensions()]; n])
    }

    fn dimensions(&self) -> usize {
        4
    }
}

// ── Events ──────────────────────────────────────────────────────────

#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<IngestEvent>>,
}

impl RecordingSink {
    pub fn recorded(&self) -> Vec<IngestEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: &IngestEvent) -> Result<(), SinkError> {
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}

// ── Harness ─────────────────────────────────────────────────────────

/// A memory store seeded with one pending job (Go repository, version at
/// commit `abc123`) plus fakes for every client.
pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub source: Arc<FakeSource>,
    pub indexer: Arc<FakeIndexer>,
    pub chunker: Arc<FakeChunker>,
    pub embedder: Arc<FakeEmbedder>,
    pub events: Arc<RecordingSink>,
    pub deps: IngestDeps,
    pub tuning: PipelineTuning,
    pub job_id: JobId,
    pub version_id: i64,
    pub repository_id: i64,
    pub user_id: i64,
}

impl Harness {
    pub fn new() -> Self {
        Self::build(Language::Go, true)
    }

    pub fn with_language(language: Language) -> Self {
        Self::build(language, true)
    }

    pub fn without_token() -> Self {
        Self::build(Language::Go, false)
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.tuning.embed.batch_size = batch_size;
        self
    }

    fn build(language: Language, token: bool) -> Self {
        let (job_id, version_id, repository_id, user_id) = (1, 20, 10, 7);

        let store = Arc::new(MemoryStore::new());
        let created = Utc::now() - ChronoDuration::minutes(5);
        store
            .insert_version(Version {
                id: version_id,
                repository_id,
                user_id,
                owner: "acme".into(),
                repo_name: "widgets".into(),
                tag: "v1.0.0".into(),
                commit_sha: "abc123".into(),
                status: VersionStatus::Ingesting,
                error: None,
                created_at: created,
                updated_at: created,
            })
            .unwrap();
        store
            .insert_config(IngestionConfig::new(repository_id, user_id, language))
            .unwrap();
        if token {
            store.set_token(user_id, "ghp_test").unwrap();
        }

        let source = Arc::new(FakeSource::default());
        source.set_tree(vec![
            TreeEntry {
                path: "main.go".into(),
                kind: EntryKind::Blob,
                size: 100,
            },
            TreeEntry {
                path: "README.md".into(),
                kind: EntryKind::Blob,
                size: 200,
            },
        ]);
        let indexer = Arc::new(FakeIndexer::go());
        let chunker = Arc::new(FakeChunker::default());
        let embedder = Arc::new(FakeEmbedder::default());
        let events = Arc::new(RecordingSink::default());

        let deps = IngestDeps::in_memory(
            store.clone(),
            source.clone(),
            indexer.clone(),
            chunker.clone(),
            embedder.clone(),
            events.clone(),
        );

        let harness = Self {
            store,
            source,
            indexer,
            chunker,
            embedder,
            events,
            deps,
            tuning: PipelineTuning::default(),
            job_id,
            version_id,
            repository_id,
            user_id,
        };
        harness.add_job(job_id);
        harness
    }

    /// Seed another pending job for the same version and return it.
    pub fn add_job(&self, id: JobId) -> Job {
        let job = Job::pending(id, self.version_id, self.repository_id, self.user_id, "acme", "widgets", "v1.0.0");
        self.store.insert_job(job.clone()).unwrap();
        job
    }

    /// The seeded job as a notification would carry it.
    pub fn pending_job(&self) -> Job {
        self.store.job(self.job_id).unwrap()
    }

    /// The seeded job as a stage sees it: running, not yet persisted as such.
    pub fn job(&self) -> Job {
        let mut job = self.pending_job();
        job.start(Utc::now()).unwrap();
        job
    }

    pub fn pools(&self) -> Arc<StagePools> {
        Arc::new(StagePools::new(&self.deps, &self.tuning))
    }

    pub fn runtime(&self) -> IngestRuntime {
        IngestRuntime::new(self.deps.clone(), &self.tuning)
    }
}
