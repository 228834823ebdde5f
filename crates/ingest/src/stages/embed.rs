use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use quarry_core::{Chunk, Job, JobStage};

use crate::contracts::ChunkStore;
use crate::embedding::Embedder;
use crate::error::{IngestError, ResultExt};
use crate::events::EventSink;
use crate::pool::WorkHandler;
use crate::runtime::{IngestDeps, StagePools};
use crate::stages::{begin, drain_all, finish, Stage};

/// Split `items` into consecutive batches of at most `size`.
pub fn batches<T>(items: Vec<T>, size: usize) -> Vec<Vec<T>> {
    let size = size.max(1);
    let mut out = Vec::with_capacity(items.len().div_ceil(size));
    let mut current = Vec::with_capacity(size.min(items.len()));
    for item in items {
        current.push(item);
        if current.len() == size {
            out.push(std::mem::replace(&mut current, Vec::with_capacity(size)));
        }
    }
    if !current.is_empty() {
        out.push(current);
    }
    out
}

pub struct EmbedItem {
    pub index: usize,
    pub chunks: Vec<Chunk>,
}

/// Embeds one batch and writes each vector back onto its chunk.
pub struct EmbedBatch {
    embedder: Arc<dyn Embedder>,
    chunks: Arc<dyn ChunkStore>,
}

impl EmbedBatch {
    pub fn new(embedder: Arc<dyn Embedder>, chunks: Arc<dyn ChunkStore>) -> Self {
        Self { embedder, chunks }
    }
}

#[async_trait]
impl WorkHandler<EmbedItem> for EmbedBatch {
    /// Chunks updated.
    type Output = usize;
    type Error = IngestError;

    async fn handle(&self, item: EmbedItem) -> Result<usize, IngestError> {
        let EmbedItem { index, mut chunks } = item;
        let texts: Vec<&str> = chunks.iter().map(|c| c.content.as_str()).collect();
        let vectors = self
            .embedder
            .embed_batch(&texts)
            .await
            .or_dependency(format!("embed batch {index}"))?;

        if vectors.len() != chunks.len() {
            return Err(IngestError::Consistency(format!(
                "embed batch {index}: expected {} vectors, got {}",
                chunks.len(),
                vectors.len()
            )));
        }

        for (chunk, vector) in chunks.iter_mut().zip(vectors) {
            chunk.vector = Some(vector);
            self.chunks
                .update(chunk)
                .await
                .or_persistence(format!("update chunk {}", chunk.id))?;
        }
        Ok(chunks.len())
    }
}

/// Embeds every chunk of the version in fixed-size batches.
pub struct EmbedStage {
    chunks: Arc<dyn ChunkStore>,
    events: Arc<dyn EventSink>,
    pools: Arc<StagePools>,
}

impl EmbedStage {
    pub fn new(deps: &IngestDeps, pools: Arc<StagePools>) -> Self {
        Self {
            chunks: deps.chunks.clone(),
            events: deps.events.clone(),
            pools,
        }
    }
}

#[async_trait]
impl Stage for EmbedStage {
    fn kind(&self) -> JobStage {
        JobStage::Embed
    }

    async fn execute(&self, mut job: Job) -> Result<Job, IngestError> {
        begin(&mut job, JobStage::Embed, &*self.events)?;

        let chunks = self
            .chunks
            .list_by_version(job.version_id)
            .await
            .or_dependency("list chunks")?;
        let total = chunks.len();
        job.set_counts(total, 0);

        if chunks.is_empty() {
            finish(&job, &*self.events);
            return Ok(job);
        }

        let batch_size = self.pools.embed_batch_size();
        let groups = batches(chunks, batch_size);
        let batch_count = groups.len();
        let updated = drain_all(
            groups
                .into_iter()
                .enumerate()
                .map(|(index, chunks)| self.pools.embed.process(EmbedItem { index, chunks })),
        )
        .await?;

        job.set_counts(total, updated.iter().sum());
        info!(job_id = job.id, chunks = total, batches = batch_count, batch_size, "embed complete");
        finish(&job, &*self.events);
        Ok(job)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Harness;
    use chrono::Utc;
    use quarry_core::ChunkKind;

    async fn seed_chunks(h: &Harness, n: usize) {
        for i in 0..n {
            let mut chunk = Chunk {
                id: 0,
                document_id: 1,
                version_id: h.version_id,
                user_id: h.user_id,
                owner: "acme".into(),
                repo_name: "widgets".into(),
                tag: "v1.0.0".into(),
                path: "main.go".into(),
                kind: ChunkKind::Code,
                start_line: i as u32 + 1,
                end_line: i as u32 + 1,
                symbol: None,
                context: vec![],
                content: format!("line {i}"),
                vector: None,
                created_at: Utc::now(),
            };
            ChunkStore::create(&*h.store, &mut chunk).await.unwrap();
        }
    }

    #[test]
    fn batches_split_with_short_tail() {
        let sizes: Vec<usize> = batches((0..300).collect(), 128).iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![128, 128, 44]);
    }

    #[test]
    fn batches_treat_zero_as_one() {
        assert_eq!(batches(vec![1, 2], 0), vec![vec![1], vec![2]]);
        assert!(batches(Vec::<u8>::new(), 10).is_empty());
    }

    #[tokio::test]
    async fn embeds_all_chunks_in_batches() {
        let h = Harness::new().with_batch_size(2);
        seed_chunks(&h, 5).await;

        let job = EmbedStage::new(&h.deps, h.pools())
            .execute(h.job())
            .await
            .unwrap();

        assert_eq!((job.items_total, job.items_processed), (5, 5));
        assert_eq!(h.embedder.batch_sizes_sorted(), vec![1, 2, 2]);
        assert!(h
            .store
            .chunks()
            .iter()
            .all(|c| c.vector.as_ref().map(Vec::len) == Some(h.embedder.dimensions())));
    }

    #[tokio::test]
    async fn no_chunks_skips_embedder() {
        let h = Harness::new();
        let job = EmbedStage::new(&h.deps, h.pools())
            .execute(h.job())
            .await
            .unwrap();
        assert_eq!((job.items_total, job.items_processed), (0, 0));
        assert!(h.embedder.batch_sizes_sorted().is_empty());
    }

    #[tokio::test]
    async fn short_vector_count_fails_before_any_write() {
        let h = Harness::new();
        h.embedder.drop_last_vector();
        seed_chunks(&h, 3).await;

        let err = EmbedStage::new(&h.deps, h.pools())
            .execute(h.job())
            .await
            .unwrap_err();

        assert!(matches!(err, IngestError::Consistency(_)));
        assert_eq!(err.to_string(), "embed batch 0: expected 3 vectors, got 2");
        assert!(h.store.chunks().iter().all(|c| c.vector.is_none()));
    }
}
