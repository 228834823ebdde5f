//! The five pipeline stages.
//!
//! Each stage takes the job by value, does its work (fanning sub-items out
//! through its shared pool), and hands back the job with its stage and
//! stage-local counts updated.

pub mod chunk;
pub mod embed;
pub mod fetch;
pub mod parse;
pub mod store;

use std::future::Future;

use async_trait::async_trait;
use futures::stream::{FuturesUnordered, StreamExt};

use quarry_core::{Job, JobStage};

use crate::error::IngestError;
use crate::events::{emit, EventSink, IngestEvent};

pub use chunk::{ChunkDocument, ChunkItem, ChunkStage};
pub use embed::{batches, EmbedBatch, EmbedItem, EmbedStage};
pub use fetch::{FetchItem, FetchStage, StoreBlob};
pub use parse::{ParseItem, ParseStage, PersistSymbols, SymbolCounts};
pub use store::StoreStage;

#[async_trait]
pub trait Stage: Send + Sync {
    fn kind(&self) -> JobStage;

    async fn execute(&self, job: Job) -> Result<Job, IngestError>;
}

#[async_trait]
impl Stage for Box<dyn Stage> {
    fn kind(&self) -> JobStage {
        (**self).kind()
    }

    async fn execute(&self, job: Job) -> Result<Job, IngestError> {
        (**self).execute(job).await
    }
}

/// Await every dispatched item, then report the first error to complete,
/// or all outputs (in completion order). Nothing is cancelled early.
pub(crate) async fn drain_all<T, E, Fut>(dispatch: impl IntoIterator<Item = Fut>) -> Result<Vec<T>, IngestError>
where
    Fut: Future<Output = Result<T, E>>,
    E: Into<IngestError>,
{
    let mut pending: FuturesUnordered<Fut> = dispatch.into_iter().collect();
    let mut done = Vec::with_capacity(pending.len());
    let mut first_error = None;

    while let Some(result) = pending.next().await {
        match result {
            Ok(v) => done.push(v),
            Err(e) => {
                if first_error.is_none() {
                    first_error = Some(e.into());
                }
            }
        }
    }

    match first_error {
        Some(e) => Err(e),
        None => Ok(done),
    }
}

/// Move the job into `stage` and announce it.
pub(crate) fn begin(job: &mut Job, stage: JobStage, events: &dyn EventSink) -> Result<(), IngestError> {
    job.enter_stage(stage)?;
    emit(events, IngestEvent::StageStarted { job_id: job.id, stage });
    Ok(())
}

pub(crate) fn finish(job: &Job, events: &dyn EventSink) {
    emit(
        events,
        IngestEvent::StageCompleted {
            job_id: job.id,
            stage: job.stage,
            items_total: job.items_total,
            items_processed: job.items_processed,
        },
    );
}
