pub mod chunking;
pub mod contracts;
pub mod embedding;
pub mod error;
pub mod events;
pub mod filter;
pub(crate) mod http;
pub mod indexer;
pub mod memory;
pub mod pipeline;
pub mod pool;
pub mod reliability;
pub mod runtime;
pub mod scip;
pub mod source;
pub mod stages;
pub mod worker;

#[cfg(test)]
mod testing;

pub use chunking::TextChunker;
pub use contracts::*;
pub use embedding::Embedder;
pub use error::{ClientError, IngestError, StoreError};
pub use events::{BroadcastSink, EventSink, IngestEvent, TracingSink};
pub use filter::FileFilter;
pub use indexer::HttpIndexer;
pub use memory::MemoryStore;
pub use pipeline::{CancellationGate, PipelineOutcome, PipelineSequence};
pub use pool::{PoolError, WorkHandler, WorkerPool};
pub use reliability::Reliable;
pub use runtime::{spawn_tuning_listener, ConfigSink, IngestDeps, IngestRuntime, StagePools};
pub use source::GitHubClient;
pub use stages::Stage;
pub use worker::{IngestionWorker, JobNotifications, JobOutcome};
