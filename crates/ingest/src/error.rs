use std::time::Duration;

use thiserror::Error;

use quarry_core::{CoreError, JobStage};

use crate::pool::PoolError;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Failure of a store contract.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{entity} not found: {key}")]
    NotFound { entity: &'static str, key: String },

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("store backend error: {0}")]
    Backend(String),
}

/// Failure of an external collaborator (source host, indexer, chunker, embedder).
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error: {0}")]
    Api(String),

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("decode error: {0}")]
    Decode(String),

    #[error("unsupported: {0}")]
    Unsupported(String),
}

/// Everything a stage can fail with.
#[derive(Debug, Error)]
pub enum IngestError {
    /// A collaborator call or dependency read failed.
    #[error("{context}: {source}")]
    Dependency {
        context: String,
        #[source]
        source: BoxError,
    },

    /// Collaborator output that does not line up with its input.
    #[error("{0}")]
    Consistency(String),

    /// A store write failed.
    #[error("{context}: {source}")]
    Persistence {
        context: String,
        #[source]
        source: BoxError,
    },

    #[error("{stage} stage timed out after {after:?}")]
    StageTimeout { stage: JobStage, after: Duration },

    #[error("{pool} pool item timed out after {after:?}")]
    PoolTimeout { pool: String, after: Duration },

    #[error("{pool} pool is closed")]
    PoolClosed { pool: String },

    #[error("{pool} pool worker panicked")]
    WorkerPanicked { pool: String },

    #[error(transparent)]
    Job(#[from] CoreError),
}

impl IngestError {
    pub fn dependency(context: impl Into<String>, source: impl Into<BoxError>) -> Self {
        IngestError::Dependency {
            context: context.into(),
            source: source.into(),
        }
    }

    pub fn persistence(context: impl Into<String>, source: impl Into<BoxError>) -> Self {
        IngestError::Persistence {
            context: context.into(),
            source: source.into(),
        }
    }
}

impl From<PoolError<IngestError>> for IngestError {
    fn from(err: PoolError<IngestError>) -> Self {
        match err {
            PoolError::Task(e) => e,
            PoolError::Timeout { pool, after } => IngestError::PoolTimeout { pool, after },
            PoolError::Closed { pool } => IngestError::PoolClosed { pool },
            PoolError::Panicked { pool } => IngestError::WorkerPanicked { pool },
        }
    }
}

/// Attach context to a failed dependency read or store write.
pub(crate) trait ResultExt<T> {
    fn or_dependency(self, context: impl Into<String>) -> Result<T, IngestError>;
    fn or_persistence(self, context: impl Into<String>) -> Result<T, IngestError>;
}

impl<T, E: Into<BoxError>> ResultExt<T> for Result<T, E> {
    fn or_dependency(self, context: impl Into<String>) -> Result<T, IngestError> {
        self.map_err(|e| IngestError::dependency(context, e))
    }

    fn or_persistence(self, context: impl Into<String>) -> Result<T, IngestError> {
        self.map_err(|e| IngestError::persistence(context, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_prefixes_message() {
        let r: Result<(), StoreError> = Err(StoreError::Backend("disk full".into()));
        let err = r.or_persistence("store blob main.go").unwrap_err();
        assert_eq!(err.to_string(), "store blob main.go: store backend error: disk full");
        assert!(matches!(err, IngestError::Persistence { .. }));
    }

    #[test]
    fn pool_task_error_is_unwrapped() {
        let err: IngestError = PoolError::Task(IngestError::Consistency("bad".into())).into();
        assert!(matches!(err, IngestError::Consistency(ref m) if m == "bad"));

        let err: IngestError = PoolError::<IngestError>::Timeout {
            pool: "fetch".into(),
            after: Duration::from_secs(1),
        }
        .into();
        assert!(matches!(err, IngestError::PoolTimeout { .. }));
    }
}
