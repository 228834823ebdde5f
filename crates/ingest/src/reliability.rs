//! Timeout + retry around a stage.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, warn};

use quarry_core::{Job, JobStage};

use crate::error::IngestError;
use crate::stages::Stage;

/// Attempts per stage, first run included.
pub const DEFAULT_ATTEMPTS: usize = 3;

pub const FETCH_TIMEOUT: Duration = Duration::from_secs(5 * 60);
pub const PARSE_TIMEOUT: Duration = Duration::from_secs(10 * 60);
pub const CHUNK_TIMEOUT: Duration = Duration::from_secs(5 * 60);
pub const EMBED_TIMEOUT: Duration = Duration::from_secs(30 * 60);
pub const STORE_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Whole-stage deadline for `stage`.
pub fn stage_timeout(stage: JobStage) -> Duration {
    match stage {
        JobStage::Fetch => FETCH_TIMEOUT,
        JobStage::Parse => PARSE_TIMEOUT,
        JobStage::Chunk => CHUNK_TIMEOUT,
        JobStage::Embed => EMBED_TIMEOUT,
        JobStage::Store => STORE_TIMEOUT,
    }
}

/// `Retry(Timeout(stage, timeout), attempts)`.
///
/// Every attempt starts from a fresh copy of the input job and any error,
/// a timeout included, triggers the next attempt immediately.
pub struct Reliable<S> {
    inner: S,
    timeout: Duration,
    attempts: usize,
}

impl<S: Stage> Reliable<S> {
    pub fn new(inner: S, timeout: Duration, attempts: usize) -> Self {
        Self {
            inner,
            timeout,
            attempts: attempts.max(1),
        }
    }

    /// Wrap with the stage's standard timeout and [`DEFAULT_ATTEMPTS`].
    pub fn standard(inner: S) -> Self {
        let timeout = stage_timeout(inner.kind());
        Self::new(inner, timeout, DEFAULT_ATTEMPTS)
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

#[async_trait]
impl<S: Stage> Stage for Reliable<S> {
    fn kind(&self) -> JobStage {
        self.inner.kind()
    }

    async fn execute(&self, job: Job) -> Result<Job, IngestError> {
        let stage = self.inner.kind();
        let mut attempt = 1;
        loop {
            let outcome = match tokio::time::timeout(self.timeout, self.inner.execute(job.clone())).await {
                Ok(result) => result,
                Err(_) => Err(IngestError::StageTimeout {
                    stage,
                    after: self.timeout,
                }),
            };

            match outcome {
                Ok(done) => {
                    if attempt > 1 {
                        info!(job_id = job.id, %stage, attempt, "stage succeeded after retry");
                    }
                    return Ok(done);
                }
                Err(e) if attempt < self.attempts => {
                    warn!(job_id = job.id, %stage, attempt, error = %e, "stage attempt failed, retrying");
                    attempt += 1;
                }
                Err(e) => {
                    warn!(job_id = job.id, %stage, attempts = self.attempts, error = %e, "stage failed");
                    return Err(e);
                }
            }
        }
    }
}
