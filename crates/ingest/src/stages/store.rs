use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use quarry_core::{Job, JobStage, VersionStatus};

use crate::contracts::VersionStore;
use crate::error::{IngestError, ResultExt};
use crate::events::EventSink;
use crate::runtime::IngestDeps;
use crate::stages::{begin, finish, Stage};

/// Marks the version ready for queries.
pub struct StoreStage {
    versions: Arc<dyn VersionStore>,
    events: Arc<dyn EventSink>,
}

impl StoreStage {
    pub fn new(deps: &IngestDeps) -> Self {
        Self {
            versions: deps.versions.clone(),
            events: deps.events.clone(),
        }
    }
}

#[async_trait]
impl Stage for StoreStage {
    fn kind(&self) -> JobStage {
        JobStage::Store
    }

    async fn execute(&self, mut job: Job) -> Result<Job, IngestError> {
        begin(&mut job, JobStage::Store, &*self.events)?;

        self.versions
            .update_status(job.version_id, VersionStatus::Ready, None)
            .await
            .or_persistence("update version status")?;

        job.set_counts(1, 1);
        info!(job_id = job.id, version_id = job.version_id, "version ready");
        finish(&job, &*self.events);
        Ok(job)
    }
}
