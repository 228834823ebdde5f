use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

pub type JobId = i64;

/// Pipeline stage a job is in. Ordering follows pipeline order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStage {
    Fetch,
    Parse,
    Chunk,
    Embed,
    Store,
}

impl JobStage {
    pub const ALL: [JobStage; 5] = [
        JobStage::Fetch,
        JobStage::Parse,
        JobStage::Chunk,
        JobStage::Embed,
        JobStage::Store,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStage::Fetch => "fetch",
            JobStage::Parse => "parse",
            JobStage::Chunk => "chunk",
            JobStage::Embed => "embed",
            JobStage::Store => "store",
        }
    }

    pub fn next(self) -> Option<JobStage> {
        match self {
            JobStage::Fetch => Some(JobStage::Parse),
            JobStage::Parse => Some(JobStage::Chunk),
            JobStage::Chunk => Some(JobStage::Embed),
            JobStage::Embed => Some(JobStage::Store),
            JobStage::Store => None,
        }
    }
}

impl std::fmt::Display for JobStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    /// Written by an external cancellation request; the pipeline only observes it.
    Cancelling,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelling => "cancelling",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// A job that has started and not yet reached a terminal state.
    fn is_active(&self) -> bool {
        matches!(self, JobStatus::Running | JobStatus::Cancelling)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One ingestion run for a repository version.
///
/// `items_total` / `items_processed` describe the current stage only; every
/// stage overwrites them with its own counts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub version_id: i64,
    pub repository_id: i64,
    pub user_id: i64,
    pub owner: String,
    pub repo_name: String,
    pub tag: String,
    pub stage: JobStage,
    pub status: JobStatus,
    pub progress: u8,
    pub error: Option<String>,
    pub items_total: usize,
    pub items_processed: usize,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// A freshly created job, as an external actor would enqueue it.
    pub fn pending(
        id: JobId,
        version_id: i64,
        repository_id: i64,
        user_id: i64,
        owner: impl Into<String>,
        repo_name: impl Into<String>,
        tag: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            version_id,
            repository_id,
            user_id,
            owner: owner.into(),
            repo_name: repo_name.into(),
            tag: tag.into(),
            stage: JobStage::Fetch,
            status: JobStatus::Pending,
            progress: 0,
            error: None,
            items_total: 0,
            items_processed: 0,
            created_at: now,
            started_at: None,
            completed_at: None,
            updated_at: now,
        }
    }

    // ── Status transitions ───────────────────────────────────────

    /// pending → running.
    pub fn start(&mut self, now: DateTime<Utc>) -> Result<(), CoreError> {
        self.transition(JobStatus::Running, |s| s == JobStatus::Pending)?;
        self.started_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    /// running → completed.
    pub fn complete(&mut self, now: DateTime<Utc>) -> Result<(), CoreError> {
        self.transition(JobStatus::Completed, |s| s.is_active())?;
        self.progress = 100;
        self.completed_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    /// running → failed.
    pub fn fail(&mut self, message: impl Into<String>, now: DateTime<Utc>) -> Result<(), CoreError> {
        self.transition(JobStatus::Failed, |s| s.is_active())?;
        self.error = Some(message.into());
        self.completed_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    /// running/cancelling → cancelled. No error message is recorded.
    pub fn cancel(&mut self, now: DateTime<Utc>) -> Result<(), CoreError> {
        self.transition(JobStatus::Cancelled, |s| s.is_active())?;
        self.completed_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    /// External cancellation request: flags an unfinished job as cancelling.
    pub fn request_cancel(&mut self, now: DateTime<Utc>) -> Result<(), CoreError> {
        self.transition(JobStatus::Cancelling, |s| {
            matches!(s, JobStatus::Pending | JobStatus::Running)
        })?;
        self.updated_at = now;
        Ok(())
    }

    fn transition(
        &mut self,
        to: JobStatus,
        allowed_from: impl Fn(JobStatus) -> bool,
    ) -> Result<(), CoreError> {
        if !allowed_from(self.status) {
            return Err(CoreError::InvalidTransition {
                from: self.status,
                to,
            });
        }
        self.status = to;
        Ok(())
    }

    // ── Stage bookkeeping ────────────────────────────────────────

    /// Move the job into `stage`, resetting the stage-local counters.
    /// Re-entering the current stage is allowed (retries); going back is not.
    pub fn enter_stage(&mut self, stage: JobStage) -> Result<(), CoreError> {
        if stage < self.stage {
            return Err(CoreError::StageRegression {
                from: self.stage,
                to: stage,
            });
        }
        self.stage = stage;
        self.items_total = 0;
        self.items_processed = 0;
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn set_counts(&mut self, total: usize, processed: usize) {
        self.items_total = total;
        self.items_processed = processed;
        self.updated_at = Utc::now();
    }
}
