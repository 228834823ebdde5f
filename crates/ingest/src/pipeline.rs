//! Runs the five stages in order for one job.

use std::sync::Arc;

use tracing::{debug, info, warn};

use quarry_core::{Job, JobId, JobStage};

use crate::contracts::JobStore;
use crate::error::{IngestError, ResultExt};
use crate::reliability::Reliable;
use crate::runtime::{IngestDeps, StagePools};
use crate::stages::{ChunkStage, EmbedStage, FetchStage, ParseStage, Stage, StoreStage};

/// How a pipeline run ended. The job is returned as last seen.
#[derive(Debug)]
pub enum PipelineOutcome {
    Completed(Job),
    /// Stopped at a stage boundary; `after` is the last stage that finished.
    Cancelled { job: Job, after: JobStage },
    Failed {
        job: Job,
        stage: JobStage,
        error: IngestError,
    },
}

impl PipelineOutcome {
    pub fn job(&self) -> &Job {
        match self {
            PipelineOutcome::Completed(job)
            | PipelineOutcome::Cancelled { job, .. }
            | PipelineOutcome::Failed { job, .. } => job,
        }
    }
}

// ── Cancellation ────────────────────────────────────────────────────

/// Checks between stages whether the job should stop.
#[derive(Clone)]
pub struct CancellationGate {
    jobs: Arc<dyn JobStore>,
}

impl CancellationGate {
    pub fn new(jobs: Arc<dyn JobStore>) -> Self {
        Self { jobs }
    }

    pub async fn should_stop(&self, id: JobId) -> Result<bool, IngestError> {
        self.jobs
            .is_cancelling(id)
            .await
            .or_dependency("check cancellation")
    }
}

// ── Sequence ────────────────────────────────────────────────────────

pub struct PipelineSequence {
    stages: Vec<Box<dyn Stage>>,
    gate: CancellationGate,
    jobs: Arc<dyn JobStore>,
}

impl PipelineSequence {
    pub fn new(stages: Vec<Box<dyn Stage>>, jobs: Arc<dyn JobStore>) -> Self {
        Self {
            stages,
            gate: CancellationGate::new(jobs.clone()),
            jobs,
        }
    }

    /// fetch → parse → chunk → embed → store, each with the standard
    /// timeout and retry policy.
    pub fn standard(deps: &IngestDeps, pools: &Arc<StagePools>) -> Self {
        let stages: Vec<Box<dyn Stage>> = vec![
            Box::new(Reliable::standard(FetchStage::new(deps, pools.clone()))),
            Box::new(Reliable::standard(ParseStage::new(deps, pools.clone()))),
            Box::new(Reliable::standard(ChunkStage::new(deps, pools.clone()))),
            Box::new(Reliable::standard(EmbedStage::new(deps, pools.clone()))),
            Box::new(Reliable::standard(StoreStage::new(deps))),
        ];
        Self::new(stages, deps.jobs.clone())
    }

    /// Run every stage in order, threading the job through.
    ///
    /// The cancellation gate is consulted before every stage but the first.
    /// A failed gate query fails the run.
    pub async fn run(&self, job: Job) -> PipelineOutcome {
        let mut job = job;
        let mut last_done: Option<JobStage> = None;

        for stage in &self.stages {
            let kind = stage.kind();

            if let Some(after) = last_done {
                match self.gate.should_stop(job.id).await {
                    Ok(true) => {
                        info!(job_id = job.id, %after, "cancellation requested, stopping");
                        return PipelineOutcome::Cancelled { job, after };
                    }
                    Ok(false) => {}
                    Err(error) => {
                        return PipelineOutcome::Failed {
                            job,
                            stage: kind,
                            error,
                        };
                    }
                }
            }

            debug!(job_id = job.id, stage = %kind, "stage starting");
            match stage.execute(job.clone()).await {
                Ok(next) => job = next,
                Err(error) => {
                    warn!(job_id = job.id, stage = %kind, error = %error, "stage failed");
                    return PipelineOutcome::Failed {
                        job,
                        stage: kind,
                        error,
                    };
                }
            }

            // Progress is informational; the run continues without it.
            if let Err(e) = self
                .jobs
                .update_progress(job.id, job.stage, job.items_total, job.items_processed)
                .await
            {
                warn!(job_id = job.id, stage = %kind, error = %e, "failed to record progress");
            }
            last_done = Some(kind);
        }

        PipelineOutcome::Completed(job)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use async_trait::async_trait;
    use std::sync::Mutex;

    type Trace = Arc<Mutex<Vec<JobStage>>>;

    /// Records that it ran; optionally requests cancellation or fails.
    struct Recording {
        kind: JobStage,
        trace: Trace,
        store: Arc<MemoryStore>,
        cancel: bool,
        fail: bool,
    }

    #[async_trait]
    impl Stage for Recording {
        fn kind(&self) -> JobStage {
            self.kind
        }

        async fn execute(&self, mut job: Job) -> Result<Job, IngestError> {
            self.trace.lock().unwrap().push(self.kind);
            job.enter_stage(self.kind)?;
            job.set_counts(2, 2);
            if self.cancel {
                self.store.request_cancel(job.id).unwrap();
            }
            if self.fail {
                return Err(IngestError::Consistency(format!("{} broke", self.kind)));
            }
            Ok(job)
        }
    }

    fn setup(cancel_at: Option<JobStage>, fail_at: Option<JobStage>) -> (PipelineSequence, Arc<MemoryStore>, Trace, Job) {
        let store = Arc::new(MemoryStore::new());
        let mut job = Job::pending(1, 2, 3, 4, "acme", "widgets", "v1");
        job.start(chrono::Utc::now()).unwrap();
        store.insert_job(job.clone()).unwrap();

        let trace: Trace = Arc::default();
        let stages = JobStage::ALL
            .iter()
            .map(|&kind| {
                Box::new(Recording {
                    kind,
                    trace: trace.clone(),
                    store: store.clone(),
                    cancel: cancel_at == Some(kind),
                    fail: fail_at == Some(kind),
                }) as Box<dyn Stage>
            })
            .collect();
        (PipelineSequence::new(stages, store.clone()), store, trace, job)
    }

    #[tokio::test]
    async fn runs_all_stages_in_order() {
        let (seq, store, trace, job) = setup(None, None);
        let outcome = seq.run(job).await;

        assert!(matches!(outcome, PipelineOutcome::Completed(ref j) if j.stage == JobStage::Store));
        assert_eq!(*trace.lock().unwrap(), JobStage::ALL.to_vec());
        assert_eq!(store.stage_log(1), JobStage::ALL.to_vec());
    }

    #[tokio::test]
    async fn cancellation_stops_at_next_boundary() {
        let (seq, store, trace, job) = setup(Some(JobStage::Parse), None);
        let outcome = seq.run(job).await;

        match outcome {
            PipelineOutcome::Cancelled { after, job } => {
                assert_eq!(after, JobStage::Parse);
                assert_eq!(job.stage, JobStage::Parse);
            }
            other => panic!("expected cancellation, got {other:?}"),
        }
        assert_eq!(*trace.lock().unwrap(), vec![JobStage::Fetch, JobStage::Parse]);
        assert_eq!(store.stage_log(1), vec![JobStage::Fetch, JobStage::Parse]);
    }

    #[tokio::test]
    async fn cancel_during_last_stage_still_completes() {
        let (seq, _, _, job) = setup(Some(JobStage::Store), None);
        assert!(matches!(seq.run(job).await, PipelineOutcome::Completed(_)));
    }

    #[tokio::test]
    async fn failure_reports_stage_and_skips_the_rest() {
        let (seq, _, trace, job) = setup(None, Some(JobStage::Chunk));
        match seq.run(job).await {
            PipelineOutcome::Failed { stage, error, job } => {
                assert_eq!(stage, JobStage::Chunk);
                assert_eq!(error.to_string(), "chunk broke");
                assert_eq!(job.stage, JobStage::Parse, "job as of the last successful stage");
            }
            other => panic!("expected failure, got {other:?}"),
        }
        assert_eq!(trace.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn gate_error_fails_the_run() {
        let (seq, _, trace, mut job) = setup(None, None);
        job.id = 77;

        match seq.run(job).await {
            PipelineOutcome::Failed { stage, error, .. } => {
                assert_eq!(stage, JobStage::Parse);
                assert!(error.to_string().starts_with("check cancellation"));
            }
            other => panic!("expected failure, got {other:?}"),
        }
        assert_eq!(*trace.lock().unwrap(), vec![JobStage::Fetch]);
    }
}
