//! Top-level driver: turns job-created notifications into pipeline runs and
//! persists how each run ended.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use quarry_core::config::PipelineTuning;
use quarry_core::{CoreError, Job, JobStage};

use crate::contracts::JobStore;
use crate::events::{emit, EventSink, IngestEvent};
use crate::pipeline::{PipelineOutcome, PipelineSequence};
use crate::pool::{WorkHandler, WorkerPool};
use crate::runtime::{ConfigSink, IngestRuntime, StagePools};

/// Default number of jobs whose pipelines may run at once.
pub const DEFAULT_JOB_WORKERS: usize = 4;

/// How long `run` waits for accepted jobs after a shutdown request.
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

// ── Notifications ───────────────────────────────────────────────────

/// Source of job-created notifications. `None` means the source is done.
#[async_trait]
pub trait JobNotifications: Send {
    async fn next_job(&mut self) -> Option<Job>;
}

#[async_trait]
impl JobNotifications for mpsc::Receiver<Job> {
    async fn next_job(&mut self) -> Option<Job> {
        self.recv().await
    }
}

// ── Outcome ─────────────────────────────────────────────────────────

/// Terminal result of one notification, as persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Completed,
    Failed(String),
    Cancelled,
    /// The store refused to start the job; nothing ran.
    NotStarted(String),
}

// ── Worker ──────────────────────────────────────────────────────────

struct RunPipeline {
    pipeline: Arc<PipelineSequence>,
}

#[async_trait]
impl WorkHandler<Job> for RunPipeline {
    type Output = PipelineOutcome;
    type Error = Infallible;

    async fn handle(&self, job: Job) -> Result<PipelineOutcome, Infallible> {
        Ok(self.pipeline.run(job).await)
    }
}

pub struct IngestionWorker {
    pool: WorkerPool<Job, RunPipeline>,
    jobs: Arc<dyn JobStore>,
    events: Arc<dyn EventSink>,
    stage_pools: Arc<StagePools>,
    drain_timeout: Duration,
}

impl IngestionWorker {
    /// Must be called inside a tokio runtime.
    pub fn new(runtime: &IngestRuntime, job_workers: usize) -> Self {
        let handler = RunPipeline {
            pipeline: runtime.pipeline.clone(),
        };
        Self {
            pool: WorkerPool::new("ingest", job_workers, handler),
            jobs: runtime.deps.jobs.clone(),
            events: runtime.deps.events.clone(),
            stage_pools: runtime.pools.clone(),
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
        }
    }

    /// Bound the wait for in-flight jobs once shutdown is requested.
    pub fn with_drain_timeout(mut self, drain_timeout: Duration) -> Self {
        self.drain_timeout = drain_timeout;
        self
    }

    pub fn job_workers(&self) -> usize {
        self.pool.worker_count()
    }

    /// Start the job, run its pipeline through the job pool and record the
    /// terminal state. Never fails: every problem ends up in the outcome.
    pub async fn process_job(&self, job: Job) -> JobOutcome {
        let job_id = job.id;
        let version_id = job.version_id;

        if let Err(e) = self.jobs.start(job_id).await {
            let message = e.to_string();
            warn!(job_id, error = %message, "could not start job");
            // Emission failures are ignored.
            emit(
                &*self.events,
                IngestEvent::JobFailed {
                    job_id,
                    version_id,
                    stage: job.stage,
                    error: message.clone(),
                },
            );
            return JobOutcome::NotStarted(message);
        }

        let job = match self.jobs.get(job_id).await {
            Ok(stored) => stored,
            Err(e) => {
                warn!(job_id, error = %e, "could not reload started job, using notification copy");
                job
            }
        };

        info!(job_id, version_id, repo = %format!("{}/{}", job.owner, job.repo_name), tag = %job.tag, "job started");
        // Emission failures are ignored.
        emit(&*self.events, IngestEvent::JobStarted { job_id, version_id });

        let stage = job.stage;
        let outcome = match self.pool.process(job).await {
            Ok(outcome) => outcome,
            Err(e) => {
                let message = e.to_string();
                error!(job_id, error = %message, "job pool rejected job");
                self.record_failure(job_id, version_id, stage, &message).await;
                return JobOutcome::Failed(message);
            }
        };

        match outcome {
            PipelineOutcome::Completed(_) => {
                if let Err(e) = self.jobs.mark_completed(job_id).await {
                    warn!(job_id, error = %e, "failed to mark job completed");
                }
                info!(job_id, "job completed");
                // Emission failures are ignored.
                emit(&*self.events, IngestEvent::JobCompleted { job_id, version_id });
                JobOutcome::Completed
            }
            PipelineOutcome::Cancelled { after, .. } => {
                if let Err(e) = self.jobs.mark_cancelled(job_id).await {
                    warn!(job_id, error = %e, "failed to mark job cancelled");
                }
                info!(job_id, %after, "job cancelled");
                // Emission failures are ignored.
                emit(
                    &*self.events,
                    IngestEvent::JobCancelled {
                        job_id,
                        version_id,
                        stage: after,
                    },
                );
                JobOutcome::Cancelled
            }
            PipelineOutcome::Failed { stage, error, .. } => {
                let message = error.to_string();
                warn!(job_id, %stage, error = %message, "job failed");
                self.record_failure(job_id, version_id, stage, &message).await;
                JobOutcome::Failed(message)
            }
        }
    }

    async fn record_failure(
        &self,
        job_id: i64,
        version_id: i64,
        stage: JobStage,
        message: &str,
    ) {
        if let Err(e) = self.jobs.mark_failed(job_id, message).await {
            warn!(job_id, error = %e, "failed to mark job failed");
        }
        // Emission failures are ignored.
        emit(
            &*self.events,
            IngestEvent::JobFailed {
                job_id,
                version_id,
                stage,
                error: message.to_string(),
            },
        );
    }

    /// Handle notifications until the source ends or `shutdown` fires, then
    /// wait for the jobs already accepted. After a shutdown the wait is capped
    /// by the drain timeout and whatever is still running gets aborted.
    /// A `notify_one` sent before the loop starts is not lost.
    pub async fn run<N: JobNotifications>(self: Arc<Self>, mut notifications: N, shutdown: Arc<Notify>) {
        let stop = shutdown.notified();
        tokio::pin!(stop);
        stop.as_mut().enable();

        let mut in_flight = JoinSet::new();
        let mut shutting_down = false;
        info!(job_workers = self.job_workers(), "ingestion worker ready");

        loop {
            tokio::select! {
                _ = &mut stop => {
                    info!(in_flight = in_flight.len(), "shutdown requested");
                    shutting_down = true;
                    break;
                }
                next = notifications.next_job() => match next {
                    Some(job) => {
                        let worker = Arc::clone(&self);
                        in_flight.spawn(async move {
                            worker.process_job(job).await;
                        });
                    }
                    None => {
                        info!("notification source closed");
                        break;
                    }
                },
                Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                    if let Err(e) = joined {
                        error!(error = %e, "job task aborted");
                    }
                }
            }
        }

        if !shutting_down {
            join_all(&mut in_flight).await;
            return;
        }

        let drained = tokio::time::timeout(self.drain_timeout, join_all(&mut in_flight)).await;
        if drained.is_err() {
            warn!(
                remaining = in_flight.len(),
                timeout = ?self.drain_timeout,
                "jobs still running after the drain timeout, aborting"
            );
            in_flight.shutdown().await;
        }
    }

    /// Stop taking jobs and wait for every pool to drain.
    pub async fn stop(&self) {
        self.pool.shutdown().await;
        self.stage_pools.shutdown().await;
        info!("ingestion worker stopped");
    }
}

async fn join_all(in_flight: &mut JoinSet<()>) {
    while let Some(joined) = in_flight.join_next().await {
        if let Err(e) = joined {
            error!(error = %e, "job task aborted");
        }
    }
}

impl ConfigSink for IngestionWorker {
    fn apply(&self, tuning: &PipelineTuning) -> Result<(), CoreError> {
        tuning.validate()?;
        self.pool.set_worker_count(tuning.job_workers);
        self.stage_pools.apply(tuning)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Harness;
    use quarry_core::{JobStatus, VersionStatus};

    fn worker(h: &Harness) -> IngestionWorker {
        IngestionWorker::new(&h.runtime(), DEFAULT_JOB_WORKERS)
    }

    #[tokio::test]
    async fn completes_a_job_end_to_end() {
        let h = Harness::new();
        let outcome = worker(&h).process_job(h.pending_job()).await;

        assert_eq!(outcome, JobOutcome::Completed);
        let job = h.store.job(h.job_id).unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.progress, 100);
        assert_eq!(job.stage, JobStage::Store);
        assert_eq!(h.store.stage_log(h.job_id), JobStage::ALL.to_vec());
        assert_eq!(h.store.version(h.version_id).unwrap().status, VersionStatus::Ready);
        assert!(h.store.chunks().iter().all(|c| c.vector.is_some()));

        let events = h.events.recorded();
        assert!(matches!(events.first(), Some(IngestEvent::JobStarted { .. })));
        assert!(matches!(events.last(), Some(IngestEvent::JobCompleted { .. })));
    }

    #[tokio::test]
    async fn failure_is_persisted_with_message() {
        let h = Harness::new();
        h.indexer.respond(Vec::new(), Some("indexer crashed".into()));

        let outcome = worker(&h).process_job(h.pending_job()).await;

        let JobOutcome::Failed(message) = outcome else {
            panic!("expected failure, got {outcome:?}");
        };
        assert!(message.contains("indexer crashed"));
        // three attempts of the parse stage
        assert_eq!(h.indexer.calls(), 3);

        let job = h.store.job(h.job_id).unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error.as_deref(), Some(message.as_str()));
        assert!(h
            .events
            .recorded()
            .iter()
            .any(|e| matches!(e, IngestEvent::JobFailed { stage: JobStage::Parse, .. })));
    }

    #[tokio::test]
    async fn cancellation_is_not_a_failure() {
        let h = Harness::new();
        let store = h.store.clone();
        let job_id = h.job_id;
        h.source.on_tree(move || {
            let _ = store.request_cancel(job_id);
        });

        let outcome = worker(&h).process_job(h.pending_job()).await;

        assert_eq!(outcome, JobOutcome::Cancelled);
        let job = h.store.job(h.job_id).unwrap();
        assert_eq!(job.status, JobStatus::Cancelled);
        assert!(job.error.is_none());
        assert_eq!(h.store.stage_log(h.job_id), vec![JobStage::Fetch]);
        assert_eq!(h.indexer.calls(), 0);
    }

    #[tokio::test]
    async fn job_that_cannot_start_is_reported() {
        let h = Harness::new();
        let w = worker(&h);
        assert_eq!(w.process_job(h.pending_job()).await, JobOutcome::Completed);

        let outcome = w.process_job(h.pending_job()).await;
        assert!(matches!(outcome, JobOutcome::NotStarted(_)));
        assert_eq!(h.store.job(h.job_id).unwrap().status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn run_drains_notifications_until_closed() {
        let h = Harness::new();
        let second = h.add_job(2);
        let w = Arc::new(worker(&h));

        let (tx, rx) = mpsc::channel(4);
        tx.send(h.pending_job()).await.unwrap();
        tx.send(second).await.unwrap();
        drop(tx);

        w.clone().run(rx, Arc::new(Notify::new())).await;

        assert_eq!(h.store.job(h.job_id).unwrap().status, JobStatus::Completed);
        assert_eq!(h.store.job(2).unwrap().status, JobStatus::Completed);
        w.stop().await;
    }

    #[tokio::test]
    async fn run_returns_on_shutdown() {
        let h = Harness::new();
        let w = Arc::new(worker(&h));
        let (_tx, rx) = mpsc::channel::<Job>(1);
        let shutdown = Arc::new(Notify::new());

        let handle = tokio::spawn(w.clone().run(rx, shutdown.clone()));
        shutdown.notify_one();
        tokio::time::timeout(std::time::Duration::from_secs(5), handle)
            .await
            .expect("run should stop")
            .unwrap();
    }

    #[tokio::test]
    async fn shutdown_abandons_a_stuck_job_after_the_drain_timeout() {
        let h = Harness::new();
        let started = Arc::new(Notify::new());
        let signal = started.clone();
        h.source.on_tree(move || signal.notify_one());
        h.source.stall_tree(Duration::from_secs(3600));

        let w = Arc::new(worker(&h).with_drain_timeout(Duration::from_millis(100)));
        let (tx, rx) = mpsc::channel(1);
        tx.send(h.pending_job()).await.unwrap();
        let shutdown = Arc::new(Notify::new());

        let handle = tokio::spawn(w.clone().run(rx, shutdown.clone()));
        tokio::time::timeout(Duration::from_secs(5), started.notified())
            .await
            .expect("job should reach the fetch stage");
        shutdown.notify_one();

        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("run should give up on the stuck job")
            .unwrap();
        assert_eq!(h.store.job(h.job_id).unwrap().status, JobStatus::Running);
    }

    #[tokio::test]
    async fn tuning_resizes_job_pool() {
        let h = Harness::new();
        let w = worker(&h);
        let mut tuning = PipelineTuning::default();
        tuning.job_workers = 2;
        tuning.fetch.workers = 3;

        w.apply(&tuning).unwrap();
        assert_eq!(w.job_workers(), 2);
        assert_eq!(w.stage_pools.fetch.worker_count(), 3);

        tuning.job_workers = 500;
        assert!(w.apply(&tuning).is_err());
        assert_eq!(w.job_workers(), 2);
    }
}
