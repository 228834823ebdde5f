//! ingest-worker — runs ingestion jobs fed as JSON lines on stdin.
//!
//! Each line describes one tagged repository version:
//!
//! ```json
//! {"job_id":1,"version_id":20,"repository_id":10,"user_id":7,"owner":"acme",
//!  "repo_name":"widgets","tag":"v1.0.0","commit_sha":"abc123","language":"go"}
//! ```
//!
//! Optional keys: `access_token` (per-user GitHub token) and `config`
//! (a full ingestion config overriding the language default).
//!
//! Stores are in-process; results are reported through structured logs.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use clap::Parser;
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, watch, Notify};
use tracing::{debug, error, info, warn};

use quarry_core::config::{load_dotenv, Config};
use quarry_core::{IngestionConfig, Job, JobId, Language, Version, VersionStatus};
use quarry_ingest::embedding;
use quarry_ingest::{
    spawn_tuning_listener, ConfigSink, GitHubClient, HttpIndexer, IngestDeps, IngestRuntime,
    IngestionWorker, MemoryStore, TextChunker, TracingSink,
};

// ── CLI ─────────────────────────────────────────────────────────────

/// Repository ingestion worker: fetch, parse, chunk, embed, store.
#[derive(Parser, Debug)]
#[command(name = "ingest-worker", version, about)]
struct Cli {
    /// Jobs allowed to run at once (overrides the profile setting).
    #[arg(long, env = "INGEST_JOB_WORKERS")]
    job_workers: Option<usize>,

    /// Seconds to wait for running jobs, then for the pools, after a shutdown signal.
    #[arg(long, env = "INGEST_SHUTDOWN_TIMEOUT", default_value_t = 10)]
    shutdown_timeout: u64,
}

// ── Job feed ────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct JobRequest {
    job_id: JobId,
    version_id: i64,
    repository_id: i64,
    user_id: i64,
    owner: String,
    repo_name: String,
    tag: String,
    commit_sha: String,
    language: Language,
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    config: Option<IngestionConfig>,
}

impl JobRequest {
    /// Seed the store with the version, config and token this job reads,
    /// then insert the pending job.
    fn register(self, store: &MemoryStore) -> anyhow::Result<Job> {
        let now = Utc::now();
        store.insert_version(Version {
            id: self.version_id,
            repository_id: self.repository_id,
            user_id: self.user_id,
            owner: self.owner.clone(),
            repo_name: self.repo_name.clone(),
            tag: self.tag.clone(),
            commit_sha: self.commit_sha,
            status: VersionStatus::Pending,
            error: None,
            created_at: now,
            updated_at: now,
        })?;

        let config = self
            .config
            .unwrap_or_else(|| IngestionConfig::new(self.repository_id, self.user_id, self.language));
        store.insert_config(config)?;

        if let Some(token) = self.access_token {
            store.set_token(self.user_id, token)?;
        }

        let job = Job::pending(
            self.job_id,
            self.version_id,
            self.repository_id,
            self.user_id,
            self.owner,
            self.repo_name,
            self.tag,
        );
        store.insert_job(job.clone())?;
        Ok(job)
    }
}

/// Read job requests from stdin until EOF. Malformed lines are skipped.
async fn feed_stdin(store: Arc<MemoryStore>, jobs: mpsc::Sender<Job>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                error!(error = %e, "failed to read stdin");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let job = serde_json::from_str::<JobRequest>(&line)
            .context("parse job request")
            .and_then(|request| request.register(&store));
        match job {
            Ok(job) => {
                info!(job_id = job.id, owner = %job.owner, repo = %job.repo_name, tag = %job.tag, "job queued");
                if jobs.send(job).await.is_err() {
                    break;
                }
            }
            Err(e) => warn!(error = %format!("{e:#}"), "skipping job request"),
        }
    }
    info!("job feed closed");
}

// ── Signals ─────────────────────────────────────────────────────────

/// Wait for SIGINT or SIGTERM (Ctrl-C elsewhere).
async fn os_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match (signal(SignalKind::interrupt()), signal(SignalKind::terminate())) {
            (Ok(mut sigint), Ok(mut sigterm)) => {
                tokio::select! {
                    _ = sigint.recv() => info!("received SIGINT"),
                    _ = sigterm.recv() => info!("received SIGTERM"),
                }
                return;
            }
            _ => warn!("failed to install unix signal handlers, falling back to ctrl-c"),
        }
    }
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for ctrl-c");
    }
}

// ── main ────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    load_dotenv();
    let mut config = Config::from_env();
    if let Some(workers) = cli.job_workers {
        config.ingest.job_workers = workers;
    }
    config.ingest.validate().context("invalid pipeline tuning")?;
    config.log_summary();
    debug!(config = %config.redacted_summary(), "effective config");

    // Collaborators
    let store = Arc::new(MemoryStore::new());
    store.set_default_token(config.github.token.clone())?;
    let source = Arc::new(GitHubClient::from_config(&config.github)?);
    let indexer = Arc::new(HttpIndexer::from_config(&config.indexer)?);
    let chunker = Arc::new(TextChunker::from_config(&config.chunker));
    let embedder = embedding::from_config(&config.embedding)?;

    let deps = IngestDeps::in_memory(
        store.clone(),
        source,
        indexer,
        chunker,
        embedder,
        Arc::new(TracingSink),
    );
    let runtime = IngestRuntime::new(deps, &config.ingest);
    let timeout = Duration::from_secs(cli.shutdown_timeout);
    let worker = Arc::new(IngestionWorker::new(&runtime, config.ingest.job_workers).with_drain_timeout(timeout));

    // Live tuning. Dropping the sender ends the listener.
    let (tuning_tx, tuning_rx) = watch::channel(config.ingest);
    let tuning_listener = spawn_tuning_listener(worker.clone() as Arc<dyn ConfigSink>, tuning_rx);

    let (job_tx, job_rx) = mpsc::channel::<Job>(64);
    let feed = tokio::spawn(feed_stdin(store.clone(), job_tx));

    let shutdown = Arc::new(Notify::new());
    let mut run = tokio::spawn(worker.clone().run(job_rx, shutdown.clone()));

    tokio::select! {
        _ = os_signal() => {
            info!("shutdown signal received");
            shutdown.notify_one();
            if let Err(e) = (&mut run).await {
                error!(error = %e, "worker loop aborted");
            }
        }
        joined = &mut run => {
            if let Err(e) = joined {
                error!(error = %e, "worker loop aborted");
            }
        }
    }

    feed.abort();
    drop(tuning_tx);

    if tokio::time::timeout(timeout, worker.stop()).await.is_err() {
        warn!(?timeout, "pools did not drain before the shutdown timeout");
    }
    if let Err(e) = tuning_listener.await {
        warn!(error = %e, "tuning listener aborted");
    }

    info!("ingest worker exited");
    Ok(())
}
