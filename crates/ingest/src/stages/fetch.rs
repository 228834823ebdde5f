use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use quarry_core::{Blob, Job, JobStage};

use crate::contracts::{BlobStore, Credentials, IngestionConfigStore, SourceClient, VersionStore};
use crate::error::{IngestError, ResultExt};
use crate::events::EventSink;
use crate::filter::FileFilter;
use crate::pool::WorkHandler;
use crate::runtime::{IngestDeps, StagePools};
use crate::stages::{begin, drain_all, finish, Stage};

/// One fetched file waiting to be stored.
pub struct FetchItem {
    pub user_id: i64,
    pub blob: Blob,
}

pub struct StoreBlob {
    blobs: Arc<dyn BlobStore>,
}

impl StoreBlob {
    pub fn new(blobs: Arc<dyn BlobStore>) -> Self {
        Self { blobs }
    }
}

#[async_trait]
impl WorkHandler<FetchItem> for StoreBlob {
    type Output = ();
    type Error = IngestError;

    async fn handle(&self, item: FetchItem) -> Result<(), IngestError> {
        self.blobs
            .put(item.user_id, &item.blob)
            .await
            .or_persistence(format!("store blob {}", item.blob.path))
    }
}

/// Lists the repository at the version's commit, filters it, downloads the
/// survivors and stores each as a blob.
pub struct FetchStage {
    credentials: Arc<dyn Credentials>,
    configs: Arc<dyn IngestionConfigStore>,
    versions: Arc<dyn VersionStore>,
    source: Arc<dyn SourceClient>,
    events: Arc<dyn EventSink>,
    pools: Arc<StagePools>,
}

impl FetchStage {
    pub fn new(deps: &IngestDeps, pools: Arc<StagePools>) -> Self {
        Self {
            credentials: deps.credentials.clone(),
            configs: deps.configs.clone(),
            versions: deps.versions.clone(),
            source: deps.source.clone(),
            events: deps.events.clone(),
            pools,
        }
    }
}

#[async_trait]
impl Stage for FetchStage {
    fn kind(&self) -> JobStage {
        JobStage::Fetch
    }

    async fn execute(&self, mut job: Job) -> Result<Job, IngestError> {
        begin(&mut job, JobStage::Fetch, &*self.events)?;

        let token = self
            .credentials
            .access_token(job.user_id)
            .await
            .or_dependency("resolve access token")?;
        let config = self
            .configs
            .get_by_repository(job.repository_id)
            .await
            .or_dependency("get ingestion config")?;
        let version = self
            .versions
            .get(job.version_id)
            .await
            .or_dependency("get version")?;

        let tree = self
            .source
            .get_tree(&token, &job.owner, &job.repo_name, &version.commit_sha)
            .await
            .or_dependency("list repository tree")?;

        let filter = FileFilter::from_config(&config).or_dependency("compile exclude patterns")?;
        let paths = filter.select(&tree);
        job.set_counts(paths.len(), 0);

        if paths.is_empty() {
            info!(job_id = job.id, entries = tree.len(), "no files to fetch");
            finish(&job, &*self.events);
            return Ok(job);
        }

        let files = self
            .source
            .get_file_content_batch(&token, &job.owner, &job.repo_name, &version.commit_sha, &paths)
            .await
            .or_dependency("fetch file contents")?;

        let language = config.language.as_str();
        let stored = drain_all(files.into_iter().map(|file| {
            let item = FetchItem {
                user_id: job.user_id,
                blob: Blob::new(file.path, file.content, language, &job.owner, &job.repo_name, &job.tag),
            };
            self.pools.fetch.process(item)
        }))
        .await?;

        job.set_counts(paths.len(), stored.len());
        info!(
            job_id = job.id,
            selected = paths.len(),
            stored = stored.len(),
            "fetch complete"
        );
        finish(&job, &*self.events);
        Ok(job)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contracts::{EntryKind, TreeEntry};
    use crate::error::StoreError;
    use crate::testing::Harness;

    fn entry(path: &str, size: u64) -> TreeEntry {
        TreeEntry {
            path: path.into(),
            kind: EntryKind::Blob,
            size,
        }
    }

    #[tokio::test]
    async fn stores_only_filtered_files() {
        let h = Harness::new();
        h.source.set_tree(vec![
            entry("main.go", 100),
            entry("README.md", 200),
            entry("vendor/lib.go", 50),
            entry("huge.go", 2 * 1024 * 1024),
        ]);

        let stage = FetchStage::new(&h.deps, h.pools());
        let job = stage.execute(h.job()).await.unwrap();

        assert_eq!(job.stage, JobStage::Fetch);
        assert_eq!((job.items_total, job.items_processed), (2, 2));
        assert_eq!(h.store.blob_count(), 2);
        assert_eq!(h.source.requested_paths(), vec!["main.go", "README.md"]);
    }

    #[tokio::test]
    async fn empty_selection_succeeds_without_download() {
        let h = Harness::new();
        h.source.set_tree(vec![entry("vendor/a.go", 10)]);

        let job = FetchStage::new(&h.deps, h.pools())
            .execute(h.job())
            .await
            .unwrap();

        assert_eq!((job.items_total, job.items_processed), (0, 0));
        assert!(h.source.requested_paths().is_empty());
    }

    #[tokio::test]
    async fn missing_token_is_a_dependency_error() {
        let h = Harness::without_token();

        let err = FetchStage::new(&h.deps, h.pools())
            .execute(h.job())
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::Dependency { .. }));
        assert!(err.to_string().starts_with("resolve access token"));
    }

    #[tokio::test]
    async fn blob_write_failure_fails_stage_after_all_files() {
        struct FailingBlobs {
            inner: Arc<crate::memory::MemoryStore>,
        }

        #[async_trait]
        impl BlobStore for FailingBlobs {
            async fn put(&self, user_id: i64, blob: &Blob) -> Result<(), StoreError> {
                if blob.path == "bad.go" {
                    return Err(StoreError::Backend("disk full".into()));
                }
                self.inner.put(user_id, blob).await
            }

            async fn get_by_path(
                &self,
                user_id: i64,
                owner: &str,
                repo: &str,
                tag: &str,
                path: &str,
            ) -> Result<Blob, StoreError> {
                self.inner.get_by_path(user_id, owner, repo, tag, path).await
            }
        }

        let mut h = Harness::new();
        h.deps.blobs = Arc::new(FailingBlobs { inner: h.store.clone() });
        h.source.set_tree(vec![entry("a.go", 1), entry("bad.go", 1), entry("c.go", 1)]);

        let err = FetchStage::new(&h.deps, h.pools())
            .execute(h.job())
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "store blob bad.go: store backend error: disk full");
        assert_eq!(h.store.blob_count(), 2, "other files still stored");
    }
}
