use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use reqwest::header::{ACCEPT, USER_AGENT};
use reqwest::{Client, RequestBuilder, Url};
use serde::Deserialize;
use tracing::{debug, warn};

use quarry_core::config::GitHubConfig;

use crate::contracts::{FileContent, SourceClient, TreeEntry};
use crate::error::ClientError;
use crate::http::{check_status, USER_AGENT as AGENT};

const API_VERSION: &str = "2022-11-28";

/// GitHub REST client: recursive git trees plus raw file contents.
pub struct GitHubClient {
    client: Client,
    api_url: Url,
    concurrency: usize,
}

#[derive(Deserialize)]
struct TreeResponse {
    tree: Vec<TreeEntry>,
    #[serde(default)]
    truncated: bool,
}

impl GitHubClient {
    pub fn new(api_url: &str, concurrency: usize) -> Result<Self, ClientError> {
        let api_url = Url::parse(api_url).map_err(|e| ClientError::Api(format!("invalid GitHub API url {api_url}: {e}")))?;
        Ok(Self {
            client: Client::new(),
            api_url,
            concurrency: concurrency.max(1),
        })
    }

    pub fn from_config(config: &GitHubConfig) -> Result<Self, ClientError> {
        Self::new(&config.api_url, config.fetch_concurrency)
    }

    /// `{api}/repos/{owner}/{repo}/{tail…}` with every segment escaped.
    fn repo_url<'a>(&self, owner: &str, repo: &str, tail: impl IntoIterator<Item = &'a str>) -> Result<Url, ClientError> {
        let mut url = self.api_url.clone();
        url.path_segments_mut()
            .map_err(|_| ClientError::Api(format!("GitHub API url {} cannot be a base", self.api_url)))?
            .pop_if_empty()
            .extend(["repos", owner, repo])
            .extend(tail);
        Ok(url)
    }

    fn tree_url(&self, owner: &str, repo: &str, reference: &str) -> Result<Url, ClientError> {
        let mut url = self.repo_url(owner, repo, ["git", "trees", reference])?;
        url.query_pairs_mut().append_pair("recursive", "1");
        Ok(url)
    }

    fn content_url(&self, owner: &str, repo: &str, reference: &str, path: &str) -> Result<Url, ClientError> {
        let mut url = self.repo_url(owner, repo, std::iter::once("contents").chain(path.split('/')))?;
        url.query_pairs_mut().append_pair("ref", reference);
        Ok(url)
    }

    fn get(&self, url: Url, token: &str) -> RequestBuilder {
        let request = self
            .client
            .get(url)
            .header(USER_AGENT, AGENT)
            .header("X-GitHub-Api-Version", API_VERSION);
        if token.is_empty() {
            request
        } else {
            request.bearer_auth(token)
        }
    }

    async fn fetch_raw(&self, token: &str, owner: &str, repo: &str, reference: &str, path: &str) -> Result<Vec<u8>, ClientError> {
        let url = self.content_url(owner, repo, reference, path)?;
        let response = self
            .get(url, token)
            .header(ACCEPT, "application/vnd.github.raw")
            .send()
            .await?;
        Ok(check_status(response).await?.bytes().await?.to_vec())
    }

    /// One file of a batch; `None` when it could not be read.
    async fn fetch_file(
        &self,
        token: &str,
        owner: &str,
        repo: &str,
        reference: &str,
        path: &str,
    ) -> Option<FileContent> {
        match self.fetch_raw(token, owner, repo, reference, path).await {
            Ok(content) => Some(FileContent {
                path: path.to_string(),
                content,
            }),
            Err(e) => {
                warn!(owner, repo, path, error = %e, "skipping unreadable file");
                None
            }
        }
    }
}

#[async_trait]
impl SourceClient for GitHubClient {
    async fn get_tree(
        &self,
        token: &str,
        owner: &str,
        repo: &str,
        reference: &str,
    ) -> Result<Vec<TreeEntry>, ClientError> {
        let url = self.tree_url(owner, repo, reference)?;
        let response = self
            .get(url, token)
            .header(ACCEPT, "application/vnd.github+json")
            .send()
            .await?;
        let parsed: TreeResponse = check_status(response).await?.json().await?;
        if parsed.truncated {
            warn!(owner, repo, reference, entries = parsed.tree.len(), "tree listing truncated by GitHub");
        }
        debug!(owner, repo, reference, entries = parsed.tree.len(), "listed tree");
        Ok(parsed.tree)
    }

    async fn get_file_content_batch(
        &self,
        token: &str,
        owner: &str,
        repo: &str,
        reference: &str,
        paths: &[String],
    ) -> Result<Vec<FileContent>, ClientError> {
        let fetches: Vec<_> = paths
            .iter()
            .map(|path| self.fetch_file(token, owner, repo, reference, path))
            .collect();
        let files: Vec<FileContent> = stream::iter(fetches)
            .buffer_unordered(self.concurrency)
            .filter_map(|file| async move { file })
            .collect()
            .await;

        debug!(owner, repo, requested = paths.len(), fetched = files.len(), "fetched file contents");
        Ok(files)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tree_url_is_recursive() {
        let client = GitHubClient::new("https://api.github.com", 4).unwrap();
        let url = client.tree_url("acme", "widgets", "abc123").unwrap();
        assert_eq!(
            url.as_str(),
            "https://api.github.com/repos/acme/widgets/git/trees/abc123?recursive=1"
        );
    }

    #[test]
    fn content_url_escapes_segments_and_keeps_base_path() {
        let client = GitHubClient::new("https://ghe.example.com/api/v3/", 4).unwrap();
        let url = client
            .content_url("acme", "widgets", "v1.0.0", "docs/getting started.md")
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://ghe.example.com/api/v3/repos/acme/widgets/contents/docs/getting%20started.md?ref=v1.0.0"
        );
    }

    #[test]
    fn tree_response_parses_entry_kinds() {
        let body = r#"{"sha":"x","tree":[
            {"path":"main.go","type":"blob","size":12,"mode":"100644"},
            {"path":"pkg","type":"tree","mode":"040000"}
        ],"truncated":false}"#;
        let parsed: TreeResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.tree.len(), 2);
        assert_eq!(parsed.tree[1].size, 0);
        assert_eq!(parsed.tree[1].kind, crate::contracts::EntryKind::Tree);
    }

    #[tokio::test]
    async fn unreachable_files_are_skipped_from_a_spawned_task() {
        let client = std::sync::Arc::new(GitHubClient::new("http://127.0.0.1:1", 2).unwrap());
        let paths = vec!["main.go".to_string(), "pkg/util.go".to_string(), "README.md".to_string()];
        let files = tokio::spawn(async move {
            client
                .get_file_content_batch("", "acme", "widgets", "v1.0.0", &paths)
                .await
        })
        .await
        .unwrap()
        .unwrap();
        assert!(files.is_empty());
    }

    #[test]
    fn rejects_unparseable_api_url() {
        assert!(GitHubClient::new("not a url", 1).is_err());
    }
}
