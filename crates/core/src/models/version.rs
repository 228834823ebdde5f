use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VersionStatus {
    Pending,
    Ingesting,
    Ready,
    Failed,
}

impl std::fmt::Display for VersionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VersionStatus::Pending => write!(f, "pending"),
            VersionStatus::Ingesting => write!(f, "ingesting"),
            VersionStatus::Ready => write!(f, "ready"),
            VersionStatus::Failed => write!(f, "failed"),
        }
    }
}

/// A tagged snapshot of a repository, pinned to a commit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Version {
    pub id: i64,
    pub repository_id: i64,
    pub user_id: i64,
    pub owner: String,
    pub repo_name: String,
    pub tag: String,
    pub commit_sha: String,
    pub status: VersionStatus,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
