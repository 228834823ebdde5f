use std::env;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::models::Language;

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read a profiled env var: tries {PROFILE}_{KEY} first, falls back to {KEY}.
fn profiled_env_opt(profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = env_opt(&prefixed) {
            return Some(v);
        }
    }
    env_opt(key)
}

fn profiled_env_or(profile: &str, key: &str, default: &str) -> String {
    profiled_env_opt(profile, key).unwrap_or_else(|| default.to_string())
}

fn profiled_env_num<T: FromStr>(profile: &str, key: &str, default: T) -> T {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn profiled_env_secs(profile: &str, key: &str, default: Duration) -> Duration {
    Duration::from_secs(profiled_env_num(profile, key, default.as_secs()))
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Active profile name (empty = default).
    pub profile: String,
    pub ingest: PipelineTuning,
    pub embedding: EmbeddingConfig,
    pub github: GitHubConfig,
    pub indexer: IndexerConfig,
    pub chunker: ChunkerConfig,
}

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `QUARRY_PROFILE`. When set (e.g. `PROD`), every
    /// key is first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn from_env() -> Self {
        let profile = env_or("QUARRY_PROFILE", "").to_uppercase();
        Self::for_profile(&profile)
    }

    /// Build config for a specific named profile (empty string = default).
    pub fn for_profile(profile: &str) -> Self {
        let p = profile.to_uppercase();
        let p = p.as_str();
        Self {
            profile: p.to_string(),
            ingest: PipelineTuning::from_env_profiled(p),
            embedding: EmbeddingConfig::from_env_profiled(p),
            github: GitHubConfig::from_env_profiled(p),
            indexer: IndexerConfig::from_env_profiled(p),
            chunker: ChunkerConfig::from_env_profiled(p),
        }
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    /// Print a redacted summary for startup logs.
    pub fn log_summary(&self) {
        let t = &self.ingest;
        tracing::info!("Config loaded (profile: {}):", self.profile_label());
        tracing::info!("  jobs:        workers={}", t.job_workers);
        tracing::info!("  fetch pool:  workers={}, timeout={:?}", t.fetch.workers, t.fetch.timeout);
        tracing::info!("  parse pool:  workers={}, timeout={:?}", t.parse.workers, t.parse.timeout);
        tracing::info!("  chunk pool:  workers={}, timeout={:?}", t.chunk.workers, t.chunk.timeout);
        tracing::info!(
            "  embed pool:  workers={}, timeout={:?}, batch_size={}",
            t.embed.workers, t.embed.timeout, t.embed.batch_size
        );
        tracing::info!("  embedding:   provider={}, dimensions={}", self.embedding.provider, self.embedding.dimensions);
        tracing::info!("  github:      api_url={}, token={}", self.github.api_url, if self.github.token.is_some() { "set" } else { "(none)" });
        tracing::info!("  indexer:     languages={:?}", self.indexer.endpoints().iter().map(|(l, _)| l.as_str()).collect::<Vec<_>>());
        tracing::info!("  chunker:     max_tokens={}, languages={:?}", self.chunker.max_chunk_tokens, self.chunker.code_languages);
    }

    /// Return a redacted view safe for logs and status output (no secrets).
    pub fn redacted_summary(&self) -> serde_json::Value {
        serde_json::json!({
            "profile": self.profile_label(),
            "ingest": self.ingest,
            "embedding": {
                "provider": self.embedding.provider,
                "model": self.embedding.model,
                "dimensions": self.embedding.dimensions,
                "configured": self.embedding.is_configured(),
            },
            "github": {
                "api_url": self.github.api_url,
                "token_set": self.github.token.is_some(),
            },
            "indexer": {
                "go_url": self.indexer.go_url,
                "typescript_url": self.indexer.typescript_url,
            },
            "chunker": self.chunker,
        })
    }
}

// ── Pipeline tuning ───────────────────────────────────────────

pub const MAX_POOL_WORKERS: usize = 100;
pub const MAX_EMBED_BATCH_SIZE: usize = 1000;
pub const MAX_STAGE_POOL_TIMEOUT: Duration = Duration::from_secs(10 * 60);
pub const MAX_PARSE_POOL_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Worker count and per-item timeout for one stage pool.
///
/// Zero values mean "leave the running pool as it is" when applied live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagePoolConfig {
    pub workers: usize,
    pub timeout: Duration,
}

impl StagePoolConfig {
    pub const fn new(workers: usize, timeout: Duration) -> Self {
        Self { workers, timeout }
    }

    fn validate(&self, stage: &str, max_timeout: Duration) -> Result<(), CoreError> {
        if self.workers > MAX_POOL_WORKERS {
            return Err(CoreError::Config(format!(
                "{stage} workers must be at most {MAX_POOL_WORKERS}, got {}",
                self.workers
            )));
        }
        if self.timeout > max_timeout {
            return Err(CoreError::Config(format!(
                "{stage} timeout must be at most {max_timeout:?}, got {:?}",
                self.timeout
            )));
        }
        Ok(())
    }

    fn from_env_profiled(p: &str, prefix: &str, default: StagePoolConfig) -> Self {
        Self {
            workers: profiled_env_num(p, &format!("{prefix}_WORKERS"), default.workers),
            timeout: profiled_env_secs(p, &format!("{prefix}_TIMEOUT_SECS"), default.timeout),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbedPoolConfig {
    pub workers: usize,
    pub timeout: Duration,
    pub batch_size: usize,
}

impl EmbedPoolConfig {
    pub fn pool(&self) -> StagePoolConfig {
        StagePoolConfig::new(self.workers, self.timeout)
    }
}

/// Live-tunable concurrency settings for the whole pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineTuning {
    /// Jobs that may run their full pipeline at the same time.
    pub job_workers: usize,
    pub fetch: StagePoolConfig,
    pub parse: StagePoolConfig,
    pub chunk: StagePoolConfig,
    pub embed: EmbedPoolConfig,
}

impl Default for PipelineTuning {
    fn default() -> Self {
        Self {
            job_workers: 4,
            fetch: StagePoolConfig::new(8, Duration::from_secs(30)),
            parse: StagePoolConfig::new(8, Duration::from_secs(60)),
            chunk: StagePoolConfig::new(8, Duration::from_secs(30)),
            embed: EmbedPoolConfig {
                workers: 4,
                timeout: Duration::from_secs(30),
                batch_size: 128,
            },
        }
    }
}

impl PipelineTuning {
    fn from_env_profiled(p: &str) -> Self {
        let d = Self::default();
        Self {
            job_workers: profiled_env_num(p, "INGEST_JOB_WORKERS", d.job_workers),
            fetch: StagePoolConfig::from_env_profiled(p, "FETCH", d.fetch),
            parse: StagePoolConfig::from_env_profiled(p, "PARSE", d.parse),
            chunk: StagePoolConfig::from_env_profiled(p, "CHUNK", d.chunk),
            embed: EmbedPoolConfig {
                workers: profiled_env_num(p, "EMBED_WORKERS", d.embed.workers),
                timeout: profiled_env_secs(p, "EMBED_TIMEOUT_SECS", d.embed.timeout),
                batch_size: profiled_env_num(p, "EMBED_BATCH_SIZE", d.embed.batch_size),
            },
        }
    }

    /// Check every value against its allowed range.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.job_workers > MAX_POOL_WORKERS {
            return Err(CoreError::Config(format!(
                "job workers must be at most {MAX_POOL_WORKERS}, got {}",
                self.job_workers
            )));
        }
        self.fetch.validate("fetch", MAX_STAGE_POOL_TIMEOUT)?;
        self.parse.validate("parse", MAX_PARSE_POOL_TIMEOUT)?;
        self.chunk.validate("chunk", MAX_STAGE_POOL_TIMEOUT)?;
        self.embed.pool().validate("embed", MAX_STAGE_POOL_TIMEOUT)?;
        if self.embed.batch_size > MAX_EMBED_BATCH_SIZE {
            return Err(CoreError::Config(format!(
                "embed batch size must be at most {MAX_EMBED_BATCH_SIZE}, got {}",
                self.embed.batch_size
            )));
        }
        Ok(())
    }
}

// ── Embedding ─────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// "stub", "ollama", "openai"
    pub provider: String,
    pub model: String,
    pub dimensions: u32,
    pub ollama_url: String,
    pub openai_api_key: Option<String>,
    pub openai_base_url: Option<String>,
}

impl EmbeddingConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            provider: profiled_env_or(p, "EMBEDDING_PROVIDER", "stub"),
            model: profiled_env_or(p, "EMBEDDING_MODEL", "nomic-embed-text"),
            dimensions: profiled_env_num(p, "EMBEDDING_DIMENSIONS", 768),
            ollama_url: profiled_env_or(p, "OLLAMA_URL", "http://localhost:11434"),
            openai_api_key: profiled_env_opt(p, "OPENAI_API_KEY"),
            openai_base_url: profiled_env_opt(p, "OPENAI_BASE_URL"),
        }
    }

    pub fn is_configured(&self) -> bool {
        match self.provider.as_str() {
            "openai" => self.openai_api_key.is_some(),
            "ollama" | "stub" => true,
            _ => false,
        }
    }
}

// ── GitHub ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubConfig {
    pub api_url: String,
    /// Fallback access token when no per-user credential is stored.
    pub token: Option<String>,
    /// Concurrent content downloads per batch.
    pub fetch_concurrency: usize,
}

impl GitHubConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            api_url: profiled_env_or(p, "GITHUB_API_URL", "https://api.github.com"),
            token: profiled_env_opt(p, "GITHUB_TOKEN"),
            fetch_concurrency: profiled_env_num(p, "GITHUB_FETCH_CONCURRENCY", 8),
        }
    }
}

// ── Structural indexer ────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexerConfig {
    pub go_url: Option<String>,
    pub typescript_url: Option<String>,
    pub timeout: Duration,
}

impl IndexerConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            go_url: profiled_env_opt(p, "INDEXER_GO_URL"),
            typescript_url: profiled_env_opt(p, "INDEXER_TYPESCRIPT_URL"),
            timeout: profiled_env_secs(p, "INDEXER_TIMEOUT_SECS", Duration::from_secs(600)),
        }
    }

    /// Languages with a configured indexing service.
    pub fn endpoints(&self) -> Vec<(Language, String)> {
        [
            (Language::Go, &self.go_url),
            (Language::TypeScript, &self.typescript_url),
        ]
        .into_iter()
        .filter_map(|(lang, url)| url.clone().map(|u| (lang, u)))
        .collect()
    }
}

// ── Chunker ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkerConfig {
    pub max_chunk_tokens: usize,
    pub min_chunk_tokens: usize,
    /// Code languages chunked by blank-line blocks (markdown is always supported).
    pub code_languages: Vec<String>,
}

impl ChunkerConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            max_chunk_tokens: profiled_env_num(p, "CHUNK_MAX_TOKENS", 500),
            min_chunk_tokens: profiled_env_num(p, "CHUNK_MIN_TOKENS", 50),
            code_languages: profiled_env_or(p, "CHUNK_LANGUAGES", "go,typescript")
                .split(',')
                .map(|s| s.trim().to_lowercase())
                .filter(|s| !s.is_empty())
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redacted_summary_hides_secrets() {
        let mut config = Config::for_profile("");
        config.profile = "STAGING".into();
        config.github.token = Some("ghp_very_secret".into());
        config.embedding.openai_api_key = Some("sk-very-secret".into());

        let summary = config.redacted_summary();
        let text = summary.to_string();
        assert!(!text.contains("ghp_very_secret"), "{text}");
        assert!(!text.contains("sk-very-secret"), "{text}");
        assert_eq!(summary["profile"], "STAGING");
        assert_eq!(summary["github"]["token_set"], true);
        assert_eq!(summary["ingest"]["job_workers"], config.ingest.job_workers);
    }

    #[test]
    fn default_tuning_is_valid() {
        let t = PipelineTuning::default();
        assert!(t.validate().is_ok());
        assert_eq!(t.job_workers, 4);
        assert_eq!(t.embed.batch_size, 128);
        assert_eq!(t.parse.timeout, Duration::from_secs(60));
    }

    #[test]
    fn too_many_workers_rejected() {
        let mut t = PipelineTuning::default();
        t.chunk.workers = 101;
        let err = t.validate().unwrap_err();
        assert!(err.to_string().contains("chunk workers"), "{err}");
    }

    #[test]
    fn parse_allows_longer_timeout_than_other_stages() {
        let mut t = PipelineTuning::default();
        t.parse.timeout = Duration::from_secs(20 * 60);
        assert!(t.validate().is_ok());

        t.fetch.timeout = Duration::from_secs(20 * 60);
        assert!(t.validate().is_err());
    }

    #[test]
    fn oversized_batch_rejected() {
        let mut t = PipelineTuning::default();
        t.embed.batch_size = 1001;
        assert!(t.validate().is_err());
    }

    #[test]
    fn indexer_endpoints_skip_unset_languages() {
        let cfg = IndexerConfig {
            go_url: Some("http://indexer-go:8080".into()),
            typescript_url: None,
            timeout: Duration::from_secs(1),
        };
        let eps = cfg.endpoints();
        assert_eq!(eps.len(), 1);
        assert_eq!(eps[0].0, Language::Go);
    }
}
