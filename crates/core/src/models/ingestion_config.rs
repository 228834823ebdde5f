use serde::{Deserialize, Serialize};

/// Patterns excluded from every ingest, ahead of any repository-specific ones.
pub const DEFAULT_EXCLUDE_PATTERNS: &[&str] = &[
    ".git/**",
    ".github/**",
    ".vscode/**",
    ".idea/**",
    "vendor/**",
    "node_modules/**",
    "dist/**",
    "build/**",
    "*.min.js",
    "*.min.css",
    "*.map",
    "*.lock",
    "package-lock.json",
    "yarn.lock",
    "go.sum",
];

/// 1 MiB.
pub const DEFAULT_MAX_FILE_SIZE: u64 = 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Go,
    TypeScript,
}

impl Language {
    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Go => "go",
            Language::TypeScript => "typescript",
        }
    }

    /// Lowercase source extensions (with leading dot) ingested for this language.
    pub fn extensions(&self) -> &'static [&'static str] {
        match self {
            Language::Go => &[".go"],
            Language::TypeScript => &[".ts", ".tsx", ".js", ".jsx"],
        }
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-repository ingestion settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestionConfig {
    pub repository_id: i64,
    pub user_id: i64,
    pub language: Language,
    pub include_docs: bool,
    /// Repository-specific patterns, applied after [`DEFAULT_EXCLUDE_PATTERNS`].
    #[serde(default)]
    pub exclude_patterns: Vec<String>,
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,
    /// Raw language-specific settings; see [`GoConfig`] and [`TypeScriptConfig`].
    #[serde(default)]
    pub language_config: Option<serde_json::Value>,
}

fn default_max_file_size() -> u64 {
    DEFAULT_MAX_FILE_SIZE
}

impl IngestionConfig {
    pub fn new(repository_id: i64, user_id: i64, language: Language) -> Self {
        Self {
            repository_id,
            user_id,
            language,
            include_docs: true,
            exclude_patterns: Vec::new(),
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            language_config: None,
        }
    }

    /// Default patterns followed by the custom ones.
    pub fn all_exclude_patterns(&self) -> Vec<String> {
        DEFAULT_EXCLUDE_PATTERNS
            .iter()
            .map(|p| p.to_string())
            .chain(self.exclude_patterns.iter().cloned())
            .collect()
    }

    /// Go settings, when the repository is Go and the JSON parses.
    pub fn go_config(&self) -> Option<GoConfig> {
        if self.language != Language::Go {
            return None;
        }
        self.language_config
            .as_ref()
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    pub fn typescript_config(&self) -> Option<TypeScriptConfig> {
        if self.language != Language::TypeScript {
            return None;
        }
        self.language_config
            .as_ref()
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GoConfig {
    #[serde(default)]
    pub module_path: Option<String>,
    #[serde(default)]
    pub build_tags: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TypeScriptConfig {
    #[serde(default)]
    pub tsconfig_path: Option<String>,
    #[serde(default)]
    pub include_tests: bool,
}
