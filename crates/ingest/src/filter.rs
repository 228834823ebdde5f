//! Which repository files get ingested.

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};

use quarry_core::models::document::{extension_of, DOC_EXTENSIONS};
use quarry_core::IngestionConfig;

use crate::contracts::{EntryKind, TreeEntry};

/// `*` and `?` stay within one path segment; only `**` crosses directories.
fn build_globset(patterns: &[String]) -> Result<GlobSet, globset::Error> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(GlobBuilder::new(pattern).literal_separator(true).build()?);
    }
    builder.build()
}

/// Keeps plain files that are small enough, not excluded, and of an
/// ingestible type for the repository's language.
#[derive(Debug, Clone)]
pub struct FileFilter {
    excludes: GlobSet,
    extensions: &'static [&'static str],
    include_docs: bool,
    max_file_size: u64,
}

impl FileFilter {
    pub fn from_config(config: &IngestionConfig) -> Result<Self, globset::Error> {
        Ok(Self {
            excludes: build_globset(&config.all_exclude_patterns())?,
            extensions: config.language.extensions(),
            include_docs: config.include_docs,
            max_file_size: config.max_file_size,
        })
    }

    /// A pattern excludes a path when it matches the full path or the base name.
    pub fn is_excluded(&self, path: &str) -> bool {
        let base = path.rsplit('/').next().unwrap_or(path);
        self.excludes.is_match(path) || self.excludes.is_match(base)
    }

    fn has_ingestible_extension(&self, path: &str) -> bool {
        let Some(ext) = extension_of(path) else {
            return false;
        };
        self.extensions.contains(&ext.as_str())
            || (self.include_docs && DOC_EXTENSIONS.contains(&ext.as_str()))
    }

    pub fn accepts(&self, entry: &TreeEntry) -> bool {
        entry.kind == EntryKind::Blob
            && entry.size <= self.max_file_size
            && !self.is_excluded(&entry.path)
            && self.has_ingestible_extension(&entry.path)
    }

    /// Paths of the accepted entries, in tree order.
    pub fn select(&self, entries: &[TreeEntry]) -> Vec<String> {
        entries
            .iter()
            .filter(|e| self.accepts(e))
            .map(|e| e.path.clone())
            .collect()
    }
}
