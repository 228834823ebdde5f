pub mod blob;
pub mod chunk;
pub mod document;
pub mod ingestion_config;
pub mod job;
pub mod symbol;
pub mod version;

pub use blob::Blob;
pub use chunk::{Chunk, ChunkKind};
pub use document::{ContentType, Document, DOCS_LANGUAGE, DOC_EXTENSIONS};
pub use ingestion_config::{
    GoConfig, IngestionConfig, Language, TypeScriptConfig, DEFAULT_EXCLUDE_PATTERNS,
    DEFAULT_MAX_FILE_SIZE,
};
pub use job::{Job, JobId, JobStage, JobStatus};
pub use symbol::{OccurrenceRecord, RecordScope, RelationshipRecord, SymbolRecord};
pub use version::{Version, VersionStatus};
