use thiserror::Error;

use crate::models::{JobStage, JobStatus};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("invalid job status transition: {from} -> {to}")]
    InvalidTransition { from: JobStatus, to: JobStatus },

    #[error("job stage cannot move backwards: {from} -> {to}")]
    StageRegression { from: JobStage, to: JobStage },

    #[error("{entity} not found: {key}")]
    NotFound { entity: &'static str, key: String },

    #[error("Config error: {0}")]
    Config(String),
}
