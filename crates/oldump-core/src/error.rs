use crate::types::{RunDate, Stage};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DumpError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid run date '{0}': expected yyyy-mm-dd")]
    InvalidRunDate(String),

    #[error("unknown stage: {0}")]
    UnknownStage(String),

    #[error("stage '{stage}' failed for run {date}: {source}")]
    StageFailed {
        stage: Stage,
        date: RunDate,
        source: Box<DumpError>,
    },

    #[error("malformed record at line {line}: {reason}")]
    Malformed { line: u64, reason: String },

    #[error("too many malformed records: {count} exceeds limit of {limit}")]
    TooManyMalformed { count: u64, limit: u64 },

    #[error("input is not sorted by key: '{key}' follows '{previous}'")]
    Unsorted { previous: String, key: String },

    #[error("invalid split pattern '{0}': must contain exactly one %s")]
    InvalidPattern(String),

    #[error("type '{0}' cannot be used as a partition name")]
    InvalidType(String),

    #[error("types '{first}' and '{second}' both map to partition '{partition}'")]
    PartitionCollision {
        partition: String,
        first: String,
        second: String,
    },

    #[error("transfer error: {0}")]
    Transfer(String),

    #[error("archive upload failed for: {}", .0.join(", "))]
    ArchiveFailed(Vec<String>),

    #[error("extract failed: {0}")]
    Extract(String),

    #[error("sitemap generation failed: {0}")]
    Sitemap(String),

    #[error("pipe '{0}' terminated abnormally")]
    PipeBroken(String),

    #[error("run cancelled")]
    Cancelled,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl DumpError {
    /// Wrap an error with the stage and run date it aborted.
    pub fn in_stage(self, stage: Stage, date: RunDate) -> Self {
        DumpError::StageFailed {
            stage,
            date,
            source: Box::new(self),
        }
    }
}

pub type Result<T> = std::result::Result<T, DumpError>;
