use std::path::PathBuf;
use thiserror::Error;

use crate::model::JobStatus;

#[derive(Error, Debug)]
pub enum ExamshelfError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Ingestion error: {0}")]
    Ingest(#[from] IngestError),

    #[error("Sweep error: {0}")]
    Sweep(#[from] SweepError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },
}

/// Errors surfaced synchronously by the orchestrator. Once a batch has
/// been accepted, item and job failures are persisted rather than
/// returned (the call is fire-and-forget after validation).
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("batch contains no items")]
    EmptyBatch,

    #[error("all items in the batch already exist for this context")]
    NoNewItems,

    #[error("job not found")]
    JobNotFound,

    #[error("job is already terminal (status: {status})")]
    AlreadyTerminal { status: JobStatus },

    #[error("job is still active (status: {status})")]
    StillActive { status: JobStatus },

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),
}

#[derive(Error, Debug)]
pub enum SweepError {
    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),
}

pub type Result<T> = std::result::Result<T, ExamshelfError>;
