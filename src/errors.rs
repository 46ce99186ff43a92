// src/errors.rs

//! Crate-wide error aliases and helpers.

use thiserror::Error;

use crate::lock::LockError;
use crate::types::StageStatus;

#[derive(Error, Debug)]
pub enum StagehandError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Stage not found: {0}")]
    StageNotFound(String),

    #[error("Job not found: {0}")]
    JobNotFound(i64),

    #[error("Worker not found: {0}")]
    WorkerNotFound(i64),

    #[error("Job {0} has already been reported")]
    JobAlreadyFinished(i64),

    #[error("Invalid job report: {0}")]
    InvalidReport(String),

    #[error("Stage '{stage}' is {status}, not running")]
    StageNotRunning { stage: String, status: StageStatus },

    #[error("Cycle detected in DAG: {0}")]
    DagCycle(String),

    #[error("Store is busy: {0}")]
    Busy(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] rusqlite_migration::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error("Build tool is busy: {0}")]
    ToolBusy(String),

    #[error("Build tool error: {0}")]
    Tool(String),

    #[error("{op} failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        op: String,
        attempts: usize,
        #[source]
        source: Box<StagehandError>,
    },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl StagehandError {
    /// The job was closed elsewhere (forced reset, stale-worker reclaim), so
    /// the store refused its report.
    pub fn is_superseded(&self) -> bool {
        matches!(
            self,
            StagehandError::JobAlreadyFinished(_) | StagehandError::StageNotRunning { .. }
        )
    }

    /// Contention errors that are worth retrying with backoff.
    pub fn is_transient(&self) -> bool {
        match self {
            StagehandError::Busy(_) | StagehandError::ToolBusy(_) => true,
            StagehandError::Database(err) => matches!(
                err.sqlite_error_code(),
                Some(rusqlite::ErrorCode::DatabaseBusy) | Some(rusqlite::ErrorCode::DatabaseLocked)
            ),
            _ => false,
        }
    }
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, StagehandError>;
