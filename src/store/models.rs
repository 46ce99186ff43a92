// src/store/models.rs

//! Row types of the five relations and their SQL mappings.

use chrono::{DateTime, Utc};
use rusqlite::Row;
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, Type, ValueRef};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::lock::LockRecord;
use crate::types::{StageCommand, StageStatus, WorkerStatus};

pub(crate) const STAGE_COLUMNS: &str = "id, experiment_id, name, cmd, status, queue, \
     fingerprint, result, capture_stdout, capture_stderr, force_rerun, cache_eligible, \
     created_at, updated_at, started_at, finished_at";

pub(crate) const JOB_COLUMNS: &str =
    "id, stage_id, worker_id, stdout, stderr, started_at, finished_at";

pub(crate) const WORKER_COLUMNS: &str =
    "id, name, machine, cwd, pid, status, last_seen, started_at, finished_at";

pub(crate) const EXPERIMENT_COLUMNS: &str =
    "id, base, origin, machine, created_at, updated_at";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Experiment {
    pub id: i64,
    pub base: String,
    pub origin: String,
    pub machine: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Experiment {
    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id")?,
            base: row.get("base")?,
            origin: row.get("origin")?,
            machine: row.get("machine")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Stage {
    pub id: i64,
    pub experiment_id: i64,
    pub name: String,
    pub cmd: StageCommand,
    pub status: StageStatus,
    pub queue: String,
    /// Empty until the stage completes.
    pub fingerprint: String,
    /// Reported lock record.
    pub result: Option<LockRecord>,
    pub capture_stdout: bool,
    pub capture_stderr: bool,
    pub force: bool,
    /// Participates in the fingerprint cache.
    pub cache: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Stage {
    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let result: String = row.get("result")?;
        let result = if result.is_empty() {
            None
        } else {
            Some(decode_json(row, "result", &result)?)
        };
        let cmd: String = row.get("cmd")?;

        Ok(Self {
            id: row.get("id")?,
            experiment_id: row.get("experiment_id")?,
            name: row.get("name")?,
            cmd: decode_json(row, "cmd", &cmd)?,
            status: row.get("status")?,
            queue: row.get("queue")?,
            fingerprint: row.get("fingerprint")?,
            result,
            capture_stdout: row.get("capture_stdout")?,
            capture_stderr: row.get("capture_stderr")?,
            force: row.get("force_rerun")?,
            cache: row.get("cache_eligible")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
            started_at: row.get("started_at")?,
            finished_at: row.get("finished_at")?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct StageDependency {
    pub parent_id: i64,
    pub child_id: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Job {
    pub id: i64,
    pub stage_id: i64,
    pub worker_id: i64,
    pub stdout: String,
    pub stderr: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Job {
    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id")?,
            stage_id: row.get("stage_id")?,
            worker_id: row.get("worker_id")?,
            stdout: row.get("stdout")?,
            stderr: row.get("stderr")?,
            started_at: row.get("started_at")?,
            finished_at: row.get("finished_at")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Worker {
    pub id: i64,
    pub name: String,
    pub machine: String,
    pub cwd: String,
    pub pid: i64,
    pub status: WorkerStatus,
    pub last_seen: DateTime<Utc>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Worker {
    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id")?,
            name: row.get("name")?,
            machine: row.get("machine")?,
            cwd: row.get("cwd")?,
            pid: row.get("pid")?,
            status: row.get("status")?,
            last_seen: row.get("last_seen")?,
            started_at: row.get("started_at")?,
            finished_at: row.get("finished_at")?,
        })
    }
}

fn decode_json<T: DeserializeOwned>(row: &Row<'_>, column: &str, raw: &str) -> rusqlite::Result<T> {
    serde_json::from_str(raw).map_err(|e| {
        let idx = row.as_ref().column_index(column).unwrap_or_default();
        rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
    })
}

impl ToSql for StageStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for StageStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e: String| FromSqlError::Other(e.into()))
    }
}

impl ToSql for WorkerStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for WorkerStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e: String| FromSqlError::Other(e.into()))
    }
}
