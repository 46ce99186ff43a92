// src/store/claim.rs

//! Claim protocol: the only way a stage becomes `running`.

use chrono::Utc;
use rusqlite::types::Value as SqlValue;
use rusqlite::{OptionalExtension, Transaction, TransactionBehavior, params, params_from_iter};
use tracing::{debug, info, warn};

use crate::errors::{Result, StagehandError};
use crate::lock::{LockRecord, fingerprint};
use crate::store::Store;
use crate::store::models::{JOB_COLUMNS, Job, STAGE_COLUMNS, Stage};
use crate::types::StageStatus;

/// What a worker is willing to pick up.
#[derive(Debug, Clone, Default)]
pub struct ClaimRequest {
    pub worker_id: i64,
    /// Empty means every queue.
    pub queues: Vec<String>,
    pub experiment: Option<i64>,
    /// Restrict to this stage and its transitive parents.
    pub stage_name: Option<String>,
}

impl ClaimRequest {
    pub fn for_worker(worker_id: i64) -> Self {
        Self {
            worker_id,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone)]
pub struct Claimed {
    pub stage: Stage,
    pub job: Job,
    /// `pending` or `cached`.
    pub previous_status: StageStatus,
}

/// Final outcome of a job as reported by its worker.
#[derive(Debug, Clone, PartialEq)]
pub struct JobReport {
    pub status: StageStatus,
    pub lock: Option<LockRecord>,
    pub stdout: String,
    pub stderr: String,
}

impl JobReport {
    pub fn completed(lock: Option<LockRecord>) -> Self {
        Self {
            status: StageStatus::Completed,
            lock,
            stdout: String::new(),
            stderr: String::new(),
        }
    }

    pub fn failed(stderr: impl Into<String>) -> Self {
        Self {
            status: StageStatus::Failed,
            lock: None,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn with_output(mut self, stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        self.stdout = stdout.into();
        self.stderr = stderr.into();
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetOutcome {
    Reset,
    Refused { status: StageStatus },
}

impl Store {
    /// Atomically pick the first eligible stage and mark it `running`.
    ///
    /// Eligible means `pending` or `cached`, matching the request's filters,
    /// with every parent `completed`. Returns `None` when nothing is eligible
    /// right now.
    pub fn claim(&self, req: &ClaimRequest) -> Result<Option<Claimed>> {
        let mut conn = self.connect()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let Some((stage_id, previous_status)) = find_candidate(&tx, req)? else {
            debug!(worker_id = req.worker_id, "No eligible stage");
            return Ok(None);
        };

        let now = Utc::now();
        let changed = tx.execute(
            "UPDATE stages SET status = ?2, started_at = ?3, updated_at = ?3, finished_at = NULL \
             WHERE id = ?1 AND status IN ('pending', 'cached')",
            params![stage_id, StageStatus::Running, now],
        )?;
        if changed != 1 {
            return Err(StagehandError::Busy(format!(
                "stage {stage_id} changed status while being claimed"
            )));
        }

        tx.execute(
            "INSERT INTO jobs (stage_id, worker_id, started_at) VALUES (?1, ?2, ?3)",
            params![stage_id, req.worker_id, now],
        )?;
        let job_id = tx.last_insert_rowid();

        let stage = fetch_stage(&tx, stage_id)?;
        let job = fetch_job(&tx, job_id)?.ok_or(StagehandError::JobNotFound(job_id))?;
        tx.commit()?;

        info!(
            stage = %stage.name,
            stage_id,
            job_id,
            worker_id = req.worker_id,
            from = %previous_status,
            "Claimed stage"
        );
        Ok(Some(Claimed {
            stage,
            job,
            previous_status,
        }))
    }

    /// Record the outcome of a job and move its stage to a terminal status.
    pub fn complete_job(&self, job_id: i64, report: &JobReport) -> Result<Stage> {
        if !report.status.is_terminal() {
            return Err(StagehandError::InvalidReport(format!(
                "'{}' is not a terminal status",
                report.status
            )));
        }

        let mut conn = self.connect()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let job = fetch_job(&tx, job_id)?.ok_or(StagehandError::JobNotFound(job_id))?;
        if job.finished_at.is_some() {
            return Err(StagehandError::JobAlreadyFinished(job_id));
        }
        let stage = fetch_stage(&tx, job.stage_id)?;
        if stage.status != StageStatus::Running {
            return Err(StagehandError::StageNotRunning {
                stage: stage.name,
                status: stage.status,
            });
        }

        let result = match &report.lock {
            Some(lock) => serde_json::to_string(lock)?,
            None => String::new(),
        };
        let fp = match (&report.lock, report.status) {
            (Some(lock), StageStatus::Completed) if stage.fingerprint.is_empty() => {
                fingerprint(lock)
            }
            _ => stage.fingerprint.clone(),
        };

        let now = Utc::now();
        tx.execute(
            "UPDATE stages SET status = ?2, result = ?3, fingerprint = ?4, \
             finished_at = ?5, updated_at = ?5 WHERE id = ?1",
            params![stage.id, report.status, result, fp, now],
        )?;

        let stdout = if stage.capture_stdout { report.stdout.as_str() } else { "" };
        let stderr = if stage.capture_stderr { report.stderr.as_str() } else { "" };
        tx.execute(
            "UPDATE jobs SET stdout = ?2, stderr = ?3, finished_at = ?4 WHERE id = ?1",
            params![job_id, stdout, stderr, now],
        )?;

        let updated = fetch_stage(&tx, stage.id)?;
        tx.commit()?;

        match report.status {
            StageStatus::Failed => warn!(stage = %updated.name, job_id, "Stage failed"),
            _ => info!(stage = %updated.name, job_id, status = %updated.status, "Stage finished"),
        }
        Ok(updated)
    }

    /// Re-arm a stage for execution.
    ///
    /// `failed` stages are always reset. `completed`, `cached` and `running`
    /// ones only when `force` is set, which also marks the stage forced so the
    /// next run bypasses the cache. Open jobs of the stage are closed.
    pub fn reset_stage(&self, experiment: i64, name: &str, force: bool) -> Result<ResetOutcome> {
        let mut conn = self.connect()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let stage = tx
            .query_row(
                &format!("SELECT {STAGE_COLUMNS} FROM stages WHERE experiment_id = ?1 AND name = ?2"),
                params![experiment, name],
                Stage::from_row,
            )
            .optional()?
            .ok_or_else(|| StagehandError::StageNotFound(name.to_string()))?;

        let allowed = match stage.status {
            StageStatus::Failed => true,
            StageStatus::Completed | StageStatus::Cached | StageStatus::Running => force,
            StageStatus::Pending => false,
        };
        if !allowed {
            debug!(stage = name, status = %stage.status, force, "Reset refused");
            return Ok(ResetOutcome::Refused {
                status: stage.status,
            });
        }

        let now = Utc::now();
        tx.execute(
            "UPDATE stages SET status = ?2, fingerprint = '', result = '', \
             force_rerun = (force_rerun OR ?3), started_at = NULL, finished_at = NULL, \
             updated_at = ?4 WHERE id = ?1",
            params![stage.id, StageStatus::Pending, force, now],
        )?;
        tx.execute(
            "UPDATE jobs SET stderr = CASE WHEN stderr = '' THEN 'Stage reset' ELSE stderr END, \
             finished_at = ?2 WHERE stage_id = ?1 AND finished_at IS NULL",
            params![stage.id, now],
        )?;
        tx.commit()?;

        info!(stage = name, experiment, from = %stage.status, force, "Reset stage");
        Ok(ResetOutcome::Reset)
    }
}

fn find_candidate(tx: &Transaction<'_>, req: &ClaimRequest) -> Result<Option<(i64, StageStatus)>> {
    let mut args: Vec<SqlValue> = Vec::new();
    let mut sql = String::new();

    if let Some(name) = &req.stage_name {
        args.push(SqlValue::Text(name.clone()));
        sql.push_str("WITH RECURSIVE targets(id) AS (SELECT id FROM stages WHERE name = ?");
        if let Some(exp) = req.experiment {
            args.push(SqlValue::Integer(exp));
            sql.push_str(" AND experiment_id = ?");
        }
        sql.push_str(
            " UNION SELECT d.parent_id FROM stage_dependencies d \
             JOIN targets t ON d.child_id = t.id) ",
        );
    }

    sql.push_str("SELECT s.id, s.status FROM stages s WHERE s.status IN ('pending', 'cached')");

    if let Some(exp) = req.experiment {
        args.push(SqlValue::Integer(exp));
        sql.push_str(" AND s.experiment_id = ?");
    }
    if !req.queues.is_empty() {
        let marks = vec!["?"; req.queues.len()].join(", ");
        sql.push_str(&format!(" AND s.queue IN ({marks})"));
        args.extend(req.queues.iter().cloned().map(SqlValue::Text));
    }
    if req.stage_name.is_some() {
        sql.push_str(" AND s.id IN (SELECT id FROM targets)");
    }

    sql.push_str(
        " AND NOT EXISTS (SELECT 1 FROM stage_dependencies d \
         JOIN stages p ON p.id = d.parent_id \
         WHERE d.child_id = s.id AND p.status != 'completed') \
         ORDER BY s.id LIMIT 1",
    );

    let found = tx
        .query_row(&sql, params_from_iter(args.iter()), |row| {
            Ok((row.get(0)?, row.get(1)?))
        })
        .optional()?;
    Ok(found)
}

pub(crate) fn fetch_stage(tx: &Transaction<'_>, id: i64) -> Result<Stage> {
    tx.query_row(
        &format!("SELECT {STAGE_COLUMNS} FROM stages WHERE id = ?1"),
        params![id],
        Stage::from_row,
    )
    .optional()?
    .ok_or_else(|| StagehandError::StageNotFound(format!("#{id}")))
}

pub(crate) fn fetch_job(tx: &Transaction<'_>, id: i64) -> Result<Option<Job>> {
    Ok(tx
        .query_row(
            &format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1"),
            params![id],
            Job::from_row,
        )
        .optional()?)
}
