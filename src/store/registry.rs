// src/store/registry.rs

//! Worker lifecycle bookkeeping.

use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{TransactionBehavior, params};
use tracing::{debug, info, warn};

use crate::errors::{Result, StagehandError};
use crate::store::Store;
use crate::types::{StageStatus, WorkerStatus};

/// stderr recorded on jobs closed by [`Store::reclaim_stale`].
pub const HEARTBEAT_EXPIRED: &str = "Worker heartbeat expired";

/// Identity a worker registers with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerInfo {
    pub name: String,
    pub machine: String,
    pub cwd: String,
    pub pid: u32,
}

impl WorkerInfo {
    /// Identity of the current process.
    pub fn current(name: impl Into<String>, machine: Option<String>) -> Self {
        let machine = machine
            .filter(|m| !m.is_empty())
            .unwrap_or_else(machine_name);
        let cwd = std::env::current_dir()
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        Self {
            name: name.into(),
            machine,
            cwd,
            pid: std::process::id(),
        }
    }
}

/// `$HOSTNAME`, or `localhost` when unset.
pub fn machine_name() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}

/// What a stale-heartbeat sweep changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReclaimReport {
    pub workers: Vec<i64>,
    pub jobs: Vec<i64>,
    pub stages: Vec<i64>,
}

impl ReclaimReport {
    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }
}

impl Store {
    pub fn register_worker(&self, info: &WorkerInfo) -> Result<i64> {
        let conn = self.connect()?;
        let now = Utc::now();
        conn.execute(
            "INSERT INTO workers (name, machine, cwd, pid, status, last_seen, started_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
            params![info.name, info.machine, info.cwd, info.pid, WorkerStatus::Idle, now],
        )?;
        let id = conn.last_insert_rowid();
        info!(worker_id = id, name = %info.name, machine = %info.machine, "Registered worker");
        Ok(id)
    }

    /// Set a worker's status and refresh its `last_seen`.
    pub fn update_worker(&self, id: i64, status: WorkerStatus) -> Result<()> {
        let conn = self.connect()?;
        let changed = conn.execute(
            "UPDATE workers SET status = ?2, last_seen = ?3 WHERE id = ?1",
            params![id, status, Utc::now()],
        )?;
        if changed == 0 {
            return Err(StagehandError::WorkerNotFound(id));
        }
        debug!(worker_id = id, %status, "Worker heartbeat");
        Ok(())
    }

    /// Refresh `last_seen` without touching the status.
    pub fn touch_worker(&self, id: i64) -> Result<()> {
        let conn = self.connect()?;
        let changed = conn.execute(
            "UPDATE workers SET last_seen = ?2 WHERE id = ?1",
            params![id, Utc::now()],
        )?;
        if changed == 0 {
            return Err(StagehandError::WorkerNotFound(id));
        }
        Ok(())
    }

    pub fn close_worker(&self, id: i64) -> Result<()> {
        let conn = self.connect()?;
        let now = Utc::now();
        let changed = conn.execute(
            "UPDATE workers SET status = ?2, last_seen = ?3, finished_at = ?3 WHERE id = ?1",
            params![id, WorkerStatus::Offline, now],
        )?;
        if changed == 0 {
            return Err(StagehandError::WorkerNotFound(id));
        }
        info!(worker_id = id, "Worker offline");
        Ok(())
    }

    /// Release work held by workers whose heartbeat is older than `max_age`.
    ///
    /// Such workers are marked offline, their open jobs are closed with
    /// [`HEARTBEAT_EXPIRED`] and their running stages go back to `pending`.
    pub fn reclaim_stale(&self, max_age: Duration) -> Result<ReclaimReport> {
        let max_age = chrono::Duration::from_std(max_age)
            .map_err(|e| StagehandError::ConfigError(format!("invalid reclaim age: {e}")))?;

        let mut conn = self.connect()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let now = Utc::now();
        let cutoff = now - max_age;

        let stale: Vec<i64> = {
            let mut stmt = tx.prepare("SELECT id, last_seen FROM workers WHERE status != ?1")?;
            let rows = stmt.query_map(params![WorkerStatus::Offline], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, DateTime<Utc>>(1)?))
            })?;
            let mut ids = Vec::new();
            for row in rows {
                let (id, last_seen) = row?;
                if last_seen < cutoff {
                    ids.push(id);
                }
            }
            ids
        };

        let mut report = ReclaimReport::default();
        for worker_id in stale {
            tx.execute(
                "UPDATE workers SET status = ?2, finished_at = ?3 WHERE id = ?1",
                params![worker_id, WorkerStatus::Offline, now],
            )?;

            let open: Vec<(i64, i64)> = {
                let mut stmt = tx.prepare(
                    "SELECT id, stage_id FROM jobs WHERE worker_id = ?1 AND finished_at IS NULL",
                )?;
                let rows = stmt.query_map(params![worker_id], |row| Ok((row.get(0)?, row.get(1)?)))?;
                rows.collect::<rusqlite::Result<_>>()?
            };

            for (job_id, stage_id) in open {
                tx.execute(
                    "UPDATE jobs SET stderr = ?2, finished_at = ?3 WHERE id = ?1",
                    params![job_id, HEARTBEAT_EXPIRED, now],
                )?;
                let released = tx.execute(
                    "UPDATE stages SET status = ?2, started_at = NULL, updated_at = ?3 \
                     WHERE id = ?1 AND status = ?4",
                    params![stage_id, StageStatus::Pending, now, StageStatus::Running],
                )?;
                report.jobs.push(job_id);
                if released == 1 {
                    report.stages.push(stage_id);
                }
            }

            warn!(worker_id, "Reclaimed work from stale worker");
            report.workers.push(worker_id);
        }
        tx.commit()?;

        Ok(report)
    }
}
