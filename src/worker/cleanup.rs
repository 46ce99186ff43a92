// src/worker/cleanup.rs

//! Drop guards that keep the store consistent on every exit path.
//!
//! A poll loop can end normally, return an error, panic, or be aborted
//! (Ctrl-C aborts the whole `JoinSet`). In all of these cases its future is
//! dropped, and these guards write the final bookkeeping synchronously.

use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::store::{JobReport, Store};

/// stderr recorded when a job's worker goes away mid-run.
pub const WORKER_EXITED: &str = "Worker exited";

/// Reports its job `failed` unless disarmed after a regular report.
#[derive(Debug)]
pub struct JobGuard {
    store: Store,
    job_id: i64,
    stage: String,
    armed: bool,
}

impl JobGuard {
    pub fn arm(store: Store, job_id: i64, stage: impl Into<String>) -> Self {
        Self {
            store,
            job_id,
            stage: stage.into(),
            armed: true,
        }
    }

    pub fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for JobGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        warn!(stage = %self.stage, job_id = self.job_id, "Worker exiting with job in progress");
        if let Err(e) = self
            .store
            .complete_job(self.job_id, &JobReport::failed(WORKER_EXITED))
        {
            error!(
                stage = %self.stage,
                job_id = self.job_id,
                error = %e,
                "Failed to report abandoned job"
            );
        }
    }
}

/// Marks the worker row `offline` when the loop ends.
#[derive(Debug)]
pub struct WorkerRegistration {
    store: Store,
    worker_id: i64,
}

impl WorkerRegistration {
    pub fn new(store: Store, worker_id: i64) -> Self {
        Self { store, worker_id }
    }

    pub fn worker_id(&self) -> i64 {
        self.worker_id
    }
}

impl Drop for WorkerRegistration {
    fn drop(&mut self) {
        if let Err(e) = self.store.close_worker(self.worker_id) {
            error!(worker_id = self.worker_id, error = %e, "Failed to mark worker offline");
        }
    }
}

/// Background task refreshing `last_seen` while a job runs.
#[derive(Debug)]
pub struct HeartbeatHandle {
    task: JoinHandle<()>,
}

impl HeartbeatHandle {
    pub fn spawn(store: Store, worker_id: i64, interval: Duration) -> Self {
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match store.run_blocking(move |s| s.touch_worker(worker_id)).await {
                    Ok(()) => debug!(worker_id, "Heartbeat"),
                    Err(e) => warn!(worker_id, error = %e, "Heartbeat failed"),
                }
            }
        });
        Self { task }
    }
}

impl Drop for HeartbeatHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}
