// src/worker/mod.rs

//! Worker processes.
//!
//! A worker runs `jobs` independent poll loops. Each loop registers its own
//! worker row, then repeatedly claims a stage from the store, resolves it
//! through the build tool (execute, reuse a cached result, or confirm it is
//! up to date) and reports the outcome.

pub mod cleanup;
pub mod job;
pub mod poll;

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::config::ProjectConfig;
use crate::errors::{Result, StagehandError};
use crate::retry::RetryPolicy;
use crate::store::Store;
use crate::tool::BuildTool;

pub use cleanup::{HeartbeatHandle, JobGuard, WORKER_EXITED, WorkerRegistration};
pub use job::{JobOutcome, process_claim};
pub use poll::{LoopReport, run_loop};

#[derive(Debug, Clone)]
pub struct WorkerOptions {
    pub name: String,
    pub machine: Option<String>,
    /// Number of poll loops.
    pub jobs: usize,
    /// Empty means every queue.
    pub queues: Vec<String>,
    pub experiment: Option<i64>,
    /// Only this stage and its ancestors.
    pub stage_name: Option<String>,
    pub idle_timeout: Duration,
    pub poll_interval: Duration,
    pub heartbeat_interval: Duration,
    pub reclaim_after: Option<Duration>,
    pub retry: RetryPolicy,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            name: "worker".to_string(),
            machine: None,
            jobs: 1,
            queues: Vec::new(),
            experiment: None,
            stage_name: None,
            idle_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_secs(1),
            heartbeat_interval: Duration::from_secs(10),
            reclaim_after: None,
            retry: RetryPolicy::default(),
        }
    }
}

impl WorkerOptions {
    pub fn from_config(cfg: &ProjectConfig) -> Self {
        let worker = &cfg.worker;
        Self {
            name: worker.name.clone().unwrap_or_else(|| "worker".to_string()),
            machine: worker.machine.clone(),
            jobs: worker.jobs,
            idle_timeout: worker.idle_timeout(),
            poll_interval: worker.poll_interval(),
            heartbeat_interval: worker.heartbeat_interval(),
            reclaim_after: worker.reclaim_after(),
            retry: cfg.retry_policy(),
            ..Self::default()
        }
    }

    /// Worker-row name of loop `index`.
    pub fn loop_name(&self, index: usize) -> String {
        if self.jobs <= 1 {
            self.name.clone()
        } else {
            format!("{}-{}", self.name, index)
        }
    }
}

/// Run all poll loops of this process until they go idle or Ctrl-C arrives.
///
/// On Ctrl-C every loop is aborted; their guards report in-flight jobs as
/// failed and mark the worker rows offline.
pub async fn run_worker(
    store: Store,
    tool: Arc<dyn BuildTool>,
    opts: WorkerOptions,
) -> Result<LoopReport> {
    let jobs = opts.jobs.max(1);
    info!(name = %opts.name, jobs, queues = ?opts.queues, "Starting worker");

    let mut set = JoinSet::new();
    for index in 0..jobs {
        let name = opts.loop_name(index);
        set.spawn(run_loop(store.clone(), Arc::clone(&tool), opts.clone(), name));
    }

    let mut total = LoopReport::default();
    let mut first_error: Option<StagehandError> = None;
    let mut listen_ctrl_c = true;

    loop {
        tokio::select! {
            joined = set.join_next() => match joined {
                None => break,
                Some(Ok(Ok(report))) => total.merge(report),
                Some(Ok(Err(e))) => {
                    error!(error = %e, "Worker loop failed");
                    first_error.get_or_insert(e);
                }
                Some(Err(e)) => {
                    error!(error = %e, "Worker loop panicked");
                    first_error.get_or_insert(StagehandError::Other(anyhow::anyhow!(
                        "worker loop panicked: {e}"
                    )));
                }
            },
            signal = tokio::signal::ctrl_c(), if listen_ctrl_c => match signal {
                Ok(()) => {
                    warn!("Ctrl+C received, stopping worker loops");
                    set.abort_all();
                    while set.join_next().await.is_some() {}
                    break;
                }
                Err(e) => {
                    error!(error = %e, "Failed to listen for Ctrl+C");
                    listen_ctrl_c = false;
                }
            },
        }
    }

    info!(
        executed = total.executed,
        cache_hits = total.cache_hits,
        up_to_date = total.up_to_date,
        failed = total.failed,
        "Worker finished"
    );
    match first_error {
        Some(e) => Err(e),
        None => Ok(total),
    }
}
