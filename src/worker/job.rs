// src/worker/job.rs

//! Processing of one claimed stage.

use tracing::{debug, error, info, warn};

use crate::errors::{Result, StagehandError};
use crate::lock::{LockRecord, fingerprint, transform};
use crate::retry::retry_async;
use crate::store::{Claimed, JobReport, Stage, Store};
use crate::tool::BuildTool;
use crate::types::{StageStatus, WorkerStatus};
use crate::worker::WorkerOptions;
use crate::worker::cleanup::{HeartbeatHandle, JobGuard};

/// How a claimed stage was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    /// The command ran and succeeded.
    Executed,
    /// Outputs were checked out from another stage with the same fingerprint.
    CacheHit,
    /// The stage was `cached` and the tool confirmed it is up to date.
    UpToDate,
    Failed,
    /// The job was closed by a forced reset or a stale-worker reclaim before
    /// its report arrived; the report was dropped.
    Superseded,
}

/// Run a claimed stage to completion and report it.
///
/// The job is guarded: if this future is dropped before the report is
/// written, the job is reported `failed` with `Worker exited`.
pub async fn process_claim(
    store: &Store,
    tool: &dyn BuildTool,
    opts: &WorkerOptions,
    worker_id: i64,
    claimed: Claimed,
) -> Result<JobOutcome> {
    let Claimed {
        stage,
        job,
        previous_status,
    } = claimed;
    let job_id = job.id;

    // Armed before the first await: every early return or drop below closes the job.
    let guard = JobGuard::arm(store.clone(), job_id, stage.name.clone());
    store
        .run_blocking(move |s| s.update_worker(worker_id, WorkerStatus::Running))
        .await?;
    let _heartbeat = HeartbeatHandle::spawn(store.clone(), worker_id, opts.heartbeat_interval);

    let (report, outcome) = match run_stage(store, tool, opts, &stage, previous_status).await {
        Ok(resolved) => resolved,
        Err(e) => {
            error!(stage = %stage.name, job_id, error = %e, "Stage errored");
            (JobReport::failed(e.to_string()), JobOutcome::Failed)
        }
    };

    let reported = retry_async(&opts.retry, "complete_job", || {
        let report = report.clone();
        store.run_blocking(move |s| s.complete_job(job_id, &report))
    })
    .await;

    match reported {
        Ok(_) => guard.disarm(),
        Err(e) if e.is_superseded() => {
            guard.disarm();
            warn!(stage = %stage.name, job_id, error = %e, "Job was closed elsewhere, dropping report");
            return Ok(JobOutcome::Superseded);
        }
        Err(e) => return Err(e),
    }

    debug!(stage = %stage.name, job_id, ?outcome, "Job reported");
    Ok(outcome)
}

async fn run_stage(
    store: &Store,
    tool: &dyn BuildTool,
    opts: &WorkerOptions,
    stage: &Stage,
    previous_status: StageStatus,
) -> Result<(JobReport, JobOutcome)> {
    let name = stage.name.as_str();

    if stage.force {
        debug!(stage = name, "Forced stage, executing");
        return execute(tool, opts, name, true).await;
    }

    if previous_status == StageStatus::Cached {
        let up_to_date =
            retry_async(&opts.retry, "verify_up_to_date", || tool.verify_up_to_date(name)).await?;
        if up_to_date {
            let lock = materialize(tool, opts, name).await?;
            info!(stage = name, "Stage unchanged, nothing to run");
            return Ok((JobReport::completed(Some(lock)), JobOutcome::UpToDate));
        }
    }

    if stage.cache {
        match checkout_from_cache(store, tool, opts, stage).await {
            Ok(Some((lock, source))) => {
                let note = format!("Checked out outputs of '{source}'\n");
                return Ok((
                    JobReport::completed(Some(lock)).with_output(note, ""),
                    JobOutcome::CacheHit,
                ));
            }
            Ok(None) => {}
            Err(e @ (StagehandError::Lock(_) | StagehandError::Tool(_))) => {
                warn!(stage = name, error = %e, "Cache checkout failed, executing instead");
            }
            Err(e) => return Err(e),
        }
    }

    execute(tool, opts, name, false).await
}

/// Look the stage's fingerprint up and reuse a matching result.
///
/// Returns the post-checkout lock and the name of the stage it came from, or
/// `None` on a miss or when the checked-out state does not verify.
async fn checkout_from_cache(
    store: &Store,
    tool: &dyn BuildTool,
    opts: &WorkerOptions,
    stage: &Stage,
) -> Result<Option<(LockRecord, String)>> {
    let name = stage.name.as_str();
    let raw = materialize(tool, opts, name).await?;
    let fp = fingerprint(&raw);

    let stage_id = stage.id;
    let lookup = fp.clone();
    let hit = store
        .run_blocking(move |s| s.find_by_fingerprint(&lookup, Some(stage_id)))
        .await?;
    let Some((source, cached)) = hit.and_then(|h| h.result.map(|r| (h.name, r))) else {
        debug!(stage = name, fingerprint = %fp, "Cache miss");
        return Ok(None);
    };

    let transformed = transform(&raw, &cached)?;
    retry_async(&opts.retry, "write_lock", || {
        tool.write_lock(name, transformed.clone())
    })
    .await?;

    let out = retry_async(&opts.retry, "checkout", || tool.checkout(name)).await?;
    if !out.is_success() {
        warn!(stage = name, source = %source, exit_code = out.exit_code, "Checkout failed");
        return Ok(None);
    }
    if !retry_async(&opts.retry, "verify_up_to_date", || tool.verify_up_to_date(name)).await? {
        warn!(stage = name, source = %source, "Checked-out stage does not verify");
        return Ok(None);
    }

    let lock = materialize(tool, opts, name).await?;
    info!(stage = name, source = %source, fingerprint = %fp, "Reused cached result");
    Ok(Some((lock, source)))
}

async fn execute(
    tool: &dyn BuildTool,
    opts: &WorkerOptions,
    name: &str,
    force: bool,
) -> Result<(JobReport, JobOutcome)> {
    let out = retry_async(&opts.retry, "execute", || tool.execute(name, force)).await?;
    if !out.is_success() {
        let report = JobReport {
            status: StageStatus::Failed,
            lock: None,
            stdout: out.stdout,
            stderr: out.stderr,
        };
        return Ok((report, JobOutcome::Failed));
    }

    let lock = materialize(tool, opts, name).await?;
    Ok((
        JobReport::completed(Some(lock)).with_output(out.stdout, out.stderr),
        JobOutcome::Executed,
    ))
}

async fn materialize(tool: &dyn BuildTool, opts: &WorkerOptions, name: &str) -> Result<LockRecord> {
    retry_async(&opts.retry, "materialize_lock", || tool.materialize_lock(name)).await
}
