// src/worker/poll.rs

use std::sync::Arc;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::errors::Result;
use crate::retry::retry_async;
use crate::store::{ClaimRequest, Store, WorkerInfo};
use crate::tool::BuildTool;
use crate::types::WorkerStatus;
use crate::worker::WorkerOptions;
use crate::worker::cleanup::WorkerRegistration;
use crate::worker::job::{JobOutcome, process_claim};

/// Tally of what one poll loop did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopReport {
    pub executed: usize,
    pub cache_hits: usize,
    pub up_to_date: usize,
    pub failed: usize,
    pub superseded: usize,
}

impl LoopReport {
    fn record(&mut self, outcome: JobOutcome) {
        match outcome {
            JobOutcome::Executed => self.executed += 1,
            JobOutcome::CacheHit => self.cache_hits += 1,
            JobOutcome::UpToDate => self.up_to_date += 1,
            JobOutcome::Failed => self.failed += 1,
            JobOutcome::Superseded => self.superseded += 1,
        }
    }

    pub fn merge(&mut self, other: LoopReport) {
        self.executed += other.executed;
        self.cache_hits += other.cache_hits;
        self.up_to_date += other.up_to_date;
        self.failed += other.failed;
        self.superseded += other.superseded;
    }

    pub fn total(&self) -> usize {
        self.executed + self.cache_hits + self.up_to_date + self.failed + self.superseded
    }
}

/// One sequential poll loop, registered as its own worker row.
///
/// Claims and processes stages until nothing was claimable for
/// `idle_timeout`. The worker row is marked offline however the loop ends.
pub async fn run_loop(
    store: Store,
    tool: Arc<dyn BuildTool>,
    opts: WorkerOptions,
    name: String,
) -> Result<LoopReport> {
    let info = WorkerInfo::current(name.clone(), opts.machine.clone());
    let worker_id = store
        .run_blocking(move |s| s.register_worker(&info))
        .await?;
    let _registration = WorkerRegistration::new(store.clone(), worker_id);

    let request = ClaimRequest {
        worker_id,
        queues: opts.queues.clone(),
        experiment: opts.experiment,
        stage_name: opts.stage_name.clone(),
    };

    let mut report = LoopReport::default();
    let mut idle_since = Instant::now();

    loop {
        if let Some(max_age) = opts.reclaim_after {
            let reclaimed = store
                .run_blocking(move |s| s.reclaim_stale(max_age))
                .await?;
            if !reclaimed.is_empty() {
                warn!(
                    worker = %name,
                    workers = ?reclaimed.workers,
                    stages = ?reclaimed.stages,
                    "Reclaimed stages from stale workers"
                );
            }
        }

        store
            .run_blocking(move |s| s.update_worker(worker_id, WorkerStatus::Idle))
            .await?;

        let claimed = retry_async(&opts.retry, "claim", || {
            let request = request.clone();
            store.run_blocking(move |s| s.claim(&request))
        })
        .await?;

        match claimed {
            Some(claimed) => {
                let outcome = process_claim(&store, tool.as_ref(), &opts, worker_id, claimed).await?;
                report.record(outcome);
                idle_since = Instant::now();
            }
            None if idle_since.elapsed() >= opts.idle_timeout => {
                info!(worker = %name, processed = report.total(), "No work left, worker exiting");
                break;
            }
            None => {
                debug!(worker = %name, "Nothing claimable, sleeping");
                tokio::time::sleep(opts.poll_interval).await;
            }
        }
    }

    Ok(report)
}
