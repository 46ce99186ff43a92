#![allow(dead_code)]

pub use stagehand_test_utils::builders;
pub use stagehand_test_utils::fake_tool;
pub use stagehand_test_utils::{
    fast_worker_options, init_tracing, register, temp_store, with_timeout,
};

use stagehand::graph::StageGraph;
use stagehand::queue::QueueRules;
use stagehand::store::{ClaimRequest, Claimed, ExperimentMeta, JobReport, Stage, Store};

pub fn meta() -> ExperimentMeta {
    ExperimentMeta {
        base: "HEAD".to_string(),
        origin: "origin".to_string(),
        machine: "test-host".to_string(),
    }
}

/// Ingest `graph` with no queue rules and the cache enabled.
pub fn ingest(store: &Store, graph: &StageGraph) -> i64 {
    store
        .ingest(graph, &QueueRules::new(), &meta(), true)
        .expect("ingest")
}

pub fn claim(store: &Store, worker_id: i64) -> Option<Claimed> {
    store
        .claim(&ClaimRequest::for_worker(worker_id))
        .expect("claim")
}

/// Claim the next stage and report it completed with its default lock.
pub fn claim_and_complete(store: &Store, worker_id: i64) -> Option<Stage> {
    let claimed = claim(store, worker_id)?;
    let lock = builders::default_lock(&claimed.stage.name);
    Some(
        store
            .complete_job(claimed.job.id, &JobReport::completed(Some(lock)))
            .expect("complete job"),
    )
}
