// tests/claim_protocol.rs

mod common;
use crate::common::builders::{GraphBuilder, default_lock};
use crate::common::{claim, claim_and_complete, ingest, init_tracing, meta, register, temp_store};

use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Duration;

use stagehand::errors::StagehandError;
use stagehand::queue::QueueRules;
use stagehand::store::{ClaimRequest, JobReport, Store};
use stagehand::types::StageStatus;

/// Assert every parent of `name` is completed right now.
fn assert_parents_completed(store: &Store, experiment: i64, name: &str) {
    let dump = store.dump_stage(experiment, name).unwrap();
    for parent in dump.dependencies {
        let status = store.stage(experiment, &parent).unwrap().status;
        assert_eq!(
            status,
            StageStatus::Completed,
            "{name} claimed while parent {parent} is {status}"
        );
    }
}

/// Poll from one thread until every stage of the experiment is completed.
fn drain(store: Store, experiment: i64, worker: &str, claimed: &Mutex<Vec<String>>) {
    let worker_id = register(&store, worker);
    let total = store.stages(experiment).unwrap().len();
    loop {
        match claim(&store, worker_id) {
            Some(c) => {
                assert_parents_completed(&store, experiment, &c.stage.name);
                claimed.lock().unwrap().push(c.stage.name.clone());
                std::thread::sleep(Duration::from_millis(2));
                let lock = default_lock(&c.stage.name);
                store
                    .complete_job(c.job.id, &JobReport::completed(Some(lock)))
                    .unwrap();
            }
            None => {
                let done = store
                    .count_by_status(Some(experiment))
                    .unwrap()
                    .get(StageStatus::Completed);
                if done == total {
                    return;
                }
                std::thread::sleep(Duration::from_millis(2));
            }
        }
    }
}

#[test]
fn claim_waits_for_every_parent() {
    init_tracing();
    let (_dir, store) = temp_store();
    let graph = GraphBuilder::new()
        .stage("A")
        .stage("B")
        .stage("C")
        .edge("A", "B")
        .edge("B", "C")
        .build();
    let exp = ingest(&store, &graph);
    let w = register(&store, "w");

    let first = claim(&store, w).expect("A is claimable");
    assert_eq!(first.stage.name, "A");
    assert_eq!(first.previous_status, StageStatus::Pending);
    assert_eq!(first.stage.status, StageStatus::Running);
    assert!(claim(&store, w).is_none(), "B must wait for A");

    store
        .complete_job(first.job.id, &JobReport::completed(Some(default_lock("A"))))
        .unwrap();
    assert_eq!(claim_and_complete(&store, w).unwrap().name, "B");
    assert_eq!(claim_and_complete(&store, w).unwrap().name, "C");
    assert!(claim(&store, w).is_none());

    let counts = store.count_by_status(Some(exp)).unwrap();
    assert_eq!(counts.get(StageStatus::Completed), 3);
}

#[test]
fn failed_parent_blocks_children() {
    init_tracing();
    let (_dir, store) = temp_store();
    let graph = GraphBuilder::new().stage("A").stage("B").edge("A", "B").build();
    let exp = ingest(&store, &graph);
    let w = register(&store, "w");

    let a = claim(&store, w).unwrap();
    let updated = store
        .complete_job(a.job.id, &JobReport::failed("boom"))
        .unwrap();
    assert_eq!(updated.status, StageStatus::Failed);
    assert!(updated.fingerprint.is_empty());
    assert!(claim(&store, w).is_none());
    assert_eq!(store.stage(exp, "B").unwrap().status, StageStatus::Pending);
}

#[test]
fn cached_stages_are_claimable() {
    init_tracing();
    let (_dir, store) = temp_store();
    let graph = GraphBuilder::new().stage("A").unchanged("A").build();
    let exp = ingest(&store, &graph);
    assert_eq!(store.stage(exp, "A").unwrap().status, StageStatus::Cached);

    let w = register(&store, "w");
    let claimed = claim(&store, w).unwrap();
    assert_eq!(claimed.previous_status, StageStatus::Cached);
    assert_eq!(claimed.job.worker_id, w);
    assert!(claimed.job.finished_at.is_none());
}

#[test]
fn concurrent_claimers_never_share_a_stage() {
    init_tracing();
    let (_dir, store) = temp_store();
    let mut builder = GraphBuilder::new();
    for i in 0..24 {
        builder = builder.stage(&format!("S_{i}"));
    }
    let exp = ingest(&store, &builder.build());

    let claimed = Mutex::new(Vec::new());
    std::thread::scope(|scope| {
        for t in 0..6 {
            let store = store.clone();
            let claimed = &claimed;
            scope.spawn(move || drain(store, exp, &format!("w{t}"), claimed));
        }
    });

    let claimed = claimed.into_inner().unwrap();
    let unique: HashSet<&String> = claimed.iter().collect();
    assert_eq!(claimed.len(), 24);
    assert_eq!(unique.len(), 24, "a stage was claimed twice: {claimed:?}");

    for stage in store.stages(exp).unwrap() {
        let dump = store.dump_stage(exp, &stage.name).unwrap();
        assert_eq!(dump.jobs.len(), 1, "{} has {} jobs", stage.name, dump.jobs.len());
    }
}

#[test]
fn diamond_join_runs_once_after_both_parents() {
    init_tracing();
    let (_dir, store) = temp_store();
    let graph = GraphBuilder::new()
        .stage("A")
        .stage("B")
        .stage("C")
        .edge("A", "C")
        .edge("B", "C")
        .build();
    let exp = ingest(&store, &graph);

    let claimed = Mutex::new(Vec::new());
    std::thread::scope(|scope| {
        for t in 0..2 {
            let store = store.clone();
            let claimed = &claimed;
            scope.spawn(move || drain(store, exp, &format!("w{t}"), claimed));
        }
    });

    let claimed = claimed.into_inner().unwrap();
    assert_eq!(claimed.iter().filter(|n| *n == "C").count(), 1);
    assert_eq!(claimed.last().map(String::as_str), Some("C"));

    let c = store.stage(exp, "C").unwrap();
    let a = store.stage(exp, "A").unwrap();
    let b = store.stage(exp, "B").unwrap();
    let c_started = c.started_at.unwrap();
    assert!(a.finished_at.unwrap() <= c_started);
    assert!(b.finished_at.unwrap() <= c_started);
}

#[test]
fn workers_only_claim_from_their_queues() {
    init_tracing();
    let (_dir, store) = temp_store();
    let graph = GraphBuilder::new().stage("gpu_train_1").build();
    let rules = QueueRules::from_pairs([("gpu_*", "gpu")]).unwrap();
    let exp = store.ingest(&graph, &rules, &meta(), true).unwrap();
    assert_eq!(store.stage(exp, "gpu_train_1").unwrap().queue, "gpu");

    let cpu = register(&store, "cpu");
    let default_only = ClaimRequest {
        queues: vec!["default".to_string()],
        ..ClaimRequest::for_worker(cpu)
    };
    assert!(store.claim(&default_only).unwrap().is_none());

    let gpu = register(&store, "gpu");
    let gpu_only = ClaimRequest {
        queues: vec!["gpu".to_string()],
        ..ClaimRequest::for_worker(gpu)
    };
    let claimed = store.claim(&gpu_only).unwrap().unwrap();
    assert_eq!(claimed.stage.name, "gpu_train_1");
}

#[test]
fn claim_can_be_limited_to_an_experiment() {
    init_tracing();
    let (_dir, store) = temp_store();
    let first = ingest(&store, &GraphBuilder::new().stage("A").build());
    let second = ingest(&store, &GraphBuilder::new().stage("A").build());
    let w = register(&store, "w");

    let req = ClaimRequest {
        experiment: Some(second),
        ..ClaimRequest::for_worker(w)
    };
    let claimed = store.claim(&req).unwrap().unwrap();
    assert_eq!(claimed.stage.experiment_id, second);
    assert!(store.claim(&req).unwrap().is_none());
    assert_eq!(store.stage(first, "A").unwrap().status, StageStatus::Pending);
}

#[test]
fn claim_can_be_limited_to_a_stage_and_its_ancestors() {
    init_tracing();
    let (_dir, store) = temp_store();
    let graph = GraphBuilder::new()
        .stage("A")
        .stage("B")
        .stage("Other")
        .edge("A", "B")
        .build();
    let exp = ingest(&store, &graph);
    let w = register(&store, "w");

    let req = ClaimRequest {
        experiment: Some(exp),
        stage_name: Some("B".to_string()),
        ..ClaimRequest::for_worker(w)
    };
    let mut seen = Vec::new();
    while let Some(c) = store.claim(&req).unwrap() {
        seen.push(c.stage.name.clone());
        store
            .complete_job(c.job.id, &JobReport::completed(Some(default_lock(&c.stage.name))))
            .unwrap();
    }
    assert_eq!(seen, vec!["A", "B"]);
    assert_eq!(store.stage(exp, "Other").unwrap().status, StageStatus::Pending);
}

#[test]
fn a_job_is_reported_exactly_once() {
    init_tracing();
    let (_dir, store) = temp_store();
    ingest(&store, &GraphBuilder::new().stage("A").build());
    let w = register(&store, "w");
    let c = claim(&store, w).unwrap();

    store
        .complete_job(c.job.id, &JobReport::completed(Some(default_lock("A"))))
        .unwrap();
    let err = store
        .complete_job(c.job.id, &JobReport::failed("late"))
        .unwrap_err();
    assert!(matches!(err, StagehandError::JobAlreadyFinished(id) if id == c.job.id));
    assert_eq!(
        store.stage(c.stage.experiment_id, "A").unwrap().status,
        StageStatus::Completed
    );

    let err = store.complete_job(9999, &JobReport::completed(None)).unwrap_err();
    assert!(matches!(err, StagehandError::JobNotFound(9999)));
}

#[test]
fn non_terminal_reports_are_rejected() {
    init_tracing();
    let (_dir, store) = temp_store();
    ingest(&store, &GraphBuilder::new().stage("A").build());
    let w = register(&store, "w");
    let c = claim(&store, w).unwrap();

    let mut report = JobReport::completed(None);
    report.status = StageStatus::Pending;
    let err = store.complete_job(c.job.id, &report).unwrap_err();
    assert!(matches!(err, StagehandError::InvalidReport(_)));
    assert_eq!(store.stage(c.stage.experiment_id, "A").unwrap().status, StageStatus::Running);
}

#[test]
fn completion_records_result_fingerprint_and_output() {
    init_tracing();
    let (_dir, store) = temp_store();
    let exp = ingest(&store, &GraphBuilder::new().stage("A").build());
    let w = register(&store, "w");
    let c = claim(&store, w).unwrap();

    let lock = default_lock("A");
    let stage = store
        .complete_job(
            c.job.id,
            &JobReport::completed(Some(lock.clone())).with_output("hello\n", "warn\n"),
        )
        .unwrap();
    assert_eq!(stage.status, StageStatus::Completed);
    assert_eq!(stage.result, Some(lock.clone()));
    assert_eq!(stage.fingerprint, stagehand::lock::fingerprint(&lock));
    assert!(stage.finished_at.is_some());

    let dump = store.dump_stage(exp, "A").unwrap();
    assert_eq!(dump.jobs[0].stdout, "hello\n");
    assert_eq!(dump.jobs[0].stderr, "warn\n");
    assert!(dump.jobs[0].finished_at.is_some());
}
