// tests/lock_transform.rs

use serde_json::json;

use stagehand::graph::working_dir;
use stagehand::lock::{LockEntry, LockError, LockRecord, fingerprint, remap_path, transform};

fn record(name: &str, outs: &[(&str, &str)]) -> LockRecord {
    let mut lock = LockRecord::new(format!("zntrack run pkg.Node --name {name}"));
    lock.params
        .entry("params.yaml".to_string())
        .or_default()
        .insert(name.to_string(), json!({"seed": 1}));
    lock.deps.push(LockEntry::with_hash("data/raw.csv", "md5", "d1"));
    for (path, md5) in outs {
        lock.outs.push(LockEntry::with_hash(*path, "md5", *md5));
    }
    lock
}

#[test]
fn outputs_move_into_the_consumers_working_dir() {
    let cached = record(
        "grp_X_Node",
        &[
            ("nodes/grp/X/Node/node-meta.json", "m1"),
            ("nodes/grp/X/Node/results/sum.json", "m2"),
        ],
    );
    let consumer = record("Node_1", &[]);
    assert_eq!(fingerprint(&cached), fingerprint(&consumer));

    let out = transform(&consumer, &cached).unwrap();
    assert_eq!(out.cmd, consumer.cmd);
    assert_eq!(out.params, consumer.params);
    assert_eq!(out.deps, consumer.deps);

    let prefix = format!("{}/", working_dir("Node_1"));
    let paths: Vec<&str> = out.outs.iter().map(|o| o.path.as_str()).collect();
    assert_eq!(
        paths,
        vec!["nodes/Node_1/node-meta.json", "nodes/Node_1/results/sum.json"]
    );
    for (new, old) in out.outs.iter().zip(&cached.outs) {
        assert!(new.path.starts_with(&prefix));
        assert_eq!(new.meta, old.meta, "hashes are copied unchanged");
    }
    assert_eq!(fingerprint(&out), fingerprint(&consumer));
}

#[test]
fn nested_file_listings_are_preserved() {
    let mut cached = record("A", &[]);
    let mut dir = LockEntry::with_hash("nodes/A/frames", "md5", "dir.hash");
    dir.meta.insert(
        "files".to_string(),
        json!([{"relpath": "0.xyz", "md5": "f0"}, {"relpath": "1.xyz", "md5": "f1"}]),
    );
    cached.outs.push(dir.clone());

    let out = transform(&record("B", &[]), &cached).unwrap();
    assert_eq!(out.outs[0].path, "nodes/B/frames");
    assert_eq!(out.outs[0].files(), dir.files());
}

#[test]
fn output_outside_the_working_dir_is_a_mismatch() {
    let cached = record("A", &[("outputs/A.json", "m1")]);
    let err = transform(&record("B", &[]), &cached).unwrap_err();
    assert_eq!(
        err,
        LockError::PathMismatch {
            path: "outputs/A.json".to_string(),
            working_dir: "nodes/A".to_string(),
        }
    );
}

#[test]
fn repeated_working_dir_is_ambiguous() {
    let cached = record("A", &[("nodes/A/nodes/A/out.json", "m1")]);
    let err = transform(&record("B", &[]), &cached).unwrap_err();
    assert!(matches!(err, LockError::AmbiguousPath { .. }));
}

#[test]
fn commands_without_name_token_cannot_be_transformed() {
    let cached = record("A", &[("nodes/A/out.json", "m1")]);
    let consumer = LockRecord::new("python train.py");
    let err = transform(&consumer, &cached).unwrap_err();
    assert_eq!(
        err,
        LockError::NamingConvention {
            cmd: "python train.py".to_string()
        }
    );
}

#[test]
fn remap_matches_whole_segments_only() {
    assert_eq!(
        remap_path("nodes/A/out.json", "nodes/A", "nodes/B").unwrap(),
        "nodes/B/out.json"
    );
    assert_eq!(remap_path("nodes/A", "nodes/A", "nodes/B").unwrap(), "nodes/B");
    assert!(matches!(
        remap_path("nodes/AB/out.json", "nodes/A", "nodes/B"),
        Err(LockError::PathMismatch { .. })
    ));
    assert_eq!(
        remap_path("prefix/nodes/A/x", "nodes/A", "nodes/grp/B").unwrap(),
        "prefix/nodes/grp/B/x"
    );
}

#[test]
fn working_dirs_follow_the_naming_convention() {
    assert_eq!(working_dir("Node"), "nodes/Node");
    assert_eq!(working_dir("Node_1"), "nodes/Node_1");
    assert_eq!(working_dir("grp_Node"), "nodes/grp/Node");
    assert_eq!(working_dir("grp_a_Node_1"), "nodes/grp/a/Node_1");
}
