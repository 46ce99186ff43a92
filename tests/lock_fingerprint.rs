// tests/lock_fingerprint.rs

mod common;
use crate::common::builders::{GraphBuilder, LockBuilder};
use crate::common::{claim, ingest, init_tracing, register, temp_store};

use serde_json::{Value, json};

use stagehand::lock::{LockRecord, NODE_NAME_PLACEHOLDER, fingerprint, normalize};
use stagehand::store::JobReport;
use stagehand::types::StageCommand;

fn lock(value: Value) -> LockRecord {
    serde_json::from_value(value).expect("valid lock record")
}

#[test]
fn normalize_strips_name_and_paths() {
    let raw = lock(json!({
        "cmd": "zntrack run zntrack.examples.AddNodeNumbers --name A_AddNodeNumbers",
        "params": {"params.yaml": {"A_AddNodeNumbers": {"params": 644999}}},
        "deps": [
            {"path": "nodes/A/1/ParamsToOuts/outs.json", "hash": "md5", "md5": "fb6d880180fbf208fab297f75d32c5ce"},
            {"path": "nodes/A/1/ParamsToOuts_1/outs.json", "hash": "md5", "md5": "fb6d880180fbf208fab297f75d32c5ce"}
        ],
        "outs": [
            {"path": "nodes/A/AddNodeNumbers/node-meta.json", "hash": "md5", "md5": "461013724d26fce139a6586d6635b42c"},
            {"path": "nodes/A/AddNodeNumbers/sum.json", "hash": "md5", "md5": "fb6d880180fbf208fab297f75d32c5ce"}
        ]
    }));

    let expected = json!({
        "cmd": "zntrack run zntrack.examples.AddNodeNumbers --name <node-name>",
        "params": {"params.yaml": {"<node-name>": {"params": 644999}}},
        "deps": [
            {"hash": "md5", "md5": "fb6d880180fbf208fab297f75d32c5ce"},
            {"hash": "md5", "md5": "fb6d880180fbf208fab297f75d32c5ce"}
        ],
        "outs": [
            {"hash": "md5", "md5": "461013724d26fce139a6586d6635b42c"},
            {"hash": "md5", "md5": "fb6d880180fbf208fab297f75d32c5ce"}
        ]
    });

    assert_eq!(normalize(&raw).into_value(), expected);
}

#[test]
fn normalize_keeps_params_of_other_keys() {
    let raw = lock(json!({
        "cmd": "zntrack run package.MyNode --name MyNode",
        "params": {
            "cp2k.yaml": {"basis": "DZVP-MOLOPT-SR-GTH"},
            "params.yaml": {"MyNode": {"params": 644999}}
        },
        "outs": [
            {"path": "nodes/MyNode/node-meta.json", "hash": "md5", "md5": "461013724d0429e139a6586d6635b42c"}
        ]
    }));

    let expected = json!({
        "cmd": "zntrack run package.MyNode --name <node-name>",
        "params": {
            "cp2k.yaml": {"basis": "DZVP-MOLOPT-SR-GTH"},
            "params.yaml": {"<node-name>": {"params": 644999}}
        },
        "outs": [
            {"hash": "md5", "md5": "461013724d0429e139a6586d6635b42c"}
        ]
    });

    assert_eq!(normalize(&raw).into_value(), expected);
}

#[test]
fn normalize_without_params_or_deps() {
    let raw = lock(json!({
        "cmd": "zntrack run package.MyNode --name MyNode",
        "outs": [
            {"path": "nodes/MyNode/node-meta.json", "hash": "md5", "md5": "461013724d0429e139a6586d6635b42c"}
        ]
    }));

    let expected = json!({
        "cmd": "zntrack run package.MyNode --name <node-name>",
        "outs": [{"hash": "md5", "md5": "461013724d0429e139a6586d6635b42c"}]
    });

    assert_eq!(normalize(&raw).into_value(), expected);
}

#[test]
fn locks_differing_in_name_and_paths_share_a_fingerprint() {
    let a = lock(json!({
        "cmd": "zntrack run package.MyNode --name MyNode_1",
        "params": {"params.yaml": {"MyNode_1": {"params": 644999}}},
        "deps": [
            {"path": "nodes/SomeNodeA/ParamsToOuts_1/outs.json", "hash": "md5", "md5": "fb6d880180fbf208fab297f75d32c5ce"}
        ],
        "outs": [
            {"path": "nodes/MyNode_2/node-meta.json", "hash": "md5", "md5": "461013724d0429e139a6586d6635b42c"}
        ]
    }));
    let b = lock(json!({
        "cmd": "zntrack run package.MyNode --name MyNode_2",
        "params": {"params.yaml": {"MyNode_2": {"params": 644999}}},
        "deps": [
            {"path": "nodes/SomeNodeB/ParamsToOuts_2/outs.json", "hash": "md5", "md5": "fb6d880180fbf208fab297f75d32c5ce"}
        ],
        "outs": [
            {"path": "nodes/MyNode_1/node-meta.json", "hash": "md5", "md5": "461013724d0429e139a6586d6635b42c"}
        ]
    }));

    assert_eq!(normalize(&a), normalize(&b));
    assert_eq!(normalize(&a).digest(), normalize(&b).digest());
    assert_eq!(fingerprint(&a), fingerprint(&b));
}

#[test]
fn fingerprint_ignores_outputs_but_not_inputs() {
    let before = LockBuilder::for_stage("A").dep("data.csv", "aaa").build();
    let after = LockBuilder::for_stage("A")
        .dep("data.csv", "aaa")
        .out("nodes/A/out.json", "bbb")
        .build();
    assert_eq!(fingerprint(&before), fingerprint(&after));

    let other_input = LockBuilder::for_stage("A").dep("data.csv", "ccc").build();
    assert_ne!(fingerprint(&before), fingerprint(&other_input));

    let other_param = LockBuilder::for_stage("A")
        .dep("data.csv", "aaa")
        .param("params.yaml", "A", json!({"lr": 0.1}))
        .build();
    assert_ne!(fingerprint(&before), fingerprint(&other_param));
}

#[test]
fn canonical_json_is_independent_of_key_order() {
    let a = lock(json!({
        "cmd": "run --name A",
        "params": {"p.yaml": {"A": {"x": 1, "y": {"b": 2, "a": 1}}}}
    }));
    let b = lock(json!({
        "params": {"p.yaml": {"A": {"y": {"a": 1, "b": 2}, "x": 1}}},
        "cmd": "run --name A"
    }));

    let canonical = normalize(&a).canonical_json();
    assert_eq!(canonical, normalize(&b).canonical_json());
    assert!(canonical.find("\"cmd\"").unwrap() < canonical.find("\"params\"").unwrap());
    assert!(canonical.contains(r#"{"a":1,"b":2}"#));
}

#[test]
fn argument_list_commands_are_generalized() {
    let a = LockRecord::new(StageCommand::Args(
        ["python", "train.py", "--name", "train_1"].map(String::from).to_vec(),
    ));
    let b = LockRecord::new(StageCommand::Args(
        ["python", "train.py", "--name", "train_2"].map(String::from).to_vec(),
    ));

    assert_eq!(
        normalize(&a).into_value()["cmd"],
        json!(["python", "train.py", "--name", NODE_NAME_PLACEHOLDER])
    );
    assert_eq!(fingerprint(&a), fingerprint(&b));
}

#[test]
fn commands_without_a_name_are_kept_verbatim() {
    let raw = LockBuilder::new("make all").dep("Makefile", "abc").build();
    assert_eq!(normalize(&raw).into_value()["cmd"], json!("make all"));
    assert_eq!(raw.name_token(), None);
}

#[test]
fn only_the_stage_name_is_replaced_in_params() {
    let raw = LockBuilder::for_stage("Node")
        .param("params.yaml", "Node", json!(1))
        .param("params.yaml", "NodeExtra", json!(2))
        .build();
    let params = &normalize(&raw).into_value()["params"]["params.yaml"];
    assert_eq!(params[NODE_NAME_PLACEHOLDER], json!(1));
    assert_eq!(params["NodeExtra"], json!(2));
}

#[test]
fn renamed_stages_find_each_other_in_the_store() {
    init_tracing();
    let (_dir, store) = temp_store();

    let raw_for = |name: &str, workdir: &str| {
        LockBuilder::new(format!("zntrack run pkg.Node --name {name}"))
            .param("params.yaml", name, json!({"seed": 42}))
            .dep(&format!("nodes/{workdir}/input.json"), "0f0f")
            .build()
    };
    let grouped = raw_for("grp_X_Node", "Upstream");
    let plain = raw_for("Node_1", "Upstream_1");
    assert_eq!(fingerprint(&grouped), fingerprint(&plain));

    let graph = GraphBuilder::new()
        .stage_with_cmd("grp_X_Node", grouped.cmd.clone())
        .stage_with_cmd("Node_1", plain.cmd.clone())
        .edge("grp_X_Node", "Node_1")
        .build();
    let exp = ingest(&store, &graph);
    let w = register(&store, "w");

    let claimed = claim(&store, w).unwrap();
    assert_eq!(claimed.stage.name, "grp_X_Node");
    let mut result = grouped.clone();
    result.outs.push(stagehand::lock::LockEntry::with_hash(
        "nodes/grp/X/Node/out.json",
        "md5",
        "cafe",
    ));
    store
        .complete_job(claimed.job.id, &JobReport::completed(Some(result.clone())))
        .unwrap();

    let node_1 = store.stage(exp, "Node_1").unwrap();
    let hit = store
        .find_by_fingerprint(&fingerprint(&plain), Some(node_1.id))
        .unwrap()
        .expect("cache hit");
    assert_eq!(hit.name, "grp_X_Node");
    assert_eq!(hit.result, Some(result));

    let grouped_id = store.stage(exp, "grp_X_Node").unwrap().id;
    assert!(
        store
            .find_by_fingerprint(&fingerprint(&plain), Some(grouped_id))
            .unwrap()
            .is_none(),
        "a stage never hits on itself"
    );
    assert!(store.find_by_fingerprint("", None).unwrap().is_none());
}

#[test]
fn lock_records_round_trip_through_json() {
    let raw = LockBuilder::for_stage("A")
        .param("params.yaml", "A", json!({"k": [1, 2]}))
        .dep("in.txt", "1")
        .out_dir("nodes/A/data", "2", &[("x.bin", "3")])
        .build();
    let encoded = raw.to_json().unwrap();
    assert_eq!(LockRecord::from_json(&encoded).unwrap(), raw);
    assert!(encoded.contains(r#""files""#));
}
