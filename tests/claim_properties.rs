// tests/claim_properties.rs

mod common;
use crate::common::builders::GraphBuilder;
use crate::common::{claim, ingest, register, temp_store};

use std::collections::{BTreeMap, BTreeSet};

use proptest::prelude::*;

use stagehand::store::JobReport;
use stagehand::types::StageStatus;

/// `parents[i]` holds indices `< i`, so every generated graph is acyclic.
fn dag_strategy() -> impl Strategy<Value = Vec<BTreeSet<usize>>> {
    (1usize..12).prop_flat_map(|n| {
        (0..n)
            .map(|i| {
                if i == 0 {
                    Just(BTreeSet::new()).boxed()
                } else {
                    proptest::collection::btree_set(0..i, 0..=i.min(3)).boxed()
                }
            })
            .collect::<Vec<_>>()
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn claims_respect_parents_and_never_repeat(
        parents in dag_strategy(),
        failing in proptest::collection::btree_set(0usize..12, 0..3),
    ) {
        let (_dir, store) = temp_store();
        let name = |i: usize| format!("S{i}");

        let mut builder = GraphBuilder::new();
        for i in 0..parents.len() {
            builder = builder.stage(&name(i));
        }
        for (child, ps) in parents.iter().enumerate() {
            for &p in ps {
                builder = builder.edge(&name(p), &name(child));
            }
        }
        let exp = ingest(&store, &builder.build());
        let worker = register(&store, "prop");

        let mut status: BTreeMap<String, StageStatus> = BTreeMap::new();
        while let Some(claimed) = claim(&store, worker) {
            let index: usize = claimed.stage.name[1..].parse().unwrap();
            prop_assert!(!status.contains_key(&claimed.stage.name), "claimed twice");
            for &p in &parents[index] {
                prop_assert_eq!(status.get(&name(p)), Some(&StageStatus::Completed));
            }

            let report = if failing.contains(&index) {
                JobReport::failed("boom")
            } else {
                JobReport::completed(None)
            };
            let stage = store.complete_job(claimed.job.id, &report).unwrap();
            status.insert(stage.name, stage.status);
        }

        // Stages never claimed are exactly those below a failed ancestor.
        for i in 0..parents.len() {
            let blocked = parents[i]
                .iter()
                .any(|&p| status.get(&name(p)) != Some(&StageStatus::Completed));
            prop_assert_eq!(status.contains_key(&name(i)), !blocked);
            if blocked {
                prop_assert_eq!(store.stage(exp, &name(i)).unwrap().status, StageStatus::Pending);
            }
        }
        prop_assert_eq!(store.count_by_status(Some(exp)).unwrap().total(), parents.len());
    }
}
