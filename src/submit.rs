// src/submit.rs

//! Submission: build-tool graph -> persisted experiment.

use std::collections::HashSet;

use globset::Glob;
use tracing::{debug, info};

use crate::errors::{Result, StagehandError};
use crate::graph::StageGraph;
use crate::queue::QueueRules;
use crate::retry::{RetryPolicy, retry_async};
use crate::store::{ExperimentMeta, Store};
use crate::tool::BuildTool;

#[derive(Debug, Clone)]
pub struct SubmitOptions {
    /// Stage names to submit (plus their ancestors). Empty means all.
    pub targets: Vec<String>,
    /// Treat `targets` as glob patterns.
    pub glob: bool,
    /// Let stages use the fingerprint cache.
    pub cache: bool,
    /// Re-run every submitted stage even if unchanged.
    pub force: bool,
    pub meta: ExperimentMeta,
    pub rules: QueueRules,
    pub retry: RetryPolicy,
}

impl Default for SubmitOptions {
    fn default() -> Self {
        Self {
            targets: Vec::new(),
            glob: false,
            cache: true,
            force: false,
            meta: ExperimentMeta::default(),
            rules: QueueRules::default(),
            retry: RetryPolicy::default(),
        }
    }
}

/// Ask the build tool for its graph and change status, then ingest it.
pub async fn submit(store: &Store, tool: &dyn BuildTool, opts: SubmitOptions) -> Result<i64> {
    let full = retry_async(&opts.retry, "list_graph", || tool.list_graph()).await?;
    let targets = resolve_targets(&full, &opts.targets, opts.glob)?;
    let mut graph = if targets.is_empty() {
        full
    } else {
        full.subgraph_with_ancestors(&targets)?
    };

    let names: Vec<String> = graph.stages().map(|n| n.name.clone()).collect();
    let changed: HashSet<String> = retry_async(&opts.retry, "status", || tool.status(names.clone()))
        .await?
        .into_iter()
        .collect();

    for node in graph.stages_mut() {
        node.changed = changed.contains(&node.name);
        node.force = opts.force;
    }
    debug!(
        stages = graph.len(),
        changed = changed.len(),
        force = opts.force,
        "Resolved submission"
    );

    let SubmitOptions {
        meta, rules, cache, ..
    } = opts;
    let experiment_id = store
        .run_blocking(move |store| store.ingest(&graph, &rules, &meta, cache))
        .await?;

    info!(experiment_id, "Submitted experiment");
    Ok(experiment_id)
}

/// Expand target names or patterns into concrete stage names.
pub fn resolve_targets(graph: &StageGraph, targets: &[String], glob: bool) -> Result<Vec<String>> {
    let mut resolved = Vec::new();
    for target in targets {
        if glob {
            let matcher = Glob::new(target)
                .map_err(|e| {
                    StagehandError::ConfigError(format!("invalid stage pattern '{target}': {e}"))
                })?
                .compile_matcher();
            let before = resolved.len();
            resolved.extend(
                graph
                    .stages()
                    .filter(|n| matcher.is_match(&n.name))
                    .map(|n| n.name.clone()),
            );
            if resolved.len() == before {
                return Err(StagehandError::StageNotFound(target.clone()));
            }
        } else if graph.contains(target) {
            resolved.push(target.clone());
        } else {
            return Err(StagehandError::StageNotFound(target.clone()));
        }
    }
    resolved.sort();
    resolved.dedup();
    Ok(resolved)
}
