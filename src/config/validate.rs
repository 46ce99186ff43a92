// src/config/validate.rs

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::config::model::{ProjectConfig, RawProjectConfig, stage_edges};
use crate::errors::{Result, StagehandError};
use crate::queue::QueueRules;

impl TryFrom<RawProjectConfig> for ProjectConfig {
    type Error = StagehandError;

    fn try_from(raw: RawProjectConfig) -> std::result::Result<Self, Self::Error> {
        validate_raw_config(&raw)?;
        Ok(ProjectConfig::new_unchecked(raw))
    }
}

fn validate_raw_config(cfg: &RawProjectConfig) -> Result<()> {
    validate_worker_section(cfg)?;
    validate_retry_section(cfg)?;
    validate_queue_rules(cfg)?;
    validate_stage_dependencies(cfg)?;
    validate_dag(cfg)?;
    Ok(())
}

/// The shell build tool has nothing to do without stages.
pub fn ensure_has_stages(cfg: &ProjectConfig) -> Result<()> {
    if cfg.stage.is_empty() {
        return Err(StagehandError::ConfigError(
            "config must contain at least one [stage.<name>] section".to_string(),
        ));
    }
    Ok(())
}

fn validate_worker_section(cfg: &RawProjectConfig) -> Result<()> {
    let worker = &cfg.worker;
    if worker.jobs == 0 {
        return Err(StagehandError::ConfigError(
            "[worker].jobs must be >= 1 (got 0)".to_string(),
        ));
    }
    if worker.poll_interval_ms == 0 {
        return Err(StagehandError::ConfigError(
            "[worker].poll_interval_ms must be >= 1 (got 0)".to_string(),
        ));
    }
    if worker.heartbeat_interval_secs == 0 {
        return Err(StagehandError::ConfigError(
            "[worker].heartbeat_interval_secs must be >= 1 (got 0)".to_string(),
        ));
    }
    // A busy worker must be able to heartbeat before it is considered stale.
    if let Some(reclaim) = worker.reclaim_after_secs {
        if reclaim <= worker.heartbeat_interval_secs {
            return Err(StagehandError::ConfigError(format!(
                "[worker].reclaim_after_secs ({reclaim}) must exceed heartbeat_interval_secs ({})",
                worker.heartbeat_interval_secs
            )));
        }
    }
    Ok(())
}

fn validate_retry_section(cfg: &RawProjectConfig) -> Result<()> {
    let retry = &cfg.retry;
    if retry.max_attempts == 0 {
        return Err(StagehandError::ConfigError(
            "[retry].max_attempts must be >= 1 (got 0)".to_string(),
        ));
    }
    if retry.base_delay_ms > retry.max_delay_ms {
        return Err(StagehandError::ConfigError(format!(
            "[retry].base_delay_ms ({}) must not exceed max_delay_ms ({})",
            retry.base_delay_ms, retry.max_delay_ms
        )));
    }
    Ok(())
}

fn validate_queue_rules(cfg: &RawProjectConfig) -> Result<()> {
    for rule in &cfg.queue {
        if rule.name.trim().is_empty() {
            return Err(StagehandError::ConfigError(format!(
                "[[queue]] rule '{}' has an empty queue name",
                rule.pattern
            )));
        }
    }
    QueueRules::from_pairs(cfg.queue.iter().map(|r| (r.pattern.as_str(), r.name.clone())))?;
    Ok(())
}

fn validate_stage_dependencies(cfg: &RawProjectConfig) -> Result<()> {
    for (name, stage) in cfg.stage.iter() {
        for dep in stage.after.iter() {
            if dep == name {
                return Err(StagehandError::ConfigError(format!(
                    "stage '{}' cannot depend on itself in `after`",
                    name
                )));
            }
            if !cfg.stage.contains_key(dep) {
                return Err(StagehandError::ConfigError(format!(
                    "stage '{}' has unknown dependency '{}' in `after`",
                    name, dep
                )));
            }
        }
    }
    Ok(())
}

fn validate_dag(cfg: &RawProjectConfig) -> Result<()> {
    // Edge direction: parent -> stage, from `after` and from deps/outs overlap.
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();

    for name in cfg.stage.keys() {
        graph.add_node(name.as_str());
    }
    for (parent, child) in stage_edges(&cfg.stage) {
        graph.add_edge(parent, child, ());
    }

    match toposort(&graph, None) {
        Ok(_order) => Ok(()),
        Err(cycle) => Err(StagehandError::DagCycle(format!(
            "cycle detected in stage DAG involving stage '{}'",
            cycle.node_id()
        ))),
    }
}
