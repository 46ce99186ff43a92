// src/store/ingest.rs

use std::collections::HashMap;

use chrono::Utc;
use rusqlite::{TransactionBehavior, params};
use tracing::{debug, info};

use crate::errors::{Result, StagehandError};
use crate::graph::StageGraph;
use crate::queue::QueueRules;
use crate::store::Store;
use crate::types::StageStatus;

/// Bookkeeping attached to a submission.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExperimentMeta {
    /// Revision the graph was submitted from.
    pub base: String,
    pub origin: String,
    pub machine: String,
}

impl Store {
    /// Persist a stage DAG as a new experiment and return its id.
    ///
    /// Stages are inserted parents-first in a single transaction, so pollers
    /// never observe a partially ingested graph. A stage starts `pending` when
    /// the build tool reported it changed, otherwise `cached`. `force` is
    /// stored as its own flag.
    pub fn ingest(
        &self,
        graph: &StageGraph,
        rules: &QueueRules,
        meta: &ExperimentMeta,
        cache: bool,
    ) -> Result<i64> {
        let order = graph.topological_order()?;

        let mut conn = self.connect()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let now = Utc::now();

        tx.execute(
            "INSERT INTO experiments (base, origin, machine, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?4)",
            params![meta.base, meta.origin, meta.machine, now],
        )?;
        let experiment_id = tx.last_insert_rowid();

        let mut ids: HashMap<&str, i64> = HashMap::with_capacity(order.len());
        {
            let mut insert_stage = tx.prepare(
                "INSERT INTO stages \
                 (experiment_id, name, cmd, status, queue, force_rerun, cache_eligible, \
                  created_at, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
            )?;
            for node in &order {
                let status = if node.changed {
                    StageStatus::Pending
                } else {
                    StageStatus::Cached
                };
                let queue = rules.route(&node.name);
                insert_stage.execute(params![
                    experiment_id,
                    node.name,
                    serde_json::to_string(&node.cmd)?,
                    status,
                    queue,
                    node.force,
                    cache && node.cacheable,
                    now,
                ])?;
                ids.insert(node.name.as_str(), tx.last_insert_rowid());
                debug!(stage = %node.name, %status, queue, "Ingested stage");
            }

            let mut insert_edge = tx.prepare(
                "INSERT INTO stage_dependencies (parent_id, child_id) VALUES (?1, ?2)",
            )?;
            for (parent, child) in graph.edges() {
                let lookup = |name: &str| {
                    ids.get(name)
                        .copied()
                        .ok_or_else(|| StagehandError::StageNotFound(name.to_string()))
                };
                insert_edge.execute(params![lookup(parent)?, lookup(child)?])?;
            }
        }
        tx.commit()?;

        info!(
            experiment_id,
            stages = order.len(),
            base = %meta.base,
            "Ingested experiment"
        );
        Ok(experiment_id)
    }
}
