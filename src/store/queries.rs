// src/store/queries.rs

//! Read-only views over the store.

use std::collections::{BTreeMap, HashMap};

use rusqlite::{OptionalExtension, params};
use serde::Serialize;

use crate::errors::{Result, StagehandError};
use crate::graph::split_name;
use crate::store::Store;
use crate::store::models::{
    EXPERIMENT_COLUMNS, Experiment, JOB_COLUMNS, Job, STAGE_COLUMNS, Stage, WORKER_COLUMNS, Worker,
};
use crate::types::StageStatus;

/// Full record of one stage.
#[derive(Debug, Clone, Serialize)]
pub struct StageDump {
    pub stage: Stage,
    pub dependencies: Vec<String>,
    pub dependents: Vec<String>,
    pub jobs: Vec<Job>,
}

/// Number of stages per status; every status is present.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusCounts(BTreeMap<StageStatus, usize>);

impl StatusCounts {
    fn zeroed() -> Self {
        Self(StageStatus::ALL.iter().map(|s| (*s, 0)).collect())
    }

    pub fn get(&self, status: StageStatus) -> usize {
        self.0.get(&status).copied().unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.0.values().sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (StageStatus, usize)> + '_ {
        self.0.iter().map(|(s, n)| (*s, *n))
    }
}

/// One node of an experiment's graph, with its naming-convention group.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GraphNode {
    pub id: i64,
    pub name: String,
    pub group: Vec<String>,
    pub leaf: String,
    pub status: StageStatus,
    pub queue: String,
    pub parents: Vec<String>,
}

impl Store {
    /// Experiments, oldest first, optionally only those from `base`.
    pub fn list_experiments(&self, base: Option<&str>) -> Result<Vec<Experiment>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {EXPERIMENT_COLUMNS} FROM experiments \
             WHERE (?1 IS NULL OR base = ?1) ORDER BY id"
        ))?;
        let rows = stmt.query_map(params![base], Experiment::from_row)?;
        Ok(rows.collect::<rusqlite::Result<_>>()?)
    }

    pub fn latest_experiment(&self) -> Result<Option<Experiment>> {
        let conn = self.connect()?;
        Ok(conn
            .query_row(
                &format!("SELECT {EXPERIMENT_COLUMNS} FROM experiments ORDER BY id DESC LIMIT 1"),
                [],
                Experiment::from_row,
            )
            .optional()?)
    }

    pub fn stage(&self, experiment: i64, name: &str) -> Result<Stage> {
        let conn = self.connect()?;
        conn.query_row(
            &format!("SELECT {STAGE_COLUMNS} FROM stages WHERE experiment_id = ?1 AND name = ?2"),
            params![experiment, name],
            Stage::from_row,
        )
        .optional()?
        .ok_or_else(|| StagehandError::StageNotFound(name.to_string()))
    }

    /// Stages of an experiment in ingestion order.
    pub fn stages(&self, experiment: i64) -> Result<Vec<Stage>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {STAGE_COLUMNS} FROM stages WHERE experiment_id = ?1 ORDER BY id"
        ))?;
        let rows = stmt.query_map(params![experiment], Stage::from_row)?;
        Ok(rows.collect::<rusqlite::Result<_>>()?)
    }

    pub fn dump_stage(&self, experiment: i64, name: &str) -> Result<StageDump> {
        let stage = self.stage(experiment, name)?;
        let conn = self.connect()?;

        let names = |sql: &str| -> Result<Vec<String>> {
            let mut stmt = conn.prepare(sql)?;
            let rows = stmt.query_map(params![stage.id], |row| row.get(0))?;
            Ok(rows.collect::<rusqlite::Result<_>>()?)
        };
        let dependencies = names(
            "SELECT s.name FROM stage_dependencies d JOIN stages s ON s.id = d.parent_id \
             WHERE d.child_id = ?1 ORDER BY s.name",
        )?;
        let dependents = names(
            "SELECT s.name FROM stage_dependencies d JOIN stages s ON s.id = d.child_id \
             WHERE d.parent_id = ?1 ORDER BY s.name",
        )?;

        let jobs = {
            let mut stmt = conn.prepare(&format!(
                "SELECT {JOB_COLUMNS} FROM jobs WHERE stage_id = ?1 ORDER BY id"
            ))?;
            let rows = stmt.query_map(params![stage.id], Job::from_row)?;
            rows.collect::<rusqlite::Result<_>>()?
        };

        Ok(StageDump {
            stage,
            dependencies,
            dependents,
            jobs,
        })
    }

    /// All workers, or just the one with `id`.
    pub fn list_workers(&self, id: Option<i64>) -> Result<Vec<Worker>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {WORKER_COLUMNS} FROM workers WHERE (?1 IS NULL OR id = ?1) ORDER BY id"
        ))?;
        let rows = stmt.query_map(params![id], Worker::from_row)?;
        Ok(rows.collect::<rusqlite::Result<_>>()?)
    }

    /// Stage counts per status, for one experiment or the whole store.
    pub fn count_by_status(&self, experiment: Option<i64>) -> Result<StatusCounts> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT status, COUNT(*) FROM stages \
             WHERE (?1 IS NULL OR experiment_id = ?1) GROUP BY status",
        )?;
        let rows = stmt.query_map(params![experiment], |row| {
            Ok((row.get::<_, StageStatus>(0)?, row.get::<_, i64>(1)?))
        })?;

        let mut counts = StatusCounts::zeroed();
        for row in rows {
            let (status, n) = row?;
            counts.0.insert(status, usize::try_from(n).unwrap_or_default());
        }
        Ok(counts)
    }

    /// Graph view of an experiment, built fresh from the persisted rows.
    pub fn experiment_graph(&self, experiment: i64) -> Result<Vec<GraphNode>> {
        let stages = self.stages(experiment)?;
        let conn = self.connect()?;

        let mut parents: HashMap<i64, Vec<String>> = HashMap::new();
        {
            let mut stmt = conn.prepare(
                "SELECT d.child_id, p.name FROM stage_dependencies d \
                 JOIN stages p ON p.id = d.parent_id \
                 WHERE p.experiment_id = ?1 ORDER BY p.name",
            )?;
            let rows = stmt.query_map(params![experiment], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
            })?;
            for row in rows {
                let (child, parent) = row?;
                parents.entry(child).or_default().push(parent);
            }
        }

        Ok(stages
            .into_iter()
            .map(|stage| {
                let split = split_name(&stage.name);
                GraphNode {
                    id: stage.id,
                    parents: parents.remove(&stage.id).unwrap_or_default(),
                    group: split.group,
                    leaf: split.leaf,
                    status: stage.status,
                    queue: stage.queue,
                    name: stage.name,
                }
            })
            .collect())
    }
}
