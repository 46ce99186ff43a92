// src/store/mod.rs

//! Relational store: the only coordination medium between workers.
//!
//! Every operation opens its own SQLite connection, so a [`Store`] is a cheap
//! clonable handle that can be moved into blocking tasks. Status-affecting
//! read-then-write sequences run inside one `IMMEDIATE` transaction, which
//! takes SQLite's write lock up front; two claimers can never both act on the
//! same snapshot.

pub mod cache;
pub mod claim;
pub mod ingest;
pub mod models;
pub mod queries;
pub mod registry;

use std::path::{Path, PathBuf};

use rusqlite::Connection;
use rusqlite_migration::{M, Migrations};
use tracing::{debug, info};

use crate::errors::{Result, StagehandError};

pub use claim::{ClaimRequest, Claimed, JobReport, ResetOutcome};
pub use ingest::ExperimentMeta;
pub use models::{Experiment, Job, Stage, StageDependency, Worker};
pub use queries::{GraphNode, StageDump, StatusCounts};
pub use registry::{HEARTBEAT_EXPIRED, ReclaimReport, WorkerInfo, machine_name};

/// Default database location, relative to the project root.
pub const DEFAULT_DB_PATH: &str = ".stagehand/stagehand.db";

const SQLITE_SCHEME: &str = "sqlite://";

fn migrations() -> Migrations<'static> {
    Migrations::new(vec![
        M::up(
            "CREATE TABLE experiments ( \
             id INTEGER PRIMARY KEY, \
             base TEXT NOT NULL, \
             origin TEXT NOT NULL, \
             machine TEXT NOT NULL, \
             created_at TEXT NOT NULL, \
             updated_at TEXT NOT NULL \
             ) STRICT",
        ),
        M::up(
            "CREATE TABLE workers ( \
             id INTEGER PRIMARY KEY, \
             name TEXT NOT NULL, \
             machine TEXT NOT NULL, \
             cwd TEXT NOT NULL, \
             pid INTEGER NOT NULL, \
             status TEXT NOT NULL, \
             last_seen TEXT NOT NULL, \
             started_at TEXT NOT NULL, \
             finished_at TEXT \
             ) STRICT",
        ),
        // `fingerprint` and `result` stay empty until the stage completes.
        M::up(
            "CREATE TABLE stages ( \
             id INTEGER PRIMARY KEY, \
             experiment_id INTEGER NOT NULL REFERENCES experiments(id), \
             name TEXT NOT NULL, \
             cmd TEXT NOT NULL, \
             status TEXT NOT NULL, \
             queue TEXT NOT NULL, \
             fingerprint TEXT NOT NULL DEFAULT '', \
             result TEXT NOT NULL DEFAULT '', \
             capture_stdout INTEGER NOT NULL DEFAULT 1, \
             capture_stderr INTEGER NOT NULL DEFAULT 1, \
             force_rerun INTEGER NOT NULL DEFAULT 0, \
             cache_eligible INTEGER NOT NULL DEFAULT 1, \
             created_at TEXT NOT NULL, \
             updated_at TEXT NOT NULL, \
             started_at TEXT, \
             finished_at TEXT, \
             UNIQUE (experiment_id, name) \
             ) STRICT",
        ),
        M::up("CREATE INDEX stages_status_queue ON stages (status, queue)"),
        M::up("CREATE INDEX stages_fingerprint ON stages (fingerprint)"),
        M::up(
            "CREATE TABLE stage_dependencies ( \
             parent_id INTEGER NOT NULL REFERENCES stages(id), \
             child_id INTEGER NOT NULL REFERENCES stages(id), \
             PRIMARY KEY (parent_id, child_id) \
             ) STRICT",
        ),
        M::up("CREATE INDEX stage_dependencies_child ON stage_dependencies (child_id)"),
        M::up(
            "CREATE TABLE jobs ( \
             id INTEGER PRIMARY KEY, \
             stage_id INTEGER NOT NULL REFERENCES stages(id), \
             worker_id INTEGER NOT NULL REFERENCES workers(id), \
             stdout TEXT NOT NULL DEFAULT '', \
             stderr TEXT NOT NULL DEFAULT '', \
             started_at TEXT NOT NULL, \
             finished_at TEXT \
             ) STRICT",
        ),
    ])
}

/// Handle to a SQLite database file.
#[derive(Debug, Clone)]
pub struct Store {
    path: PathBuf,
}

impl Store {
    /// Open (and migrate) the database named by `url`.
    ///
    /// Accepts `sqlite://<path>` or a bare path. Parent directories are
    /// created as needed.
    pub fn open(url: &str) -> Result<Self> {
        Self::open_path(parse_url(url)?)
    }

    /// Like [`Store::open`], with relative paths resolved against `root`.
    pub fn open_in(root: &Path, url: &str) -> Result<Self> {
        let path = parse_url(url)?;
        if path.is_relative() {
            Self::open_path(root.join(path))
        } else {
            Self::open_path(path)
        }
    }

    fn open_path(path: PathBuf) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let store = Self { path };
        let mut conn = store.connect()?;
        migrations().to_latest(&mut conn)?;
        info!(path = %store.path.display(), "Opened store");
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Fresh connection with the pragmas every operation relies on.
    pub(crate) fn connect(&self) -> Result<Connection> {
        let conn = Connection::open(&self.path)?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "busy_timeout", "5000")?;
        debug!(path = %self.path.display(), "Opened store connection");
        Ok(conn)
    }

    /// Run a store operation on tokio's blocking pool.
    pub async fn run_blocking<T, F>(&self, op: F) -> Result<T>
    where
        F: FnOnce(&Store) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let store = self.clone();
        tokio::task::spawn_blocking(move || op(&store))
            .await
            .map_err(|e| StagehandError::Other(anyhow::anyhow!("store task failed: {e}")))?
    }
}

fn parse_url(url: &str) -> Result<PathBuf> {
    let raw = url.trim();
    let path = raw.strip_prefix(SQLITE_SCHEME).unwrap_or(raw);
    if path.is_empty() {
        return Err(StagehandError::ConfigError(format!(
            "store url '{url}' does not name a database file"
        )));
    }
    if path.contains("://") {
        return Err(StagehandError::ConfigError(format!(
            "unsupported store url '{url}' (expected sqlite://<path> or a file path)"
        )));
    }
    Ok(PathBuf::from(path))
}
