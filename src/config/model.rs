// src/config/model.rs

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Deserialize;

use crate::errors::Result;
use crate::queue::QueueRules;
use crate::retry::RetryPolicy;
use crate::store::DEFAULT_DB_PATH;
use crate::types::StageCommand;

/// Project file exactly as deserialized from TOML.
///
/// ```toml
/// [store]
/// url = "sqlite://.stagehand/stagehand.db"
///
/// [worker]
/// jobs = 2
/// idle_timeout_secs = 30
///
/// [[queue]]
/// pattern = "gpu_*"
/// name = "gpu"
///
/// [stage.prepare]
/// cmd = "python prepare.py --name prepare"
/// deps = ["data/raw.csv"]
/// outs = ["nodes/prepare/data.csv"]
///
/// [stage.train]
/// cmd = "python train.py --name train"
/// after = ["prepare"]
/// ```
///
/// Every section is optional. Use [`ProjectConfig::try_from`] to validate.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawProjectConfig {
    #[serde(default)]
    pub store: StoreSection,

    #[serde(default)]
    pub worker: WorkerSection,

    #[serde(default)]
    pub retry: RetrySection,

    /// Ordered `[[queue]]` routing rules.
    #[serde(default)]
    pub queue: Vec<QueueRuleConfig>,

    /// `[stage.<name>]` tables, keyed by stage name.
    #[serde(default)]
    pub stage: BTreeMap<String, StageConfig>,
}

/// Validated project configuration.
#[derive(Debug, Clone)]
pub struct ProjectConfig {
    pub store: StoreSection,
    pub worker: WorkerSection,
    pub retry: RetrySection,
    pub queue: Vec<QueueRuleConfig>,
    pub stage: BTreeMap<String, StageConfig>,
}

impl ProjectConfig {
    /// Build without validation; callers go through `TryFrom`.
    pub(crate) fn new_unchecked(raw: RawProjectConfig) -> Self {
        Self {
            store: raw.store,
            worker: raw.worker,
            retry: raw.retry,
            queue: raw.queue,
            stage: raw.stage,
        }
    }

    pub fn queue_rules(&self) -> Result<QueueRules> {
        QueueRules::from_pairs(
            self.queue
                .iter()
                .map(|rule| (rule.pattern.as_str(), rule.name.clone())),
        )
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry.policy()
    }

    pub fn store_url(&self) -> &str {
        self.store.url.as_deref().unwrap_or(DEFAULT_DB_PATH)
    }
}

/// `[store]` section.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StoreSection {
    /// `sqlite://<path>` or a bare path. Overridden by `STAGEHAND_DB_URL`.
    #[serde(default)]
    pub url: Option<String>,
}

/// `[worker]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkerSection {
    /// Number of independent poll loops per worker process.
    #[serde(default = "default_jobs")]
    pub jobs: usize,

    /// A loop exits after finding no work for this long.
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// How often a busy worker refreshes `last_seen`.
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,

    /// Reclaim work from workers silent for this long. Off when unset.
    #[serde(default)]
    pub reclaim_after_secs: Option<u64>,

    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub machine: Option<String>,
}

fn default_jobs() -> usize {
    1
}

fn default_idle_timeout_secs() -> u64 {
    30
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_heartbeat_interval_secs() -> u64 {
    10
}

impl Default for WorkerSection {
    fn default() -> Self {
        Self {
            jobs: default_jobs(),
            idle_timeout_secs: default_idle_timeout_secs(),
            poll_interval_ms: default_poll_interval_ms(),
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            reclaim_after_secs: None,
            name: None,
            machine: None,
        }
    }
}

impl WorkerSection {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn reclaim_after(&self) -> Option<Duration> {
        self.reclaim_after_secs.map(Duration::from_secs)
    }
}

/// `[retry]` section, applied to store claims and build-tool calls.
#[derive(Debug, Clone, Deserialize)]
pub struct RetrySection {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,

    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_max_attempts() -> usize {
    5
}

fn default_base_delay_ms() -> u64 {
    100
}

fn default_max_delay_ms() -> u64 {
    5000
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl RetrySection {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_attempts,
            Duration::from_millis(self.base_delay_ms),
            Duration::from_millis(self.max_delay_ms),
        )
    }
}

/// One `[[queue]]` rule.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct QueueRuleConfig {
    pub pattern: String,
    pub name: String,
}

/// `[stage.<name>]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct StageConfig {
    /// Shell string or argument list.
    pub cmd: StageCommand,

    /// Stages this one waits for, in addition to those producing its `deps`.
    #[serde(default)]
    pub after: Vec<String>,

    /// Input files or directories, relative to the project root.
    #[serde(default)]
    pub deps: Vec<String>,

    /// Output files or directories, relative to the project root.
    #[serde(default)]
    pub outs: Vec<String>,

    /// Parameters recorded in the lock record under the stage's name.
    #[serde(default)]
    pub params: BTreeMap<String, toml::Value>,

    /// Participates in the fingerprint cache.
    #[serde(default = "default_cache")]
    pub cache: bool,
}

fn default_cache() -> bool {
    true
}

/// `(parent, child)` pairs implied by the stage tables: every `after` entry,
/// plus an edge from each stage whose `outs` contain another stage's `deps`.
pub fn stage_edges(stages: &BTreeMap<String, StageConfig>) -> Vec<(&str, &str)> {
    let mut edges: Vec<(&str, &str)> = Vec::new();
    for (name, stage) in stages {
        for parent in &stage.after {
            edges.push((parent.as_str(), name.as_str()));
        }
        for (producer, other) in stages {
            if producer == name {
                continue;
            }
            let produces = stage
                .deps
                .iter()
                .any(|dep| other.outs.iter().any(|out| path_within(dep, out)));
            if produces {
                edges.push((producer.as_str(), name.as_str()));
            }
        }
    }
    edges.sort_unstable();
    edges.dedup();
    edges
}

fn path_within(path: &str, dir: &str) -> bool {
    let path = path.trim_end_matches('/');
    let dir = dir.trim_end_matches('/');
    path == dir || path.strip_prefix(dir).is_some_and(|rest| rest.starts_with('/'))
}
