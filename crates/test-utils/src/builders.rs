#![allow(dead_code)]

use std::collections::BTreeMap;

use serde_json::{Value, json};
use stagehand::config::{ProjectConfig, RawProjectConfig, StageConfig};
use stagehand::graph::{StageGraph, StageNode, working_dir};
use stagehand::lock::{LockEntry, LockRecord};
use stagehand::types::StageCommand;

/// Default command of a builder stage; encodes the stage name.
pub fn stage_cmd(name: &str) -> String {
    format!("run stage --name {name}")
}

/// Builder for `StageGraph` to simplify test setup.
///
/// Stages default to `changed = true`, cacheable, with [`stage_cmd`].
pub struct GraphBuilder {
    graph: StageGraph,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self {
            graph: StageGraph::new(),
        }
    }

    pub fn stage(self, name: &str) -> Self {
        self.stage_with_cmd(name, stage_cmd(name))
    }

    pub fn stage_with_cmd(mut self, name: &str, cmd: impl Into<StageCommand>) -> Self {
        self.graph
            .add_stage(StageNode::new(name, cmd))
            .expect("add stage");
        self
    }

    /// `child` waits for `parent`.
    pub fn edge(mut self, parent: &str, child: &str) -> Self {
        self.graph
            .add_dependency(parent, child)
            .expect("add dependency");
        self
    }

    /// Mark a stage as unchanged, so it is ingested `cached`.
    pub fn unchanged(mut self, name: &str) -> Self {
        self.node(name).changed = false;
        self
    }

    pub fn forced(mut self, name: &str) -> Self {
        self.node(name).force = true;
        self
    }

    pub fn uncacheable(mut self, name: &str) -> Self {
        self.node(name).cacheable = false;
        self
    }

    pub fn build(self) -> StageGraph {
        self.graph
    }

    fn node(&mut self, name: &str) -> &mut StageNode {
        self.graph
            .stage_mut(name)
            .unwrap_or_else(|| panic!("unknown stage {name}"))
    }
}

impl Default for GraphBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for `LockRecord` values in the shape build tools report them.
pub struct LockBuilder {
    lock: LockRecord,
}

impl LockBuilder {
    pub fn new(cmd: impl Into<StageCommand>) -> Self {
        Self {
            lock: LockRecord::new(cmd),
        }
    }

    /// Lock of a stage following the naming convention, with [`stage_cmd`].
    pub fn for_stage(name: &str) -> Self {
        Self::new(stage_cmd(name))
    }

    pub fn param(mut self, file: &str, key: &str, value: Value) -> Self {
        self.lock
            .params
            .entry(file.to_string())
            .or_default()
            .insert(key.to_string(), value);
        self
    }

    pub fn dep(mut self, path: &str, md5: &str) -> Self {
        self.lock.deps.push(LockEntry::with_hash(path, "md5", md5));
        self
    }

    pub fn out(mut self, path: &str, md5: &str) -> Self {
        self.lock.outs.push(LockEntry::with_hash(path, "md5", md5));
        self
    }

    /// Directory output with a nested file listing.
    pub fn out_dir(mut self, path: &str, md5: &str, files: &[(&str, &str)]) -> Self {
        let mut entry = LockEntry::with_hash(path, "md5", md5);
        let listing = files
            .iter()
            .map(|(relpath, hash)| json!({ "relpath": relpath, "md5": hash }))
            .collect();
        entry.meta.insert("files".to_string(), Value::Array(listing));
        self.lock.outs.push(entry);
        self
    }

    pub fn build(self) -> LockRecord {
        self.lock
    }
}

/// Lock the fake tool reports for `name` when nothing else is configured.
///
/// The dependency hash is derived from the name, so distinct stages get
/// distinct fingerprints.
pub fn default_lock(name: &str) -> LockRecord {
    LockBuilder::for_stage(name)
        .dep(&format!("inputs/{name}.txt"), &format!("in-{name}"))
        .out(&format!("{}/out.json", working_dir(name)), &format!("out-{name}"))
        .build()
}

/// Builder for `ProjectConfig` to simplify test setup.
pub struct ProjectConfigBuilder {
    config: RawProjectConfig,
}

impl ProjectConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: RawProjectConfig::default(),
        }
    }

    pub fn with_stage(mut self, name: &str, stage: StageConfig) -> Self {
        self.config.stage.insert(name.to_string(), stage);
        self
    }

    pub fn with_store_url(mut self, url: &str) -> Self {
        self.config.store.url = Some(url.to_string());
        self
    }

    pub fn build(self) -> ProjectConfig {
        ProjectConfig::try_from(self.config).expect("Failed to build valid config from builder")
    }
}

impl Default for ProjectConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for `StageConfig`.
pub struct StageConfigBuilder {
    stage: StageConfig,
}

impl StageConfigBuilder {
    pub fn new(cmd: &str) -> Self {
        Self {
            stage: StageConfig {
                cmd: StageCommand::Shell(cmd.to_string()),
                after: vec![],
                deps: vec![],
                outs: vec![],
                params: BTreeMap::new(),
                cache: true,
            },
        }
    }

    pub fn after(mut self, dep: &str) -> Self {
        self.stage.after.push(dep.to_string());
        self
    }

    pub fn dep(mut self, path: &str) -> Self {
        self.stage.deps.push(path.to_string());
        self
    }

    pub fn out(mut self, path: &str) -> Self {
        self.stage.outs.push(path.to_string());
        self
    }

    pub fn param(mut self, key: &str, value: impl Into<toml::Value>) -> Self {
        self.stage.params.insert(key.to_string(), value.into());
        self
    }

    pub fn cache(mut self, val: bool) -> Self {
        self.stage.cache = val;
        self
    }

    pub fn build(self) -> StageConfig {
        self.stage
    }
}
