// src/tool/shell.rs

//! Reference build tool: runs `[stage.<name>]` commands through the shell.
//!
//! State lives under `<root>/.stagehand/`:
//!
//! - `lock.json`: stage name -> last [`LockRecord`], written under an `fs2`
//!   advisory lock on `tool.lock` (contention surfaces as `ToolBusy`),
//! - `cache/<aa>/<rest>`: content-addressed copies of every output file, so
//!   any recorded output can be checked out again.

use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use anyhow::Context;
use fs2::FileExt;
use serde_json::Value;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::config::{ProjectConfig, StageConfig, ensure_has_stages, stage_edges};
use crate::errors::{Result, StagehandError};
use crate::graph::{StageGraph, StageNode};
use crate::lock::{LockEntry, LockRecord};
use crate::tool::hash::{HASH_ALGO, compute_file_hash, hash_entry};
use crate::tool::{BuildTool, ExecOutput, ToolFuture};
use crate::types::StageCommand;

pub const STATE_DIR: &str = ".stagehand";
const LOCK_STATE_FILE: &str = "lock.json";
const TOOL_LOCK_FILE: &str = "tool.lock";
const OBJECT_DIR: &str = "cache";

/// Params file name recorded in lock records.
pub const PARAMS_FILE: &str = "Stagehand.toml";

type LockState = BTreeMap<String, LockRecord>;

#[derive(Debug, Clone)]
pub struct ShellBuildTool {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    root: PathBuf,
    stages: BTreeMap<String, StageConfig>,
}

/// Held while lock state is being rewritten; the OS lock drops with the file.
struct StateGuard {
    _file: File,
}

impl ShellBuildTool {
    pub fn new(root: impl Into<PathBuf>, config: &ProjectConfig) -> Result<Self> {
        ensure_has_stages(config)?;
        Ok(Self {
            inner: Arc::new(Inner {
                root: root.into(),
                stages: config.stage.clone(),
            }),
        })
    }

    pub fn root(&self) -> &Path {
        &self.inner.root
    }

    /// Run synchronous filesystem work on the blocking pool.
    async fn blocking<T, F>(&self, op: F) -> Result<T>
    where
        F: FnOnce(&Inner) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || op(&inner))
            .await
            .map_err(|e| StagehandError::Tool(format!("tool task failed: {e}")))?
    }
}

impl Inner {
    fn stage_config(&self, name: &str) -> Result<&StageConfig> {
        self.stages
            .get(name)
            .ok_or_else(|| StagehandError::StageNotFound(name.to_string()))
    }

    fn state_dir(&self) -> PathBuf {
        self.root.join(STATE_DIR)
    }

    fn object_path(&self, hash: &str) -> PathBuf {
        let (head, tail) = hash.split_at(hash.len().min(2));
        self.state_dir().join(OBJECT_DIR).join(head).join(tail)
    }

    fn build_graph(&self) -> Result<StageGraph> {
        let mut graph = StageGraph::new();
        for (name, stage) in &self.stages {
            let mut node = StageNode::new(name.clone(), stage.cmd.clone());
            node.cacheable = stage.cache;
            graph.add_stage(node)?;
        }
        for (parent, child) in stage_edges(&self.stages) {
            graph.add_dependency(parent, child)?;
        }
        Ok(graph)
    }

    fn lock_state(&self) -> Result<StateGuard> {
        let dir = self.state_dir();
        fs::create_dir_all(&dir)?;
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(dir.join(TOOL_LOCK_FILE))?;
        match file.try_lock_exclusive() {
            Ok(()) => Ok(StateGuard { _file: file }),
            Err(e) if e.kind() == fs2::lock_contended_error().kind() => Err(
                StagehandError::ToolBusy(format!("lock state at {:?} is held elsewhere", dir)),
            ),
            Err(e) => Err(e.into()),
        }
    }

    fn read_state(&self) -> Result<LockState> {
        let path = self.state_dir().join(LOCK_STATE_FILE);
        if !path.exists() {
            return Ok(LockState::new());
        }
        let contents = fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    /// Caller must hold a [`StateGuard`].
    fn write_state(&self, state: &LockState) -> Result<()> {
        let dir = self.state_dir();
        fs::create_dir_all(&dir)?;
        let tmp = dir.join(format!("{LOCK_STATE_FILE}.tmp"));
        fs::write(&tmp, serde_json::to_string_pretty(state)?)?;
        fs::rename(&tmp, dir.join(LOCK_STATE_FILE))?;
        Ok(())
    }

    fn update_state(&self, name: &str, record: LockRecord) -> Result<()> {
        let _guard = self.lock_state()?;
        let mut state = self.read_state()?;
        state.insert(name.to_string(), record);
        self.write_state(&state)?;
        debug!(stage = name, "Wrote lock state");
        Ok(())
    }

    /// Lock record of the stage as it stands on disk right now.
    ///
    /// Missing inputs are an error; missing outputs are left out unless
    /// `require_outs` is set.
    fn current_lock(&self, name: &str, require_outs: bool) -> Result<LockRecord> {
        let stage = self.stage_config(name)?;
        let mut record = LockRecord::new(stage.cmd.clone());

        if !stage.params.is_empty() {
            let values: serde_json::Map<String, Value> = stage
                .params
                .iter()
                .map(|(k, v)| -> Result<(String, Value)> { Ok((k.clone(), serde_json::to_value(v)?)) })
                .collect::<Result<_>>()?;
            let mut by_stage = BTreeMap::new();
            by_stage.insert(name.to_string(), Value::Object(values));
            record.params.insert(PARAMS_FILE.to_string(), by_stage);
        }

        for dep in &stage.deps {
            if !self.root.join(dep).exists() {
                return Err(StagehandError::Tool(format!(
                    "dependency '{dep}' of stage '{name}' does not exist"
                )));
            }
            record.deps.push(hash_entry(&self.root, dep)?);
        }

        for out in &stage.outs {
            if self.root.join(out).exists() {
                record.outs.push(hash_entry(&self.root, out)?);
            } else if require_outs {
                return Err(StagehandError::Tool(format!(
                    "stage '{name}' did not produce output '{out}'"
                )));
            }
        }
        Ok(record)
    }

    fn is_up_to_date(&self, name: &str, state: &LockState) -> Result<bool> {
        let stage = self.stage_config(name)?;
        let Some(recorded) = state.get(name) else {
            return Ok(false);
        };
        if stage.deps.iter().any(|dep| !self.root.join(dep).exists()) {
            return Ok(false);
        }

        let current = self.current_lock(name, false)?;
        if current.dependency_view() != recorded.dependency_view() {
            debug!(stage = name, "Command, params or inputs changed");
            return Ok(false);
        }

        let declared: BTreeSet<&str> = stage.outs.iter().map(String::as_str).collect();
        let stored: BTreeSet<&str> = recorded.outs.iter().map(|o| o.path.as_str()).collect();
        if declared != stored {
            debug!(stage = name, "Recorded outputs differ from declared outputs");
            return Ok(false);
        }

        for out in &recorded.outs {
            if !self.root.join(&out.path).exists() {
                return Ok(false);
            }
            let on_disk = hash_entry(&self.root, &out.path)?;
            if on_disk.digest() != out.digest() {
                debug!(stage = name, path = %out.path, "Output changed on disk");
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Copy every output file of `record` into the object cache.
    fn stash_outputs(&self, record: &LockRecord) -> Result<()> {
        for out in &record.outs {
            for (src, hash) in self.entry_files(out)? {
                let object = self.object_path(&hash);
                if object.exists() {
                    continue;
                }
                if let Some(parent) = object.parent() {
                    fs::create_dir_all(parent)?;
                }
                fs::copy(&src, &object)
                    .with_context(|| format!("stashing {:?} as {:?}", src, object))?;
            }
        }
        Ok(())
    }

    /// Restore every output file of `record` from the object cache.
    fn restore_outputs(&self, record: &LockRecord) -> Result<usize> {
        let mut restored = 0;
        for out in &record.outs {
            for (dest, hash) in self.entry_files(out)? {
                if dest.is_file() && compute_file_hash(&dest)? == hash {
                    continue;
                }
                let object = self.object_path(&hash);
                if !object.is_file() {
                    return Err(StagehandError::Tool(format!(
                        "object {hash} for '{}' is missing from the cache",
                        out.path
                    )));
                }
                if let Some(parent) = dest.parent() {
                    fs::create_dir_all(parent)?;
                }
                fs::copy(&object, &dest)
                    .with_context(|| format!("restoring {:?} from {:?}", dest, object))?;
                restored += 1;
            }
        }
        Ok(restored)
    }

    /// `(absolute path, content hash)` of every file an entry covers.
    fn entry_files(&self, entry: &LockEntry) -> Result<Vec<(PathBuf, String)>> {
        let base = self.root.join(&entry.path);
        if let Some(files) = entry.files() {
            return files
                .iter()
                .map(|file| {
                    let relpath = file.get("relpath").and_then(Value::as_str);
                    let hash = file.get(HASH_ALGO).and_then(Value::as_str);
                    match (relpath, hash) {
                        (Some(relpath), Some(hash)) => Ok((base.join(relpath), hash.to_string())),
                        _ => Err(StagehandError::Tool(format!(
                            "malformed file listing in lock entry '{}'",
                            entry.path
                        ))),
                    }
                })
                .collect();
        }
        match entry.digest() {
            Some(hash) if entry.hash_algo() == Some(HASH_ALGO) => Ok(vec![(base, hash.to_string())]),
            _ => Err(StagehandError::Tool(format!(
                "lock entry '{}' carries no {HASH_ALGO} hash",
                entry.path
            ))),
        }
    }
}

/// Run a stage command in `root` and capture its output.
async fn run_command(root: &Path, name: &str, cmd: &StageCommand) -> Result<ExecOutput> {
    info!(stage = name, cmd = %cmd, "starting stage process");

    let mut command = match cmd {
        StageCommand::Args(args) if !args.is_empty() => {
            let mut c = Command::new(&args[0]);
            c.args(&args[1..]);
            c
        }
        _ if cfg!(windows) => {
            let mut c = Command::new("cmd");
            c.arg("/C").arg(cmd.to_shell());
            c
        }
        _ => {
            let mut c = Command::new("sh");
            c.arg("-c").arg(cmd.to_shell());
            c
        }
    };

    command
        .current_dir(root)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let child = command
        .spawn()
        .with_context(|| format!("spawning process for stage '{name}'"))?;
    let output = child
        .wait_with_output()
        .await
        .with_context(|| format!("waiting for process of stage '{name}'"))?;

    let exit_code = output.status.code().unwrap_or(-1);
    info!(
        stage = name,
        exit_code,
        success = output.status.success(),
        "stage process exited"
    );

    Ok(ExecOutput {
        exit_code,
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

impl BuildTool for ShellBuildTool {
    fn list_graph(&self) -> ToolFuture<'_, StageGraph> {
        Box::pin(async move { self.inner.build_graph() })
    }

    fn status(&self, names: Vec<String>) -> ToolFuture<'_, Vec<String>> {
        Box::pin(self.blocking(move |inner| {
            let state = inner.read_state()?;
            let mut changed = Vec::new();
            for name in names {
                if !inner.is_up_to_date(&name, &state)? {
                    changed.push(name);
                }
            }
            Ok(changed)
        }))
    }

    fn materialize_lock(&self, name: &str) -> ToolFuture<'_, LockRecord> {
        let name = name.to_string();
        Box::pin(self.blocking(move |inner| inner.current_lock(&name, false)))
    }

    fn write_lock(&self, name: &str, record: LockRecord) -> ToolFuture<'_, ()> {
        let name = name.to_string();
        Box::pin(self.blocking(move |inner| {
            inner.stage_config(&name)?;
            inner.update_state(&name, record)
        }))
    }

    fn execute(&self, name: &str, force: bool) -> ToolFuture<'_, ExecOutput> {
        let name = name.to_string();
        Box::pin(async move {
            let cmd = self.inner.stage_config(&name)?.cmd.clone();

            if !force {
                let check = name.clone();
                let up_to_date = self
                    .blocking(move |inner| {
                        let state = inner.read_state()?;
                        inner.is_up_to_date(&check, &state)
                    })
                    .await?;
                if up_to_date {
                    info!(stage = %name, "Stage didn't change, skipping");
                    return Ok(ExecOutput::success(format!(
                        "Stage '{name}' didn't change, skipping\n"
                    )));
                }
            }

            let output = run_command(&self.inner.root, &name, &cmd).await?;
            if !output.is_success() {
                warn!(stage = %name, exit_code = output.exit_code, "Stage command failed");
                return Ok(output);
            }

            self.blocking(move |inner| {
                let record = inner.current_lock(&name, true)?;
                inner.stash_outputs(&record)?;
                inner.update_state(&name, record)
            })
            .await?;
            Ok(output)
        })
    }

    fn checkout(&self, name: &str) -> ToolFuture<'_, ExecOutput> {
        let name = name.to_string();
        Box::pin(self.blocking(move |inner| {
            let state = inner.read_state()?;
            let record = state.get(&name).ok_or_else(|| {
                StagehandError::Tool(format!("no lock state recorded for stage '{name}'"))
            })?;
            // Filesystem trouble while restoring is a failed checkout, which the
            // worker answers by executing the stage instead.
            let restored = inner.restore_outputs(record).map_err(|e| match e {
                StagehandError::IoError(_) | StagehandError::Other(_) => {
                    StagehandError::Tool(format!("checkout of '{name}' failed: {e}"))
                }
                e => e,
            })?;
            info!(stage = %name, restored, "Checked out outputs");
            Ok(ExecOutput::success(format!(
                "Checked out {restored} file(s) for '{name}'\n"
            )))
        }))
    }

    fn verify_up_to_date(&self, name: &str) -> ToolFuture<'_, bool> {
        let name = name.to_string();
        Box::pin(self.blocking(move |inner| {
            let state = inner.read_state()?;
            inner.is_up_to_date(&name, &state)
        }))
    }
}
