use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use stagehand::errors::StagehandError;
use stagehand::graph::StageGraph;
use stagehand::lock::LockRecord;
use stagehand::tool::{BuildTool, ExecOutput, ToolFuture};

use crate::builders::default_lock;

/// Calls a [`FakeBuildTool`] received, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolCall {
    Execute { name: String, force: bool },
    WriteLock(String),
    Checkout(String),
}

#[derive(Debug, Default)]
struct State {
    calls: Vec<ToolCall>,
    /// Remaining `ToolBusy` answers to `execute`, per stage.
    busy: HashMap<String, usize>,
    failing: HashSet<String>,
    hanging: HashSet<String>,
    up_to_date: HashSet<String>,
    locks: HashMap<String, LockRecord>,
    written: HashMap<String, LockRecord>,
}

/// A fake build tool that:
/// - records which stages were executed, checked out or had locks written
/// - answers `execute` successfully unless told to fail, hang or be busy
/// - reports [`default_lock`] for stages without a configured lock.
///
/// A stage whose lock was written verifies as up to date afterwards, so a
/// cache checkout through this tool always succeeds.
#[derive(Debug)]
pub struct FakeBuildTool {
    graph: StageGraph,
    state: Mutex<State>,
}

impl FakeBuildTool {
    pub fn new(graph: StageGraph) -> Self {
        Self {
            graph,
            state: Mutex::new(State::default()),
        }
    }

    pub fn with_lock(self, name: &str, lock: LockRecord) -> Self {
        self.state().locks.insert(name.to_string(), lock);
        self
    }

    /// `execute` of `name` fails with `ToolBusy` the next `times` calls.
    pub fn busy_for(self, name: &str, times: usize) -> Self {
        self.state().busy.insert(name.to_string(), times);
        self
    }

    /// `execute` of `name` exits non-zero.
    pub fn failing(self, name: &str) -> Self {
        self.state().failing.insert(name.to_string());
        self
    }

    /// `execute` of `name` never returns.
    pub fn hanging(self, name: &str) -> Self {
        self.state().hanging.insert(name.to_string());
        self
    }

    /// `name` is reported unchanged by `status` and verifies as up to date.
    pub fn up_to_date(self, name: &str) -> Self {
        self.state().up_to_date.insert(name.to_string());
        self
    }

    pub fn calls(&self) -> Vec<ToolCall> {
        self.state().calls.clone()
    }

    /// Names passed to `execute`, in call order (busy attempts included).
    pub fn executed(&self) -> Vec<String> {
        self.state()
            .calls
            .iter()
            .filter_map(|call| match call {
                ToolCall::Execute { name, .. } => Some(name.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn checkouts(&self) -> Vec<String> {
        self.state()
            .calls
            .iter()
            .filter_map(|call| match call {
                ToolCall::Checkout(name) => Some(name.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn written_lock(&self, name: &str) -> Option<LockRecord> {
        self.state().written.get(name).cloned()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    fn current_lock(&self, name: &str) -> LockRecord {
        let state = self.state();
        state
            .written
            .get(name)
            .or_else(|| state.locks.get(name))
            .cloned()
            .unwrap_or_else(|| default_lock(name))
    }
}

enum ExecPlan {
    Busy,
    Hang,
    Fail,
    Succeed,
}

impl BuildTool for FakeBuildTool {
    fn list_graph(&self) -> ToolFuture<'_, StageGraph> {
        let graph = self.graph.clone();
        Box::pin(async move { Ok(graph) })
    }

    fn status(&self, names: Vec<String>) -> ToolFuture<'_, Vec<String>> {
        let changed = {
            let state = self.state();
            names
                .into_iter()
                .filter(|n| !state.up_to_date.contains(n))
                .collect()
        };
        Box::pin(async move { Ok(changed) })
    }

    fn materialize_lock(&self, name: &str) -> ToolFuture<'_, LockRecord> {
        let lock = self.current_lock(name);
        Box::pin(async move { Ok(lock) })
    }

    fn write_lock(&self, name: &str, record: LockRecord) -> ToolFuture<'_, ()> {
        {
            let mut state = self.state();
            state.calls.push(ToolCall::WriteLock(name.to_string()));
            state.written.insert(name.to_string(), record);
        }
        Box::pin(async move { Ok(()) })
    }

    fn execute(&self, name: &str, force: bool) -> ToolFuture<'_, ExecOutput> {
        let name = name.to_string();
        let plan = {
            let mut guard = self.state();
            let state = &mut *guard;
            state.calls.push(ToolCall::Execute {
                name: name.clone(),
                force,
            });
            match state.busy.get_mut(&name) {
                Some(left) if *left > 0 => {
                    *left -= 1;
                    ExecPlan::Busy
                }
                _ if state.hanging.contains(&name) => ExecPlan::Hang,
                _ if state.failing.contains(&name) => ExecPlan::Fail,
                _ => ExecPlan::Succeed,
            }
        };

        Box::pin(async move {
            match plan {
                ExecPlan::Busy => Err(StagehandError::ToolBusy(format!("{name} is locked"))),
                ExecPlan::Hang => std::future::pending().await,
                ExecPlan::Fail => Ok(ExecOutput {
                    exit_code: 1,
                    stdout: String::new(),
                    stderr: format!("{name} failed"),
                }),
                ExecPlan::Succeed => Ok(ExecOutput::success(format!("ran {name}\n"))),
            }
        })
    }

    fn checkout(&self, name: &str) -> ToolFuture<'_, ExecOutput> {
        self.state().calls.push(ToolCall::Checkout(name.to_string()));
        let name = name.to_string();
        Box::pin(async move { Ok(ExecOutput::success(format!("checked out {name}\n"))) })
    }

    fn verify_up_to_date(&self, name: &str) -> ToolFuture<'_, bool> {
        let ok = {
            let state = self.state();
            state.up_to_date.contains(name) || state.written.contains_key(name)
        };
        Box::pin(async move { Ok(ok) })
    }
}
