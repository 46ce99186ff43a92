// src/tool/mod.rs

//! Build-tool abstraction.
//!
//! The worker loop never runs stage commands or touches lock state itself;
//! it talks to a `BuildTool`. This keeps the scheduling core independent of
//! any particular tool and lets tests swap in a fake.
//!
//! - [`ShellBuildTool`] is the reference implementation driven by the
//!   `[stage.<name>]` tables of `Stagehand.toml`.
//! - Every method may fail with `ToolBusy`, which callers retry.

pub mod hash;
pub mod shell;

use std::future::Future;
use std::pin::Pin;

use crate::errors::Result;
use crate::graph::StageGraph;
use crate::lock::LockRecord;

pub use shell::ShellBuildTool;

/// Boxed future returned by [`BuildTool`] methods.
pub type ToolFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Captured result of running a stage command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            exit_code: 0,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Everything the scheduling core needs from a build tool.
///
/// Implementations must not borrow the argument strings across the returned
/// future; clone what you need.
pub trait BuildTool: Send + Sync {
    /// The full stage graph with commands and cacheability.
    fn list_graph(&self) -> ToolFuture<'_, StageGraph>;

    /// Subset of `names` whose inputs changed since their last run.
    fn status(&self, names: Vec<String>) -> ToolFuture<'_, Vec<String>>;

    /// Lock record describing the stage as it would run now.
    fn materialize_lock(&self, name: &str) -> ToolFuture<'_, LockRecord>;

    /// Persist `record` as the stage's lock state.
    fn write_lock(&self, name: &str, record: LockRecord) -> ToolFuture<'_, ()>;

    /// Run the stage; with `force == false` an up-to-date stage is skipped.
    fn execute(&self, name: &str, force: bool) -> ToolFuture<'_, ExecOutput>;

    /// Restore the outputs recorded in the stage's lock state.
    fn checkout(&self, name: &str) -> ToolFuture<'_, ExecOutput>;

    fn verify_up_to_date(&self, name: &str) -> ToolFuture<'_, bool>;
}
