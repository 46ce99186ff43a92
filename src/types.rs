// src/types.rs

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Lifecycle of a persisted stage.
///
/// ```text
/// pending|cached --claim--> running --success--> completed
///                           running --failure--> failed
/// failed --reset--> pending
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    Pending,
    Running,
    Completed,
    Cached,
    Failed,
}

impl StageStatus {
    pub const ALL: [StageStatus; 5] = [
        StageStatus::Pending,
        StageStatus::Running,
        StageStatus::Completed,
        StageStatus::Cached,
        StageStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StageStatus::Pending => "pending",
            StageStatus::Running => "running",
            StageStatus::Completed => "completed",
            StageStatus::Cached => "cached",
            StageStatus::Failed => "failed",
        }
    }

    /// Statuses a claim may pick a stage up from.
    pub fn is_claimable(&self) -> bool {
        matches!(self, StageStatus::Pending | StageStatus::Cached)
    }

    /// Statuses a job report may move a running stage into.
    pub fn is_terminal(&self) -> bool {
        matches!(self, StageStatus::Completed | StageStatus::Failed)
    }
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StageStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pending" => Ok(StageStatus::Pending),
            "running" => Ok(StageStatus::Running),
            "completed" => Ok(StageStatus::Completed),
            "cached" => Ok(StageStatus::Cached),
            "failed" => Ok(StageStatus::Failed),
            other => Err(format!("invalid stage status: {other}")),
        }
    }
}

/// Liveness of a registered worker loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerStatus {
    Idle,
    Running,
    Offline,
}

impl WorkerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerStatus::Idle => "idle",
            WorkerStatus::Running => "running",
            WorkerStatus::Offline => "offline",
        }
    }
}

impl Default for WorkerStatus {
    fn default() -> Self {
        WorkerStatus::Idle
    }
}

impl fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkerStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "idle" => Ok(WorkerStatus::Idle),
            "running" => Ok(WorkerStatus::Running),
            "offline" => Ok(WorkerStatus::Offline),
            other => Err(format!(
                "invalid worker status: {other} (expected \"idle\", \"running\" or \"offline\")"
            )),
        }
    }
}

/// Command of a stage: either a shell string or an argument list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StageCommand {
    Shell(String),
    Args(Vec<String>),
}

impl StageCommand {
    /// Single string form, used for display and shell execution.
    pub fn to_shell(&self) -> String {
        match self {
            StageCommand::Shell(s) => s.clone(),
            StageCommand::Args(args) => args.join(" "),
        }
    }
}

impl fmt::Display for StageCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_shell())
    }
}

impl From<&str> for StageCommand {
    fn from(s: &str) -> Self {
        StageCommand::Shell(s.to_string())
    }
}

impl From<String> for StageCommand {
    fn from(s: String) -> Self {
        StageCommand::Shell(s)
    }
}
