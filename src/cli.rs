// src/cli.rs

//! CLI argument parsing using `clap`.

use clap::{Args, Parser, Subcommand, ValueEnum};

/// Command-line arguments for `stagehand`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "stagehand",
    version,
    about = "Run a stage DAG across independent workers coordinated through a shared database.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the project file (TOML).
    #[arg(long, global = true, value_name = "PATH", default_value = "Stagehand.toml")]
    pub config: String,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `STAGEHAND_LOG` or a default level will be used.
    #[arg(long, global = true, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Submit the stage graph as a new experiment.
    Submit(SubmitArgs),
    /// Claim and run stages until no work is left.
    Worker(WorkerArgs),
    /// Count stages per status.
    Status(StatusArgs),
    /// List experiments.
    Experiments(ExperimentsArgs),
    /// List registered workers.
    Workers(WorkersArgs),
    /// Print the full record of a stage as JSON.
    Dump(DumpArgs),
    /// Re-arm a failed (or, with --force, any) stage.
    Reset(ResetArgs),
    /// Print an experiment's graph as JSON.
    Graph(GraphArgs),
}

#[derive(Debug, Clone, Args)]
pub struct SubmitArgs {
    /// Stages to submit together with their ancestors. Default: all.
    #[arg(value_name = "NAME")]
    pub names: Vec<String>,

    /// Interpret NAMEs as glob patterns.
    #[arg(long)]
    pub glob: bool,

    /// Do not reuse results of stages with the same fingerprint.
    #[arg(long)]
    pub no_cache: bool,

    /// Re-run every submitted stage even if unchanged.
    #[arg(long)]
    pub force: bool,

    /// Revision the graph is submitted from.
    #[arg(long, default_value = "HEAD")]
    pub base: String,

    #[arg(long, default_value = "")]
    pub origin: String,
}

#[derive(Debug, Clone, Args)]
pub struct WorkerArgs {
    /// Only claim stages from these queues (comma separated). Default: all.
    #[arg(long, short = 'q', value_delimiter = ',')]
    pub queue: Vec<String>,

    /// Number of parallel poll loops. Overrides `[worker].jobs`.
    #[arg(long, short = 'j')]
    pub jobs: Option<usize>,

    /// Only claim stages of this experiment.
    #[arg(long)]
    pub experiment: Option<i64>,

    /// Only claim this stage and its ancestors.
    #[arg(long)]
    pub stage: Option<String>,

    /// Worker name. Overrides `[worker].name`.
    #[arg(long)]
    pub name: Option<String>,

    /// Seconds without work before exiting. Overrides `[worker].idle_timeout_secs`.
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,
}

#[derive(Debug, Clone, Args)]
pub struct StatusArgs {
    /// Experiment id. Default: the latest experiment.
    #[arg(long, short = 'e')]
    pub experiment: Option<i64>,
}

#[derive(Debug, Clone, Args)]
pub struct ExperimentsArgs {
    /// Only experiments submitted from this revision.
    #[arg(long)]
    pub base: Option<String>,
}

#[derive(Debug, Clone, Args)]
pub struct WorkersArgs {
    /// Only the worker with this id.
    #[arg(long)]
    pub id: Option<i64>,
}

#[derive(Debug, Clone, Args)]
pub struct DumpArgs {
    pub name: String,

    /// Experiment id. Default: the latest experiment.
    #[arg(long, short = 'e')]
    pub experiment: Option<i64>,
}

#[derive(Debug, Clone, Args)]
pub struct ResetArgs {
    pub name: String,

    /// Experiment id. Default: the latest experiment.
    #[arg(long, short = 'e')]
    pub experiment: Option<i64>,

    /// Also reset completed, cached and running stages.
    #[arg(long)]
    pub force: bool,
}

#[derive(Debug, Clone, Args)]
pub struct GraphArgs {
    /// Experiment id. Default: the latest experiment.
    #[arg(long, short = 'e')]
    pub experiment: Option<i64>,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
