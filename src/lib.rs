// src/lib.rs

pub mod cli;
pub mod config;
pub mod errors;
pub mod graph;
pub mod lock;
pub mod logging;
pub mod queue;
pub mod retry;
pub mod store;
pub mod submit;
pub mod tool;
pub mod types;
pub mod worker;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::Serialize;
use tracing::{debug, info};

use crate::cli::{CliArgs, Command};
use crate::config::{ProjectConfig, load_and_validate, load_or_default};
use crate::store::{ExperimentMeta, ResetOutcome, Store, machine_name};
use crate::submit::{SubmitOptions, submit};
use crate::tool::ShellBuildTool;
use crate::worker::{WorkerOptions, run_worker};

/// High-level entry point used by `main.rs`.
pub async fn run(args: CliArgs) -> Result<()> {
    let config_path = PathBuf::from(&args.config);

    match args.command {
        Command::Submit(sub) => {
            let cfg = load_and_validate(&config_path)
                .with_context(|| format!("loading {}", config_path.display()))?;
            let store = open_store(&cfg, &config_path)?;
            let tool = ShellBuildTool::new(config_root_dir(&config_path), &cfg)?;

            let opts = SubmitOptions {
                targets: sub.names,
                glob: sub.glob,
                cache: !sub.no_cache,
                force: sub.force,
                meta: ExperimentMeta {
                    base: sub.base,
                    origin: sub.origin,
                    machine: machine_name(),
                },
                rules: cfg.queue_rules()?,
                retry: cfg.retry_policy(),
            };
            let experiment_id = submit(&store, &tool, opts).await?;
            println!("{experiment_id}");
        }

        Command::Worker(w) => {
            let cfg = load_and_validate(&config_path)
                .with_context(|| format!("loading {}", config_path.display()))?;
            let store = open_store(&cfg, &config_path)?;
            let tool = ShellBuildTool::new(config_root_dir(&config_path), &cfg)?;

            let mut opts = WorkerOptions::from_config(&cfg);
            opts.queues = w.queue;
            opts.experiment = w.experiment;
            opts.stage_name = w.stage;
            if let Some(jobs) = w.jobs {
                opts.jobs = jobs.max(1);
            }
            if let Some(name) = w.name {
                opts.name = name;
            }
            if let Some(secs) = w.timeout {
                opts.idle_timeout = Duration::from_secs(secs);
            }
            debug!(?opts, "worker options");

            let report = run_worker(store, Arc::new(tool), opts).await?;
            info!(processed = report.total(), "done");
        }

        Command::Status(s) => {
            let store = open_store(&load_or_default(&config_path)?, &config_path)?;
            let experiment = resolve_experiment(&store, s.experiment)?;
            let counts = store.count_by_status(Some(experiment))?;
            println!("experiment {experiment}");
            for (status, n) in counts.iter() {
                println!("  {:<10} {n}", status.as_str());
            }
            println!("  {:<10} {}", "total", counts.total());
        }

        Command::Experiments(e) => {
            let store = open_store(&load_or_default(&config_path)?, &config_path)?;
            print_json(&store.list_experiments(e.base.as_deref())?)?;
        }

        Command::Workers(w) => {
            let store = open_store(&load_or_default(&config_path)?, &config_path)?;
            print_json(&store.list_workers(w.id)?)?;
        }

        Command::Dump(d) => {
            let store = open_store(&load_or_default(&config_path)?, &config_path)?;
            let experiment = resolve_experiment(&store, d.experiment)?;
            print_json(&store.dump_stage(experiment, &d.name)?)?;
        }

        Command::Reset(r) => {
            let store = open_store(&load_or_default(&config_path)?, &config_path)?;
            let experiment = resolve_experiment(&store, r.experiment)?;
            match store.reset_stage(experiment, &r.name, r.force)? {
                ResetOutcome::Reset => println!("reset '{}' to pending", r.name),
                ResetOutcome::Refused { status } => bail!(
                    "stage '{}' is {status}; use --force to reset it anyway",
                    r.name
                ),
            }
        }

        Command::Graph(g) => {
            let store = open_store(&load_or_default(&config_path)?, &config_path)?;
            let experiment = resolve_experiment(&store, g.experiment)?;
            print_json(&store.experiment_graph(experiment)?)?;
        }
    }

    Ok(())
}

fn open_store(cfg: &ProjectConfig, config_path: &Path) -> Result<Store> {
    let url = cfg.store_url();
    Store::open_in(&config_root_dir(config_path), url)
        .with_context(|| format!("opening store at '{url}'"))
}

fn resolve_experiment(store: &Store, requested: Option<i64>) -> Result<i64> {
    if let Some(id) = requested {
        return Ok(id);
    }
    match store.latest_experiment()? {
        Some(exp) => Ok(exp.id),
        None => bail!("no experiments submitted yet"),
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Project root: the directory holding the config file.
///
/// - If the config path has a non-empty parent (e.g. "pipeline/Stagehand.toml"),
///   we use that directory.
/// - If it's just a bare filename, we fall back to the current working
///   directory.
fn config_root_dir(config_path: &Path) -> PathBuf {
    match config_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
    }
}
