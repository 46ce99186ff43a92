// src/logging.rs

//! Logging setup for `stagehand` using `tracing` + `tracing-subscriber`.
//!
//! The level applies to `stagehand`'s own targets; everything else (SQLite
//! migrations, tokio internals) stays at `warn`. Priority:
//! 1. `--log-level` CLI flag (if provided)
//! 2. `STAGEHAND_LOG`: either a bare level ("debug") or a full filter
//!    directive ("stagehand::worker=trace,stagehand=info")
//! 3. default to `info`
//!
//! Logs are sent to STDERR so that stdout stays free for query output
//! (`stagehand status`, `stagehand dump`, ...).

use anyhow::Result;
use tracing_subscriber::{EnvFilter, fmt};

use crate::cli::LogLevel;

pub const LOG_ENV: &str = "STAGEHAND_LOG";

/// Level for other crates' targets.
const FOREIGN_LEVEL: &str = "warn";

/// Initialise global logging subscriber.
///
/// Safe to call once at startup.
pub fn init_logging(cli_level: Option<LogLevel>) -> Result<()> {
    let directives = filter_directives(cli_level, std::env::var(LOG_ENV).ok().as_deref());
    let filter = EnvFilter::try_new(&directives)?;

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_writer(std::io::stderr)
        .init();

    Ok(())
}

/// `EnvFilter` directives for the given CLI level and `STAGEHAND_LOG` value.
///
/// A bare level is scoped to `stagehand`; anything else in the env var is
/// taken as a directive string as is.
pub fn filter_directives(cli_level: Option<LogLevel>, env: Option<&str>) -> String {
    let level = match (cli_level, env) {
        (Some(lvl), _) => level_from_log_level(lvl),
        (None, Some(raw)) if !raw.trim().is_empty() => match parse_level_str(raw) {
            Some(level) => level,
            None => return raw.trim().to_string(),
        },
        _ => tracing::Level::INFO,
    };
    format!(
        "{FOREIGN_LEVEL},stagehand={}",
        level.as_str().to_ascii_lowercase()
    )
}

fn level_from_log_level(lvl: LogLevel) -> tracing::Level {
    match lvl {
        LogLevel::Error => tracing::Level::ERROR,
        LogLevel::Warn => tracing::Level::WARN,
        LogLevel::Info => tracing::Level::INFO,
        LogLevel::Debug => tracing::Level::DEBUG,
        LogLevel::Trace => tracing::Level::TRACE,
    }
}

pub fn parse_level_str(s: &str) -> Option<tracing::Level> {
    match s.trim().to_lowercase().as_str() {
        "error" => Some(tracing::Level::ERROR),
        "warn" | "warning" => Some(tracing::Level::WARN),
        "info" => Some(tracing::Level::INFO),
        "debug" => Some(tracing::Level::DEBUG),
        "trace" => Some(tracing::Level::TRACE),
        _ => None,
    }
}
