// tests/cli_args.rs

use clap::Parser;

use stagehand::cli::{CliArgs, Command, LogLevel};
use stagehand::logging::{filter_directives, parse_level_str};

#[test]
fn worker_flags_are_parsed() {
    let args = CliArgs::try_parse_from([
        "stagehand",
        "--config",
        "proj/Stagehand.toml",
        "worker",
        "-q",
        "gpu,cpu",
        "-j",
        "4",
        "--stage",
        "train",
        "--timeout",
        "5",
    ])
    .unwrap();

    assert_eq!(args.config, "proj/Stagehand.toml");
    let Command::Worker(w) = args.command else {
        panic!("expected worker command");
    };
    assert_eq!(w.queue, vec!["gpu", "cpu"]);
    assert_eq!(w.jobs, Some(4));
    assert_eq!(w.stage.as_deref(), Some("train"));
    assert_eq!(w.timeout, Some(5));
    assert!(w.experiment.is_none());
}

#[test]
fn submit_defaults() {
    let args = CliArgs::try_parse_from(["stagehand", "submit", "train*", "--glob"]).unwrap();
    assert_eq!(args.config, "Stagehand.toml");
    let Command::Submit(s) = args.command else {
        panic!("expected submit command");
    };
    assert_eq!(s.names, vec!["train*"]);
    assert!(s.glob);
    assert!(!s.no_cache);
    assert!(!s.force);
    assert_eq!(s.base, "HEAD");
}

#[test]
fn reset_requires_a_stage_name() {
    assert!(CliArgs::try_parse_from(["stagehand", "reset"]).is_err());
    let args = CliArgs::try_parse_from(["stagehand", "reset", "A", "-e", "3", "--force"]).unwrap();
    let Command::Reset(r) = args.command else {
        panic!("expected reset command");
    };
    assert_eq!(r.name, "A");
    assert_eq!(r.experiment, Some(3));
    assert!(r.force);
}

#[test]
fn log_levels_parse_loosely() {
    assert_eq!(parse_level_str(" Debug "), Some(tracing::Level::DEBUG));
    assert_eq!(parse_level_str("warning"), Some(tracing::Level::WARN));
    assert_eq!(parse_level_str("loud"), None);
}

#[test]
fn log_filter_is_scoped_to_stagehand() {
    assert_eq!(filter_directives(None, None), "warn,stagehand=info");
    assert_eq!(
        filter_directives(Some(LogLevel::Debug), Some("trace")),
        "warn,stagehand=debug"
    );
    assert_eq!(filter_directives(None, Some("Trace")), "warn,stagehand=trace");
    assert_eq!(filter_directives(None, Some("  ")), "warn,stagehand=info");
    // Full directives pass through untouched.
    assert_eq!(
        filter_directives(None, Some("stagehand::worker=trace,info")),
        "stagehand::worker=trace,info"
    );
}
