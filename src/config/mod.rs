// src/config/mod.rs

//! Project configuration (`Stagehand.toml`).
//!
//! - `model.rs`: the TOML-backed data model.
//! - `loader.rs`: reading the file and applying environment overrides.
//! - `validate.rs`: worker/retry sanity, queue globs, stage DAG checks.

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{
    DB_URL_ENV, apply_env_overrides, load_and_validate, load_from_path, load_or_default,
};
pub use model::{
    ProjectConfig, QueueRuleConfig, RawProjectConfig, RetrySection, StageConfig, StoreSection,
    WorkerSection, stage_edges,
};
pub use validate::ensure_has_stages;
