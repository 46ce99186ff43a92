// src/lock/mod.rs

//! Lock records and the content-addressed fingerprint built from them.
//!
//! A lock record is the resolved description of a stage at a point in time:
//! its command, parameter bindings, dependencies and outputs, each file entry
//! carrying a content hash, e.g.
//!
//! ```json
//! {
//!   "cmd": "zntrack run pkg.MyNode --name MyNode",
//!   "params": {"params.yaml": {"MyNode": {"params": 1}}},
//!   "deps": [{"path": "data.csv", "hash": "md5", "md5": "fb6d..."}],
//!   "outs": [{"path": "nodes/MyNode/out.json", "hash": "md5", "md5": "4610..."}]
//! }
//! ```
//!
//! - [`normalize`] strips name- and path-specific noise and hashes the rest.
//! - [`transform`] rewrites a cached record's outputs for another stage.

pub mod normalize;
pub mod transform;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::types::StageCommand;

pub use normalize::{NODE_NAME_PLACEHOLDER, NormalizedLock, fingerprint, name_token, normalize};
pub use transform::{remap_path, transform};

/// Failures while normalizing or transforming lock records.
///
/// These are never retried; a cache checkout that hits one falls back to
/// executing the stage.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LockError {
    #[error("command does not encode a stage name (`--name <token>`): {cmd}")]
    NamingConvention { cmd: String },

    #[error("working directory '{working_dir}' not found in output path '{path}'")]
    PathMismatch { path: String, working_dir: String },

    #[error("working directory '{working_dir}' occurs more than once in output path '{path}'")]
    AmbiguousPath { path: String, working_dir: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockRecord {
    pub cmd: StageCommand,

    /// Parameter file -> key -> value.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub params: BTreeMap<String, BTreeMap<String, Value>>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub deps: Vec<LockEntry>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub outs: Vec<LockEntry>,
}

impl LockRecord {
    pub fn new(cmd: impl Into<StageCommand>) -> Self {
        Self {
            cmd: cmd.into(),
            params: BTreeMap::new(),
            deps: Vec::new(),
            outs: Vec::new(),
        }
    }

    /// Name token encoded in the command (`--name <token>`), if any.
    pub fn name_token(&self) -> Option<String> {
        name_token(&self.cmd)
    }

    /// Everything that determines the result: command, params and inputs.
    pub fn dependency_view(&self) -> LockRecord {
        LockRecord {
            cmd: self.cmd.clone(),
            params: self.params.clone(),
            deps: self.deps.clone(),
            outs: Vec::new(),
        }
    }

    pub fn from_json(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// A dependency or output file of a lock record.
///
/// `meta` holds everything but the path: the hash algorithm under `hash`,
/// the digest under the algorithm's name, and optionally a nested `files`
/// listing for directories.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockEntry {
    pub path: String,
    #[serde(flatten)]
    pub meta: BTreeMap<String, Value>,
}

impl LockEntry {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            meta: BTreeMap::new(),
        }
    }

    pub fn with_hash(path: impl Into<String>, algo: &str, digest: impl Into<String>) -> Self {
        let mut entry = Self::new(path);
        entry.meta.insert("hash".to_string(), Value::String(algo.to_string()));
        entry
            .meta
            .insert(algo.to_string(), Value::String(digest.into()));
        entry
    }

    pub fn hash_algo(&self) -> Option<&str> {
        self.meta.get("hash").and_then(Value::as_str)
    }

    pub fn digest(&self) -> Option<&str> {
        self.meta.get(self.hash_algo()?).and_then(Value::as_str)
    }

    pub fn files(&self) -> Option<&Vec<Value>> {
        self.meta.get("files").and_then(Value::as_array)
    }
}
