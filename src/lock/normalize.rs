// src/lock/normalize.rs

use std::fmt::Write as _;
use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde_json::{Map, Value};

use crate::lock::{LockEntry, LockRecord};
use crate::types::StageCommand;

/// Replaces the stage's own name in normalized records.
pub const NODE_NAME_PLACEHOLDER: &str = "<node-name>";

static NAME_FLAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"--name\s+(\w+)").expect("static regex is valid"));

/// Keys of a file entry that survive normalization.
const HASH_KEY: &str = "hash";
const FILES_KEY: &str = "files";

/// A lock record with name and path noise removed.
///
/// Two stages that differ only in their name token and in the paths of their
/// files compare equal here and share a [`digest`](NormalizedLock::digest).
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedLock(Value);

impl NormalizedLock {
    pub fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }

    /// JSON with object keys in sorted order at every level.
    pub fn canonical_json(&self) -> String {
        let mut out = String::new();
        write_canonical(&self.0, &mut out);
        out
    }

    /// blake3 hex digest of the canonical JSON.
    pub fn digest(&self) -> String {
        blake3::hash(self.canonical_json().as_bytes())
            .to_hex()
            .to_string()
    }
}

/// Name token encoded in a command (`--name <token>`).
pub fn name_token(cmd: &StageCommand) -> Option<String> {
    NAME_FLAG
        .captures(&cmd.to_shell())
        .map(|caps| caps[1].to_string())
}

/// Strip the stage name from command and params, and paths from file entries.
pub fn normalize(lock: &LockRecord) -> NormalizedLock {
    let token = lock.name_token();
    let token = token.as_deref();

    let mut map = Map::new();
    map.insert("cmd".to_string(), generalize_cmd(&lock.cmd, token));

    if !lock.params.is_empty() {
        let params: Map<String, Value> = lock
            .params
            .iter()
            .map(|(file, values)| {
                let generalized: Map<String, Value> = values
                    .iter()
                    .map(|(key, value)| {
                        let key = if Some(key.as_str()) == token {
                            NODE_NAME_PLACEHOLDER.to_string()
                        } else {
                            key.clone()
                        };
                        (key, value.clone())
                    })
                    .collect();
                (file.clone(), Value::Object(generalized))
            })
            .collect();
        map.insert("params".to_string(), Value::Object(params));
    }

    if !lock.deps.is_empty() {
        map.insert("deps".to_string(), normalize_entries(&lock.deps));
    }
    if !lock.outs.is_empty() {
        map.insert("outs".to_string(), normalize_entries(&lock.outs));
    }

    NormalizedLock(Value::Object(map))
}

/// Cache key of a stage: digest of its normalized command, params and inputs.
///
/// Outputs are left out so the key is the same before and after execution.
pub fn fingerprint(lock: &LockRecord) -> String {
    normalize(&lock.dependency_view()).digest()
}

fn generalize_cmd(cmd: &StageCommand, token: Option<&str>) -> Value {
    match (cmd, token) {
        (StageCommand::Shell(s), Some(token)) => Value::String(replace_name_flag(s, token)),
        (StageCommand::Shell(s), None) => Value::String(s.clone()),
        (StageCommand::Args(args), token) => {
            let mut previous_is_flag = false;
            let generalized = args
                .iter()
                .map(|arg| {
                    let replaced = match token {
                        Some(token) if previous_is_flag && arg == token => {
                            NODE_NAME_PLACEHOLDER.to_string()
                        }
                        Some(token) => replace_name_flag(arg, token),
                        None => arg.clone(),
                    };
                    previous_is_flag = arg == "--name";
                    Value::String(replaced)
                })
                .collect();
            Value::Array(generalized)
        }
    }
}

fn replace_name_flag(s: &str, token: &str) -> String {
    NAME_FLAG
        .replace_all(s, |caps: &Captures| {
            if &caps[1] == token {
                format!("--name {NODE_NAME_PLACEHOLDER}")
            } else {
                caps[0].to_string()
            }
        })
        .into_owned()
}

fn normalize_entries(entries: &[LockEntry]) -> Value {
    Value::Array(entries.iter().map(normalize_entry).collect())
}

fn normalize_entry(entry: &LockEntry) -> Value {
    let mut map = Map::new();
    if let Some(algo) = entry.meta.get(HASH_KEY) {
        map.insert(HASH_KEY.to_string(), algo.clone());
        if let Some(digest) = algo.as_str().and_then(|a| entry.meta.get(a)) {
            if let Some(algo) = algo.as_str() {
                map.insert(algo.to_string(), digest.clone());
            }
        }
    }
    if let Some(files) = entry.meta.get(FILES_KEY) {
        map.insert(FILES_KEY.to_string(), files.clone());
    }
    Value::Object(map)
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(&Value::String(key.clone()), out);
                out.push(':');
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => {
            let _ = write!(out, "{scalar}");
        }
    }
}
