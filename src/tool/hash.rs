// src/tool/hash.rs

//! Content hashes for lock-record file entries.

use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use blake3::Hasher;
use serde_json::{Value, json};
use tracing::debug;

use crate::lock::LockEntry;

/// Hash algorithm recorded in `{"hash": "blake3", "blake3": "<hex>"}`.
pub const HASH_ALGO: &str = "blake3";

/// Compute the hash of a single file.
pub fn compute_file_hash(path: &Path) -> Result<String> {
    let mut hasher = Hasher::new();
    let mut file =
        File::open(path).with_context(|| format!("opening file for hashing: {:?}", path))?;
    let mut buf = [0u8; 8192];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize().to_hex().to_string())
}

/// Compute aggregate hash from `(relpath, hash)` pairs sorted by path.
pub fn compute_aggregate_hash(files: &[(String, String)]) -> String {
    let mut hasher = Hasher::new();
    for (relpath, hash) in files {
        hasher.update(relpath.as_bytes());
        hasher.update(b"\0");
        hasher.update(hash.as_bytes());
        hasher.update(b"\n");
    }
    hasher.finalize().to_hex().to_string()
}

/// Lock entry for `rel_path` under `root`.
///
/// Files get their content hash. Directories get an aggregate hash plus a
/// nested `files` listing of `{"relpath", "blake3"}` objects.
pub fn hash_entry(root: &Path, rel_path: &str) -> Result<LockEntry> {
    let path = root.join(rel_path);
    if path.is_dir() {
        let files = hash_dir(&path)?;
        let mut entry = LockEntry::with_hash(rel_path, HASH_ALGO, compute_aggregate_hash(&files));
        let listing = files
            .into_iter()
            .map(|(relpath, hash)| json!({ "relpath": relpath, HASH_ALGO: hash }))
            .collect();
        entry.meta.insert("files".to_string(), Value::Array(listing));
        Ok(entry)
    } else {
        let hash = compute_file_hash(&path)?;
        debug!(path = rel_path, hash = %hash, "hashed file");
        Ok(LockEntry::with_hash(rel_path, HASH_ALGO, hash))
    }
}

/// `(relpath, hash)` for every file below `dir`, sorted by relpath.
pub fn hash_dir(dir: &Path) -> Result<Vec<(String, String)>> {
    let mut paths = Vec::new();
    collect_files(dir, &mut paths)?;
    paths.sort();

    paths
        .into_iter()
        .map(|path| {
            let rel = path
                .strip_prefix(dir)
                .with_context(|| format!("{:?} is not below {:?}", path, dir))?
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join("/");
            Ok((rel, compute_file_hash(&path)?))
        })
        .collect()
}

fn collect_files(dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    for entry in fs::read_dir(dir).with_context(|| format!("reading directory {:?}", dir))? {
        let path = entry?.path();
        if path.is_dir() {
            collect_files(&path, out)?;
        } else if path.is_file() {
            out.push(path);
        }
    }
    Ok(())
}
