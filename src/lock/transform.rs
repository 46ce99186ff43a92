// src/lock/transform.rs

use crate::graph::working_dir;
use crate::lock::{LockEntry, LockError, LockRecord};

/// Build the lock record a consumer stage would have produced, reusing the
/// outputs of a cached result.
///
/// The consumer keeps its own command, params and dependencies. Outputs are
/// taken from `cached` with the cached stage's working directory swapped for
/// the consumer's; hashes and nested file lists are copied as is.
pub fn transform(consumer: &LockRecord, cached: &LockRecord) -> Result<LockRecord, LockError> {
    let consumer_name = required_token(consumer)?;
    let cached_name = required_token(cached)?;

    let from = working_dir(&cached_name);
    let to = working_dir(&consumer_name);

    let outs = cached
        .outs
        .iter()
        .map(|out| {
            Ok(LockEntry {
                path: remap_path(&out.path, &from, &to)?,
                meta: out.meta.clone(),
            })
        })
        .collect::<Result<Vec<_>, LockError>>()?;

    Ok(LockRecord {
        cmd: consumer.cmd.clone(),
        params: consumer.params.clone(),
        deps: consumer.deps.clone(),
        outs,
    })
}

/// Replace the segment run `from` inside `path` with `to`.
///
/// Matching is done on whole `/`-separated segments, so `nodes/A` never
/// matches inside `nodes/AB`. The run must occur exactly once.
pub fn remap_path(path: &str, from: &str, to: &str) -> Result<String, LockError> {
    let segments: Vec<&str> = path.split('/').collect();
    let needle: Vec<&str> = from.split('/').collect();

    let hits: Vec<usize> = if needle.len() > segments.len() {
        Vec::new()
    } else {
        (0..=segments.len() - needle.len())
            .filter(|&i| segments[i..i + needle.len()] == needle[..])
            .collect()
    };

    match hits.as_slice() {
        [] => Err(LockError::PathMismatch {
            path: path.to_string(),
            working_dir: from.to_string(),
        }),
        [start] => {
            let mut out: Vec<&str> = Vec::with_capacity(segments.len());
            out.extend_from_slice(&segments[..*start]);
            out.push(to);
            out.extend_from_slice(&segments[start + needle.len()..]);
            Ok(out.join("/"))
        }
        _ => Err(LockError::AmbiguousPath {
            path: path.to_string(),
            working_dir: from.to_string(),
        }),
    }
}

fn required_token(lock: &LockRecord) -> Result<String, LockError> {
    lock.name_token().ok_or_else(|| LockError::NamingConvention {
        cmd: lock.cmd.to_shell(),
    })
}
