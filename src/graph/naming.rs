// src/graph/naming.rs

//! Stage naming convention.
//!
//! Stage names encode their group path: `grp_a_Node` lives in group
//! `grp/a` with leaf `Node`. A trailing numeric part belongs to the leaf, so
//! `grp_a_Node_1` is group `grp/a`, leaf `Node_1`. Each stage writes its
//! outputs below `nodes/<group...>/<leaf>`.

/// Root directory of per-stage working directories.
pub const NODES_ROOT: &str = "nodes";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageName {
    pub group: Vec<String>,
    pub leaf: String,
}

pub fn split_name(name: &str) -> StageName {
    let mut parts: Vec<&str> = name.split('_').collect();

    let leaf = match parts.len() {
        0 | 1 => name.to_string(),
        n if is_numeric(parts[n - 1]) => {
            let suffix = parts.pop().unwrap_or_default();
            let stem = parts.pop().unwrap_or_default();
            format!("{stem}_{suffix}")
        }
        _ => parts.pop().unwrap_or_default().to_string(),
    };

    StageName {
        group: parts.into_iter().map(str::to_string).collect(),
        leaf,
    }
}

/// Working directory of a stage, e.g. `nodes/grp/a/Node_1`.
pub fn working_dir(name: &str) -> String {
    let StageName { group, leaf } = split_name(name);
    let mut segments = Vec::with_capacity(group.len() + 2);
    segments.push(NODES_ROOT.to_string());
    segments.extend(group);
    segments.push(leaf);
    segments.join("/")
}

fn is_numeric(part: &str) -> bool {
    !part.is_empty() && part.chars().all(|c| c.is_ascii_digit())
}
