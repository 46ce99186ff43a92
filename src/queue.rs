// src/queue.rs

//! Queue routing for ingested stages.
//!
//! Rules are evaluated in declaration order and the first matching glob wins:
//!
//! ```toml
//! [[queue]]
//! pattern = "gpu_*"
//! name = "gpu"
//! ```
//!
//! Stages matching no rule land in [`DEFAULT_QUEUE`].

use std::fmt;

use globset::{Glob, GlobMatcher};

use crate::errors::{Result, StagehandError};

pub const DEFAULT_QUEUE: &str = "default";

#[derive(Clone)]
struct QueueRule {
    pattern: String,
    matcher: GlobMatcher,
    queue: String,
}

/// Ordered, compiled list of `pattern -> queue` rules.
#[derive(Clone, Default)]
pub struct QueueRules {
    rules: Vec<QueueRule>,
}

impl fmt::Debug for QueueRules {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.rules.iter().map(|r| (&r.pattern, &r.queue)))
            .finish()
    }
}

impl QueueRules {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compile rules from `(pattern, queue)` pairs, keeping their order.
    pub fn from_pairs<I, P, Q>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (P, Q)>,
        P: AsRef<str>,
        Q: Into<String>,
    {
        let mut rules = Self::new();
        for (pattern, queue) in pairs {
            rules.push(pattern.as_ref(), queue)?;
        }
        Ok(rules)
    }

    pub fn push(&mut self, pattern: &str, queue: impl Into<String>) -> Result<()> {
        let matcher = Glob::new(pattern)
            .map_err(|e| {
                StagehandError::ConfigError(format!("invalid queue pattern '{pattern}': {e}"))
            })?
            .compile_matcher();
        self.rules.push(QueueRule {
            pattern: pattern.to_string(),
            matcher,
            queue: queue.into(),
        });
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Queue for a stage name; first matching rule wins.
    pub fn route(&self, stage_name: &str) -> &str {
        self.rules
            .iter()
            .find(|rule| rule.matcher.is_match(stage_name))
            .map(|rule| rule.queue.as_str())
            .unwrap_or(DEFAULT_QUEUE)
    }
}
