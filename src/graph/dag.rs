// src/graph/dag.rs

use std::collections::{BTreeSet, HashMap};

use petgraph::Direction;
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};

use crate::errors::{Result, StagehandError};
use crate::types::StageCommand;

/// One node of the DAG as reported by a build tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageNode {
    pub name: String,
    pub cmd: StageCommand,
    /// The build tool reports that the declared inputs changed.
    pub changed: bool,
    /// Re-run even if nothing changed.
    pub force: bool,
    /// The build tool considers the stage a pure function of its inputs.
    pub cacheable: bool,
}

impl StageNode {
    pub fn new(name: impl Into<String>, cmd: impl Into<StageCommand>) -> Self {
        Self {
            name: name.into(),
            cmd: cmd.into(),
            changed: true,
            force: false,
            cacheable: true,
        }
    }
}

/// Directed acyclic graph of stages keyed by name.
///
/// Edge direction: parent -> child (the child waits for the parent).
#[derive(Debug, Clone, Default)]
pub struct StageGraph {
    graph: DiGraph<StageNode, ()>,
    index: HashMap<String, NodeIndex>,
}

impl StageGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    pub fn add_stage(&mut self, node: StageNode) -> Result<()> {
        if self.index.contains_key(&node.name) {
            return Err(StagehandError::ConfigError(format!(
                "duplicate stage name '{}'",
                node.name
            )));
        }
        let name = node.name.clone();
        let idx = self.graph.add_node(node);
        self.index.insert(name, idx);
        Ok(())
    }

    /// Declare that `child` waits for `parent`.
    pub fn add_dependency(&mut self, parent: &str, child: &str) -> Result<()> {
        if parent == child {
            return Err(StagehandError::ConfigError(format!(
                "stage '{child}' cannot depend on itself"
            )));
        }
        let p = self.idx(parent)?;
        let c = self.idx(child)?;
        self.graph.update_edge(p, c, ());
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn stage(&self, name: &str) -> Option<&StageNode> {
        self.index.get(name).map(|idx| &self.graph[*idx])
    }

    pub fn stage_mut(&mut self, name: &str) -> Option<&mut StageNode> {
        let idx = *self.index.get(name)?;
        Some(&mut self.graph[idx])
    }

    /// Stages in insertion order.
    pub fn stages(&self) -> impl Iterator<Item = &StageNode> {
        self.graph.node_weights()
    }

    pub fn stages_mut(&mut self) -> impl Iterator<Item = &mut StageNode> {
        self.graph.node_weights_mut()
    }

    /// Immediate parents of a stage, sorted by name.
    pub fn dependencies_of(&self, name: &str) -> Vec<&str> {
        self.neighbors(name, Direction::Incoming)
    }

    /// Immediate children of a stage, sorted by name.
    pub fn dependents_of(&self, name: &str) -> Vec<&str> {
        self.neighbors(name, Direction::Outgoing)
    }

    /// All `(parent, child)` pairs.
    pub fn edges(&self) -> Vec<(&str, &str)> {
        self.graph
            .edge_indices()
            .filter_map(|e| self.graph.edge_endpoints(e))
            .map(|(p, c)| (self.graph[p].name.as_str(), self.graph[c].name.as_str()))
            .collect()
    }

    /// Stages ordered so that every parent precedes its children.
    pub fn topological_order(&self) -> Result<Vec<&StageNode>> {
        match toposort(&self.graph, None) {
            Ok(order) => Ok(order.into_iter().map(|idx| &self.graph[idx]).collect()),
            Err(cycle) => Err(StagehandError::DagCycle(format!(
                "cycle detected in stage DAG involving stage '{}'",
                self.graph[cycle.node_id()].name
            ))),
        }
    }

    /// Transitive parents of `name` (excluding `name` itself).
    pub fn ancestors(&self, name: &str) -> BTreeSet<String> {
        let mut found = BTreeSet::new();
        let Some(start) = self.index.get(name) else {
            return found;
        };

        let mut stack = vec![*start];
        while let Some(idx) = stack.pop() {
            for parent in self.graph.neighbors_directed(idx, Direction::Incoming) {
                if found.insert(self.graph[parent].name.clone()) {
                    stack.push(parent);
                }
            }
        }
        found
    }

    /// Copy of the graph restricted to `targets` and everything they need.
    pub fn subgraph_with_ancestors<S: AsRef<str>>(&self, targets: &[S]) -> Result<StageGraph> {
        let mut keep: BTreeSet<String> = BTreeSet::new();
        for target in targets {
            let target = target.as_ref();
            if !self.contains(target) {
                return Err(StagehandError::StageNotFound(target.to_string()));
            }
            keep.insert(target.to_string());
            keep.extend(self.ancestors(target));
        }

        let mut sub = StageGraph::new();
        for node in self.stages().filter(|n| keep.contains(&n.name)) {
            sub.add_stage(node.clone())?;
        }
        for (parent, child) in self.edges() {
            if keep.contains(parent) && keep.contains(child) {
                sub.add_dependency(parent, child)?;
            }
        }
        Ok(sub)
    }

    fn idx(&self, name: &str) -> Result<NodeIndex> {
        self.index
            .get(name)
            .copied()
            .ok_or_else(|| StagehandError::StageNotFound(name.to_string()))
    }

    fn neighbors(&self, name: &str, dir: Direction) -> Vec<&str> {
        let Some(idx) = self.index.get(name) else {
            return Vec::new();
        };
        let mut names: Vec<&str> = self
            .graph
            .neighbors_directed(*idx, dir)
            .map(|n| self.graph[n].name.as_str())
            .collect();
        names.sort_unstable();
        names
    }
}
