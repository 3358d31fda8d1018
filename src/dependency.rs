//! Per-task source dependency graph.
//!
//! Nodes are the sources of one task, edges are "depends on" relations found
//! by the reference extractor. Only references to sources of the same task
//! become edges: `pre` sources and other monitors' sources always run before.

use crate::error::CompileError;
use crate::model::{SourceMap, SourceScope};
use crate::references::source_references;
use std::collections::BTreeMap;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyGraph {
    scope: String,
    /// Source names in insertion order.
    names: Vec<String>,
    /// `edges[i]` lists the nodes `names[i]` depends on, deduplicated.
    edges: Vec<Vec<usize>>,
}

impl DependencyGraph {
    /// Graph of the sources of one task.
    pub fn build(scope: &SourceScope, sources: &SourceMap) -> Self {
        let names = sources.names();
        let mut edges = vec![Vec::new(); names.len()];
        for (from, source) in sources.iter().enumerate() {
            for reference in source_references(source) {
                if reference.target.scope != *scope {
                    continue;
                }
                if let Some(to) = sources.position(&reference.target.name) {
                    if !edges[from].contains(&to) {
                        edges[from].push(to);
                    }
                }
            }
        }
        Self {
            scope: scope.to_string(),
            names,
            edges,
        }
    }

    /// Graph over plain names. Edges naming unknown nodes are ignored.
    pub fn from_edges<S: AsRef<str>>(scope: &str, names: &[S], depends_on: &[(S, S)]) -> Self {
        let names: Vec<String> = names.iter().map(|n| n.as_ref().to_string()).collect();
        let position = |name: &str| names.iter().position(|n| n.eq_ignore_ascii_case(name));
        let mut edges = vec![Vec::new(); names.len()];
        for (from, to) in depends_on {
            if let (Some(from), Some(to)) = (position(from.as_ref()), position(to.as_ref())) {
                if !edges[from].contains(&to) {
                    edges[from].push(to);
                }
            }
        }
        Self {
            scope: scope.to_string(),
            names,
            edges,
        }
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Direct dependencies of `name`.
    pub fn dependencies(&self, name: &str) -> Vec<&str> {
        self.names
            .iter()
            .position(|n| n.eq_ignore_ascii_case(name))
            .map(|i| self.edges[i].iter().map(|&j| self.names[j].as_str()).collect())
            .unwrap_or_default()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.iter().map(Vec::len).sum()
    }

    /// Fails with the first cycle found, listed from its entry point back to
    /// itself.
    pub fn check_acyclic(&self) -> Result<(), CompileError> {
        #[derive(Copy, Clone, PartialEq, Eq)]
        enum Mark {
            Temp,
            Perm,
        }

        fn dfs(
            v: usize,
            edges: &[Vec<usize>],
            marks: &mut BTreeMap<usize, Mark>,
            stack: &mut Vec<usize>,
        ) -> Result<(), Vec<usize>> {
            match marks.get(&v) {
                Some(Mark::Perm) => return Ok(()),
                Some(Mark::Temp) => {
                    // v is on the current path
                    let start = stack.iter().position(|&s| s == v).unwrap_or(0);
                    let mut cycle = stack[start..].to_vec();
                    cycle.push(v);
                    return Err(cycle);
                }
                None => {}
            }

            marks.insert(v, Mark::Temp);
            stack.push(v);
            for &next in &edges[v] {
                dfs(next, edges, marks, stack)?;
            }
            stack.pop();
            marks.insert(v, Mark::Perm);
            Ok(())
        }

        let mut marks = BTreeMap::new();
        let mut stack = Vec::new();
        for v in 0..self.names.len() {
            stack.clear();
            if let Err(cycle) = dfs(v, &self.edges, &mut marks, &mut stack) {
                return Err(CompileError::CyclicSourceDependency {
                    scope: self.scope.clone(),
                    sources: cycle.into_iter().map(|i| self.names[i].clone()).collect(),
                });
            }
        }
        Ok(())
    }

    /// Dependency layers: layer 0 holds sources without task-local
    /// dependencies, layer k those whose deepest dependency sits in layer
    /// k - 1. Insertion order is kept inside a layer.
    pub fn layers(&self) -> Result<Vec<Vec<String>>, CompileError> {
        self.check_acyclic()?;

        fn depth(v: usize, edges: &[Vec<usize>], memo: &mut [Option<usize>]) -> usize {
            if let Some(d) = memo[v] {
                return d;
            }
            let d = edges[v]
                .iter()
                .map(|&next| depth(next, edges, memo) + 1)
                .max()
                .unwrap_or(0);
            memo[v] = Some(d);
            d
        }

        let mut memo = vec![None; self.names.len()];
        let mut layers: Vec<Vec<String>> = Vec::new();
        for v in 0..self.names.len() {
            let d = depth(v, &self.edges, &mut memo);
            if layers.len() <= d {
                layers.resize_with(d + 1, Vec::new);
            }
            layers[d].push(self.names[v].clone());
        }
        debug!(scope = %self.scope, layers = layers.len(), "computed dependency layers");
        Ok(layers)
    }
}

/// Layers of one task's sources.
pub fn dependency_layers(
    scope: &SourceScope,
    sources: &SourceMap,
) -> Result<Vec<Vec<String>>, CompileError> {
    DependencyGraph::build(scope, sources).layers()
}
