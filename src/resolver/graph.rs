//! The whole-graph view of a run's dependencies.
//!
//! Built once from the requested roots before any work starts. It rejects
//! cycles with the full cycle path and yields the dependency-first order used
//! by `quay plan`.

use std::collections::{HashMap, HashSet};

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Topo;
use petgraph::Direction;

use crate::core::{PackageName, RecipeBook};

use super::errors::ResolveError;

/// Dependency graph reachable from a set of root packages.
///
/// An edge `a -> b` means "a depends on b".
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    graph: DiGraph<PackageName, ()>,
    nodes: HashMap<PackageName, NodeIndex>,
    roots: Vec<PackageName>,
}

impl DependencyGraph {
    /// Build the graph of everything reachable from `roots`.
    pub fn from_roots(book: &RecipeBook, roots: &[PackageName]) -> Result<Self, ResolveError> {
        let mut graph = DependencyGraph {
            roots: roots.to_vec(),
            ..Default::default()
        };
        let mut pending: Vec<(PackageName, Option<PackageName>)> =
            roots.iter().rev().map(|r| (r.clone(), None)).collect();

        while let Some((name, parent)) = pending.pop() {
            let Some(package) = book.get(name.as_str()) else {
                return Err(ResolveError::UnknownDependency {
                    name,
                    referenced_by: parent,
                });
            };

            if graph.nodes.contains_key(&name) {
                continue;
            }
            graph.add_package(name.clone());

            for dep in package.dependencies.iter().rev() {
                pending.push((dep.clone(), Some(name.clone())));
            }
        }

        for name in graph.nodes.keys().cloned().collect::<Vec<_>>() {
            if let Some(package) = book.get(name.as_str()) {
                for dep in &package.dependencies {
                    graph.add_edge(&name, dep);
                }
            }
        }

        Ok(graph)
    }

    fn add_package(&mut self, name: PackageName) {
        if self.nodes.contains_key(&name) {
            return;
        }
        let node = self.graph.add_node(name.clone());
        self.nodes.insert(name, node);
    }

    fn add_edge(&mut self, from: &PackageName, to: &PackageName) {
        if let (Some(&from_node), Some(&to_node)) = (self.nodes.get(from), self.nodes.get(to)) {
            if !self.graph.contains_edge(from_node, to_node) {
                self.graph.add_edge(from_node, to_node, ());
            }
        }
    }

    /// Reject cycles, reporting the first one found as a closed path.
    pub fn check_acyclic(&self) -> Result<(), ResolveError> {
        if !petgraph::algo::is_cyclic_directed(&self.graph) {
            return Ok(());
        }

        let mut done = HashSet::new();
        for root in &self.roots {
            let mut path = Vec::new();
            if let Some(cycle) = self.find_cycle(self.nodes[root], &mut path, &mut done) {
                return Err(ResolveError::CycleDependency { cycle });
            }
        }

        // Unreachable for graphs built from roots, but keep a useful message.
        Err(ResolveError::CycleDependency { cycle: Vec::new() })
    }

    fn find_cycle(
        &self,
        node: NodeIndex,
        path: &mut Vec<NodeIndex>,
        done: &mut HashSet<NodeIndex>,
    ) -> Option<Vec<PackageName>> {
        if let Some(start) = path.iter().position(|n| *n == node) {
            let mut cycle: Vec<PackageName> =
                path[start..].iter().map(|n| self.graph[*n].clone()).collect();
            cycle.push(self.graph[node].clone());
            return Some(cycle);
        }
        if done.contains(&node) {
            return None;
        }

        path.push(node);
        let mut deps: Vec<NodeIndex> = self.graph.neighbors(node).collect();
        deps.sort_by(|a, b| self.graph[*a].cmp(&self.graph[*b]));
        for dep in deps {
            if let Some(cycle) = self.find_cycle(dep, path, done) {
                return Some(cycle);
            }
        }
        path.pop();
        done.insert(node);
        None
    }

    /// Packages with dependencies before dependents.
    ///
    /// Only meaningful for an acyclic graph.
    pub fn build_order(&self) -> Vec<PackageName> {
        let mut topo = Topo::new(&self.graph);
        let mut order = Vec::new();

        while let Some(node) = topo.next(&self.graph) {
            order.push(self.graph[node].clone());
        }

        // Topo yields a before b for an edge a -> b, i.e. dependents first.
        order.reverse();
        order
    }

    /// Group packages into levels; every package depends only on earlier levels.
    pub fn levels(&self) -> Vec<Vec<PackageName>> {
        let mut level_of: HashMap<NodeIndex, usize> = HashMap::new();
        let order = self.build_order();

        for name in &order {
            let node = self.nodes[name];
            let level = self
                .graph
                .neighbors(node)
                .filter_map(|dep| level_of.get(&dep))
                .map(|l| l + 1)
                .max()
                .unwrap_or(0);
            level_of.insert(node, level);
        }

        let depth = level_of.values().max().map_or(0, |m| m + 1);
        let mut levels = vec![Vec::new(); depth];
        for (node, level) in level_of {
            levels[level].push(self.graph[node].clone());
        }
        for level in &mut levels {
            level.sort();
        }
        levels
    }

    /// Direct dependencies of a package.
    pub fn deps(&self, name: &str) -> Vec<PackageName> {
        self.nodes
            .get(name)
            .map(|&node| self.graph.neighbors(node).map(|n| self.graph[n].clone()).collect())
            .unwrap_or_default()
    }

    /// Packages that depend directly on `name`.
    pub fn dependents(&self, name: &str) -> Vec<PackageName> {
        self.nodes
            .get(name)
            .map(|&node| {
                self.graph
                    .neighbors_directed(node, Direction::Incoming)
                    .map(|n| self.graph[n].clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.nodes.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::book_from;

    #[test]
    fn test_build_order_puts_dependencies_first() {
        let book = book_from(&[
            ("scalapack", &["mpi", "blaslapack"]),
            ("mpi", &[]),
            ("blaslapack", &[]),
        ]);

        let graph = DependencyGraph::from_roots(&book, &["scalapack".into()]).unwrap();
        graph.check_acyclic().unwrap();

        let order = graph.build_order();
        assert_eq!(order.len(), 3);
        assert_eq!(order.last().unwrap().as_str(), "scalapack");
        assert_eq!(
            graph.levels(),
            vec![
                vec![PackageName::from("blaslapack"), PackageName::from("mpi")],
                vec![PackageName::from("scalapack")],
            ]
        );
    }

    #[test]
    fn test_cycle_reports_path() {
        let book = book_from(&[("a", &["b"]), ("b", &["c"]), ("c", &["a"])]);

        let graph = DependencyGraph::from_roots(&book, &["a".into()]).unwrap();
        let err = graph.check_acyclic().unwrap_err();

        let ResolveError::CycleDependency { cycle } = err else {
            panic!("expected a cycle");
        };
        let names: Vec<&str> = cycle.iter().map(|n| n.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c", "a"]);
    }

    #[test]
    fn test_unknown_root() {
        let book = book_from(&[("a", &[])]);

        let err = DependencyGraph::from_roots(&book, &["nope".into()]).unwrap_err();
        assert!(matches!(
            err,
            ResolveError::UnknownDependency { referenced_by: None, .. }
        ));
    }

    #[test]
    fn test_only_reachable_packages() {
        let book = book_from(&[("y", &["z"]), ("z", &[]), ("w", &[])]);

        let graph = DependencyGraph::from_roots(&book, &["y".into()]).unwrap();
        assert_eq!(graph.len(), 2);
        assert!(!graph.contains("w"));
        assert_eq!(graph.dependents("z"), vec![PackageName::from("y")]);
    }
}
