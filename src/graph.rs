// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Module dependency graph.
//!
//! Nodes are module names. An edge `a -> b` means that `b` depends on `a`,
//! i.e., `a` must be present before `b` can be. Following edges backwards from
//! a module therefore visits everything it depends on, and following them
//! forwards visits everything that depends on it.
//!
//! # Phantoms
//!
//! A module may be named in a `depends` list without ever being discovered.
//! Such a name still gets a node so the edge can exist, but the node carries
//! no [`Addon`]. We call it a __phantom__. Discovering the addon later fills in
//! the phantom instead of creating a second node.
//!
//! The graph is expected to be acyclic, but bad manifests can introduce
//! cycles. Traversals never loop on them, and [`ModuleGraph::longest_path`]
//! gives up on a cyclic graph with a warning.

use crate::addon::Addon;

use petgraph::{
    algo::{astar, toposort},
    graph::{DiGraph, NodeIndex},
    visit::{Bfs, NodeFiltered, Reversed},
    Direction::{Incoming, Outgoing},
};
use std::{
    collections::{HashMap, HashSet},
    fmt::{Display, Formatter, Result as FmtResult},
};
use tracing::warn;

/// Node of module graph.
#[derive(Debug, Clone, PartialEq)]
pub struct ModuleNode {
    /// Module name.
    pub name: String,

    /// Discovered addon, or `None` for a phantom.
    pub addon: Option<Addon>,
}

impl ModuleNode {
    /// Check if module was referenced but never discovered.
    pub fn is_phantom(&self) -> bool {
        self.addon.is_none()
    }
}

/// Directed graph of module dependencies.
///
/// # Invariant
///
/// - Exactly one node per module name.
/// - No parallel edges.
#[derive(Debug, Default, Clone)]
pub struct ModuleGraph {
    graph: DiGraph<ModuleNode, ()>,
    indices: HashMap<String, NodeIndex>,
}

impl ModuleGraph {
    /// Construct new empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or overwrite node of discovered addon.
    ///
    /// Overwriting replaces the attributes of the node and drops its incoming
    /// dependency edges, since those belonged to the replaced manifest.
    /// Outgoing edges stay, because dependents still refer to the module by
    /// name.
    pub fn add_node(&mut self, addon: Addon) -> NodeIndex {
        let index = self.index_or_phantom(&addon.name);
        while let Some(edge) = self.graph.first_edge(index, Incoming) {
            self.graph.remove_edge(edge);
        }
        self.graph[index].addon = Some(addon);
        index
    }

    /// Record that `dependent` depends on `dependency`.
    ///
    /// Unknown names become phantom nodes.
    pub fn add_edge(&mut self, dependency: &str, dependent: &str) {
        let from = self.index_or_phantom(dependency);
        let to = self.index_or_phantom(dependent);
        self.graph.update_edge(from, to, ());
    }

    /// Add addon together with an edge for each of its dependencies.
    pub fn insert(&mut self, addon: Addon) {
        let name = addon.name.clone();
        let depends = addon.manifest.depends.clone();
        self.add_node(addon);
        for dependency in &depends {
            self.add_edge(dependency, &name);
        }
    }

    /// Build graph from a sequence of addons in discovery order.
    pub fn from_addons(addons: impl IntoIterator<Item = Addon>) -> Self {
        let mut graph = Self::new();
        for addon in addons {
            graph.insert(addon);
        }
        graph
    }

    /// Get node of module.
    pub fn get(&self, name: &str) -> Option<&ModuleNode> {
        self.indices.get(name).map(|index| &self.graph[*index])
    }

    /// Check if module has a node, phantom or not.
    pub fn contains(&self, name: &str) -> bool {
        self.indices.contains_key(name)
    }

    /// Amount of nodes, phantoms included.
    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    /// Check if graph has no nodes at all.
    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// Iterate every discovered addon in insertion order.
    pub fn addons(&self) -> impl Iterator<Item = &Addon> + '_ {
        self.graph
            .node_indices()
            .filter_map(|index| self.graph[index].addon.as_ref())
    }

    /// Transitive dependencies of a module in breadth-first order.
    ///
    /// Never includes the module itself, even when it sits on a cycle.
    /// Returns nothing for an unknown module.
    pub fn ancestors_of(&self, name: &str) -> Vec<&ModuleNode> {
        let Some(&start) = self.indices.get(name) else {
            return Vec::new();
        };

        let reversed = Reversed(&self.graph);
        let mut bfs = Bfs::new(reversed, start);
        let mut ancestors = Vec::new();
        while let Some(index) = bfs.next(reversed) {
            if index != start {
                ancestors.push(&self.graph[index]);
            }
        }
        ancestors
    }

    /// Direct dependencies of a module.
    pub fn predecessors_of(&self, name: &str) -> Vec<&ModuleNode> {
        self.neighbors(name, Incoming)
    }

    /// Direct dependents of a module.
    pub fn successors_of(&self, name: &str) -> Vec<&ModuleNode> {
        self.neighbors(name, Outgoing)
    }

    /// Shortest chain of modules leading from `from` to `to`, both included.
    ///
    /// Every module in the chain depends on the one before it.
    pub fn shortest_path(&self, from: &str, to: &str) -> Option<Vec<&ModuleNode>> {
        let start = *self.indices.get(from)?;
        let goal = *self.indices.get(to)?;
        let (_, path) = astar(&self.graph, start, |index| index == goal, |_| 1, |_| 0)?;
        Some(path.into_iter().map(|index| &self.graph[index]).collect())
    }

    /// Longest dependency chain among a subset of modules.
    ///
    /// Only edges between members of `subset` count. Returns an empty chain
    /// if the members form a cycle.
    pub fn longest_path<'a>(&self, subset: impl IntoIterator<Item = &'a str>) -> Vec<&ModuleNode> {
        let members = subset
            .into_iter()
            .filter_map(|name| self.indices.get(name).copied())
            .collect::<HashSet<_>>();

        let members_only = NodeFiltered::from_fn(&self.graph, |index| members.contains(&index));
        let order = match toposort(&members_only, None) {
            Ok(order) => order,
            Err(cycle) => {
                warn!(
                    "dependency cycle through {}, cannot compute longest chain",
                    self.graph[cycle.node_id()].name
                );
                return Vec::new();
            }
        };

        let mut length: HashMap<NodeIndex, usize> = HashMap::new();
        let mut previous: HashMap<NodeIndex, NodeIndex> = HashMap::new();
        let mut end = None;
        for index in order {
            let best = self
                .graph
                .neighbors_directed(index, Incoming)
                .filter(|dependency| members.contains(dependency))
                .filter_map(|dependency| length.get(&dependency).map(|len| (*len, dependency)))
                .max_by_key(|(len, _)| *len);

            let len = match best {
                Some((len, dependency)) => {
                    previous.insert(index, dependency);
                    len + 1
                }
                None => 0,
            };
            length.insert(index, len);

            if end.is_none_or(|(longest, _)| len > longest) {
                end = Some((len, index));
            }
        }

        let mut path = Vec::new();
        let mut cursor = end.map(|(_, index)| index);
        while let Some(index) = cursor {
            path.push(&self.graph[index]);
            cursor = previous.get(&index).copied();
        }
        path.reverse();
        path
    }

    /// Phantom modules that are still referenced, with their dependents.
    pub fn phantoms(&self) -> Vec<(&str, Vec<&str>)> {
        self.graph
            .node_indices()
            .filter(|index| self.graph[*index].is_phantom())
            .filter_map(|index| {
                let dependents = self
                    .graph
                    .neighbors_directed(index, Outgoing)
                    .map(|dependent| self.graph[dependent].name.as_str())
                    .collect::<Vec<_>>();
                (!dependents.is_empty()).then(|| (self.graph[index].name.as_str(), dependents))
            })
            .collect()
    }

    fn neighbors(&self, name: &str, direction: petgraph::Direction) -> Vec<&ModuleNode> {
        let Some(&index) = self.indices.get(name) else {
            return Vec::new();
        };

        let mut neighbors = self
            .graph
            .neighbors_directed(index, direction)
            .collect::<Vec<_>>();
        // INVARIANT: petgraph walks adjacency lists newest edge first.
        neighbors.reverse();
        neighbors
            .into_iter()
            .map(|index| &self.graph[index])
            .collect()
    }

    fn index_or_phantom(&mut self, name: &str) -> NodeIndex {
        if let Some(index) = self.indices.get(name) {
            return *index;
        }

        let index = self.graph.add_node(ModuleNode {
            name: name.to_string(),
            addon: None,
        });
        self.indices.insert(name.to_string(), index);
        index
    }
}

/// Summary of where a module sits in the dependency graph.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DependencyReport {
    pub module: String,

    /// Direct dependencies, sorted.
    pub direct: Vec<String>,

    /// Shortest chain from the root module `base`.
    pub shortest: Vec<String>,

    /// Longest chain among all transitive dependencies.
    pub longest: Vec<String>,

    /// Transitive dependencies that are not direct ones, sorted.
    pub indirect: Vec<String>,
}

impl ModuleGraph {
    /// Report dependencies of a module, or `None` for an unknown module.
    pub fn report(&self, module: &str) -> Option<DependencyReport> {
        if !self.contains(module) {
            return None;
        }

        let names = |nodes: Vec<&ModuleNode>| {
            nodes
                .into_iter()
                .map(|node| node.name.clone())
                .collect::<Vec<_>>()
        };

        let mut direct = names(self.predecessors_of(module));
        direct.sort();
        let all = names(self.ancestors_of(module));
        let mut indirect = all
            .iter()
            .filter(|name| !direct.contains(*name))
            .cloned()
            .collect::<Vec<_>>();
        indirect.sort();

        Some(DependencyReport {
            module: module.to_string(),
            shortest: self
                .shortest_path("base", module)
                .map(names)
                .unwrap_or_default(),
            longest: names(self.longest_path(all.iter().map(String::as_str))),
            direct,
            indirect,
        })
    }
}

impl Display for DependencyReport {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        writeln!(fmt, "{}: {}", self.module, self.direct.join(", "))?;
        writeln!(fmt, "Shortest: {}", self.shortest.join(" > "))?;
        writeln!(fmt, "Longest:  {}", self.longest.join(" > "))?;
        write!(fmt, "All Deps: {}", self.indirect.join(", "))
    }
}

impl FromIterator<Addon> for ModuleGraph {
    fn from_iter<T: IntoIterator<Item = Addon>>(iter: T) -> Self {
        Self::from_addons(iter)
    }
}
