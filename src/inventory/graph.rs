use crate::inventory::error::LoadError;
use crate::types::inventory::InventoryGroup;
use petgraph::algo::{tarjan_scc, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::{Bfs, Reversed};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Group nesting graph; edges point from a parent group to its children
pub struct GroupGraph {
    graph: DiGraph<String, ()>,
    nodes: HashMap<String, NodeIndex>,
}

impl GroupGraph {
    pub fn build(groups: &BTreeMap<String, InventoryGroup>) -> Result<Self, LoadError> {
        let mut graph = DiGraph::new();
        let mut nodes = HashMap::new();

        for name in groups.keys() {
            nodes.insert(name.clone(), graph.add_node(name.clone()));
        }

        for (name, group) in groups {
            let parent = nodes[name];
            for child_name in &group.children {
                let child = nodes.get(child_name).copied().ok_or_else(|| {
                    LoadError::UnknownGroupReference {
                        referrer: format!("group '{name}'"),
                        group: child_name.clone(),
                    }
                })?;
                graph.update_edge(parent, child, ());
            }
        }

        Ok(Self { graph, nodes })
    }

    /// First nesting cycle found, as sorted group names
    pub fn find_cycle(&self) -> Option<Vec<String>> {
        let mut cycles: Vec<Vec<String>> = tarjan_scc(&self.graph)
            .into_iter()
            .filter(|component| {
                component.len() > 1
                    || self
                        .graph
                        .find_edge(component[0], component[0])
                        .is_some()
            })
            .map(|component| {
                let mut names: Vec<String> = component
                    .into_iter()
                    .map(|idx| self.graph[idx].clone())
                    .collect();
                names.sort();
                names
            })
            .collect();

        cycles.sort();
        cycles.into_iter().next()
    }

    pub fn ensure_acyclic(&self) -> Result<(), LoadError> {
        match self.find_cycle() {
            Some(cycle) => Err(LoadError::CyclicGroup { cycle }),
            None => Ok(()),
        }
    }

    /// Nesting depth of every group: top-level groups are 0, children are
    /// one deeper than their deepest parent
    pub fn depths(&self) -> Result<HashMap<String, usize>, LoadError> {
        let order = toposort(&self.graph, None).map_err(|_| LoadError::CyclicGroup {
            cycle: self.find_cycle().unwrap_or_default(),
        })?;

        let mut depth: HashMap<NodeIndex, usize> = HashMap::new();
        for node in order {
            let current = depth.get(&node).copied().unwrap_or(0);
            for child in self.graph.neighbors(node) {
                let entry = depth.entry(child).or_insert(0);
                *entry = (*entry).max(current + 1);
            }
            depth.entry(node).or_insert(current);
        }

        Ok(depth
            .into_iter()
            .map(|(idx, d)| (self.graph[idx].clone(), d))
            .collect())
    }

    /// The group itself plus every group that transitively contains it
    pub fn with_ancestors(&self, group: &str) -> BTreeSet<String> {
        let mut found = BTreeSet::new();
        let Some(&start) = self.nodes.get(group) else {
            return found;
        };

        let reversed = Reversed(&self.graph);
        let mut bfs = Bfs::new(reversed, start);
        while let Some(node) = bfs.next(reversed) {
            found.insert(self.graph[node].clone());
        }
        found
    }

    pub fn contains(&self, group: &str) -> bool {
        self.nodes.contains_key(group)
    }
}
