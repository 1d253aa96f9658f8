use crate::inventory::graph::GroupGraph;
use crate::types::inventory::{InventoryHost, ParsedInventory};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Merges variable layers for a host: globals, then every group the host
/// belongs to (shallowest first, ties by name), then host variables.
/// Later layers win per key.
pub struct VariableResolver<'a> {
    inventory: &'a ParsedInventory,
    graph: &'a GroupGraph,
    depths: &'a HashMap<String, usize>,
}

impl<'a> VariableResolver<'a> {
    pub fn new(
        inventory: &'a ParsedInventory,
        graph: &'a GroupGraph,
        depths: &'a HashMap<String, usize>,
    ) -> Self {
        Self {
            inventory,
            graph,
            depths,
        }
    }

    /// Direct groups plus everything that transitively contains them
    pub fn memberships(&self, host: &InventoryHost) -> BTreeSet<String> {
        host.direct_groups
            .iter()
            .filter(|group| self.graph.contains(group))
            .flat_map(|group| self.graph.with_ancestors(group))
            .collect()
    }

    pub fn precedence_order(&self, groups: &BTreeSet<String>) -> Vec<String> {
        let mut ordered: Vec<String> = groups.iter().cloned().collect();
        ordered.sort_by(|a, b| {
            let depth_a = self.depths.get(a).copied().unwrap_or(0);
            let depth_b = self.depths.get(b).copied().unwrap_or(0);
            depth_a.cmp(&depth_b).then_with(|| a.cmp(b))
        });
        ordered
    }

    pub fn resolve(
        &self,
        host: &InventoryHost,
        groups: &BTreeSet<String>,
    ) -> BTreeMap<String, serde_json::Value> {
        let mut resolved: BTreeMap<String, serde_json::Value> = self
            .inventory
            .global_vars
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        for group_name in self.precedence_order(groups) {
            if let Some(group) = self.inventory.groups.get(&group_name) {
                for (key, value) in &group.variables {
                    resolved.insert(key.clone(), value.clone());
                }
            }
        }

        for (key, value) in &host.definition.vars {
            resolved.insert(key.clone(), value.clone());
        }

        resolved
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::loader::InventoryLoader;
    use serde_json::json;

    #[test]
    fn test_deeper_groups_override_parents() {
        let inventory = InventoryLoader::new()
            .load_str(
                r#"
vars: { x: 1, only_global: true }
groups:
  fleet:
    children: [dev]
    vars: { x: 2, y: fleet }
  dev:
    hosts: [box]
    vars: { y: dev }
"#,
            )
            .unwrap();

        let graph = GroupGraph::build(&inventory.groups).unwrap();
        let depths = graph.depths().unwrap();
        let resolver = VariableResolver::new(&inventory, &graph, &depths);

        let host = &inventory.hosts["box"];
        let groups = resolver.memberships(host);
        assert!(groups.contains("fleet"));

        let vars = resolver.resolve(host, &groups);
        assert_eq!(vars["x"], json!(2));
        assert_eq!(vars["y"], json!("dev"));
        assert_eq!(vars["only_global"], json!(true));
    }

    #[test]
    fn test_sibling_groups_apply_in_name_order() {
        let inventory = InventoryLoader::new()
            .load_str(
                r#"
groups:
  beta: { hosts: [box], vars: { v: beta } }
  alpha: { hosts: [box], vars: { v: alpha } }
"#,
            )
            .unwrap();

        let graph = GroupGraph::build(&inventory.groups).unwrap();
        let depths = graph.depths().unwrap();
        let resolver = VariableResolver::new(&inventory, &graph, &depths);
        let host = &inventory.hosts["box"];
        let vars = resolver.resolve(host, &resolver.memberships(host));
        assert_eq!(vars["v"], json!("beta"));
    }
}
