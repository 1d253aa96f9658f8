use crate::inventory::{
    GroupGraph, InventoryError, InventoryLoader, InventoryValidatorSet, VariableResolver,
};
use crate::types::inventory::{
    CredentialRef, Group, Host, Identity, InventoryHost, ParsedInventory, DEFAULT_SSH_PORT,
};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Concrete per-host execution contexts produced from an inventory
#[derive(Debug, Clone)]
pub struct ResolvedInventory {
    pub hosts: Vec<Arc<Host>>,
    pub groups: BTreeMap<String, Group>,
}

impl ResolvedInventory {
    pub fn host(&self, name: &str) -> Option<&Arc<Host>> {
        self.hosts.iter().find(|h| h.name == name)
    }

    /// Restrict to hosts matching any of the comma separated host or group
    /// names. Every pattern must match something.
    pub fn limit(&self, patterns: &[String]) -> Result<Vec<Arc<Host>>, InventoryError> {
        if patterns.is_empty() {
            return Ok(self.hosts.clone());
        }

        for pattern in patterns {
            let matched = self
                .hosts
                .iter()
                .any(|h| h.name == *pattern || h.is_member_of(pattern));
            if !matched {
                return Err(InventoryError::UnmatchedLimit {
                    pattern: pattern.clone(),
                });
            }
        }

        Ok(self
            .hosts
            .iter()
            .filter(|h| {
                patterns
                    .iter()
                    .any(|p| h.name == *p || h.is_member_of(p))
            })
            .cloned()
            .collect())
    }
}

pub struct InventoryProcessor {
    loader: InventoryLoader,
    validators: InventoryValidatorSet,
}

impl InventoryProcessor {
    pub fn new() -> Self {
        Self {
            loader: InventoryLoader::new(),
            validators: InventoryValidatorSet::new(),
        }
    }

    pub fn load(&self, path: &Path) -> Result<ResolvedInventory, InventoryError> {
        info!("Loading inventory from {}", path.display());
        let parsed = self.loader.load(path)?;
        self.process(&parsed)
    }

    pub fn load_str(&self, content: &str) -> Result<ResolvedInventory, InventoryError> {
        let parsed = self.loader.load_str(content)?;
        self.process(&parsed)
    }

    pub fn process(&self, inventory: &ParsedInventory) -> Result<ResolvedInventory, InventoryError> {
        self.validators.validate(inventory)?;

        let graph = GroupGraph::build(&inventory.groups)?;
        let depths = graph.depths()?;
        let resolver = VariableResolver::new(inventory, &graph, &depths);

        let mut hosts = Vec::with_capacity(inventory.hosts.len());
        let mut members: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();

        for (name, host) in &inventory.hosts {
            let groups = resolver.memberships(host);
            for group in &groups {
                members
                    .entry(group.clone())
                    .or_default()
                    .insert(name.clone());
            }

            let variables = resolver.resolve(host, &groups);
            let resolved = build_host(inventory, host, groups, variables);
            debug!(
                "Resolved host {} ({}) in groups {:?}",
                resolved.name, resolved.address, resolved.groups
            );
            hosts.push(Arc::new(resolved));
        }

        let groups = inventory
            .groups
            .iter()
            .map(|(name, group)| {
                let resolved = Group {
                    name: name.clone(),
                    members: members.remove(name).unwrap_or_default(),
                    children: group.children.clone(),
                    variables: group.variables.clone(),
                };
                (name.clone(), resolved)
            })
            .collect();

        Ok(ResolvedInventory { hosts, groups })
    }
}

impl Default for InventoryProcessor {
    fn default() -> Self {
        Self::new()
    }
}

fn build_host(
    inventory: &ParsedInventory,
    host: &InventoryHost,
    groups: BTreeSet<String>,
    variables: BTreeMap<String, serde_json::Value>,
) -> Host {
    let def = &host.definition;
    let defaults = &inventory.defaults;

    let control_user = def
        .user
        .clone()
        .or_else(|| defaults.user.clone())
        .or_else(|| std::env::var("USER").ok())
        .unwrap_or_else(|| "root".to_string());
    let credential = def
        .credential
        .clone()
        .or_else(|| defaults.credential.clone())
        .map(CredentialRef::new);

    let mut control = Identity::new(control_user);
    if let Some(credential) = credential.clone() {
        control = control.with_credential(credential);
    }

    let bootstrap = def
        .bootstrap_user
        .clone()
        .or_else(|| defaults.bootstrap_user.clone())
        .filter(|user| *user != control.user)
        .map(|user| {
            let credential = def
                .bootstrap_credential
                .clone()
                .or_else(|| defaults.bootstrap_credential.clone())
                .map(CredentialRef::new)
                .or_else(|| credential.clone());
            let identity = Identity::new(user);
            match credential {
                Some(credential) => identity.with_credential(credential),
                None => identity,
            }
        });

    Host {
        name: host.name.clone(),
        address: def.address.clone().unwrap_or_else(|| host.name.clone()),
        port: def.port.or(defaults.port).unwrap_or(DEFAULT_SSH_PORT),
        control,
        bootstrap,
        groups,
        variables,
        best_effort: def.best_effort,
    }
}
