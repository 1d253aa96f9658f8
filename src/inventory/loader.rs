use crate::inventory::error::{InventoryError, LoadError};
use crate::types::inventory::{
    InventoryFile, InventoryGroup, InventoryHost, InventoryMetadata, ParsedInventory, ALL_GROUP,
};
use chrono::Utc;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const OVERLAY_EXTENSIONS: [&str; 2] = ["yml", "yaml"];

/// Reads an inventory file and merges `group_vars/` and `host_vars/` overlays
pub struct InventoryLoader;

impl InventoryLoader {
    pub fn new() -> Self {
        Self
    }

    pub fn load(&self, path: &Path) -> Result<ParsedInventory, InventoryError> {
        let content = read_file(path)?;
        let file: InventoryFile =
            serde_yaml::from_str(&content).map_err(|e| InventoryError::InvalidYaml {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;

        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
        self.build(file, path, Some(base_dir))
    }

    pub fn load_str(&self, content: &str) -> Result<ParsedInventory, InventoryError> {
        let file: InventoryFile =
            serde_yaml::from_str(content).map_err(|e| InventoryError::InvalidYaml {
                path: PathBuf::from("<inline>"),
                reason: e.to_string(),
            })?;
        self.build(file, Path::new("<inline>"), None)
    }

    fn build(
        &self,
        mut file: InventoryFile,
        source: &Path,
        overlay_dir: Option<&Path>,
    ) -> Result<ParsedInventory, InventoryError> {
        let mut overlay_files = Vec::new();

        if let Some(all) = file.groups.remove(ALL_GROUP) {
            if !all.hosts.is_empty() || !all.children.is_empty() {
                return Err(LoadError::InvalidGroup {
                    group: ALL_GROUP.to_string(),
                    reason: "the implicit group cannot list hosts or children".to_string(),
                }
                .into());
            }
            file.vars.extend(all.vars);
        }

        let mut groups: BTreeMap<String, InventoryGroup> = file
            .groups
            .into_iter()
            .map(|(name, def)| {
                let group = InventoryGroup {
                    name: name.clone(),
                    hosts: def.hosts,
                    children: def.children,
                    variables: def.vars,
                };
                (name, group)
            })
            .collect();

        let mut hosts: BTreeMap<String, InventoryHost> = file
            .hosts
            .into_iter()
            .map(|(name, definition)| {
                let direct_groups = definition.groups.iter().cloned().collect();
                let host = InventoryHost {
                    name: name.clone(),
                    definition,
                    direct_groups,
                };
                (name, host)
            })
            .collect();

        // Hosts named only inside a group are defined implicitly
        for group in groups.values() {
            for host_name in &group.hosts {
                let host = hosts
                    .entry(host_name.clone())
                    .or_insert_with(|| InventoryHost {
                        name: host_name.clone(),
                        definition: Default::default(),
                        direct_groups: BTreeSet::new(),
                    });
                host.direct_groups.insert(group.name.clone());
            }
        }

        let mut global_vars = file.vars;

        if let Some(dir) = overlay_dir {
            let group_dir = dir.join("group_vars");
            if let Some((vars, path)) = read_overlay(&group_dir, ALL_GROUP)? {
                global_vars.extend(vars);
                overlay_files.push(path);
            }
            for group in groups.values_mut() {
                if let Some((vars, path)) = read_overlay(&group_dir, &group.name)? {
                    group.variables.extend(vars);
                    overlay_files.push(path);
                }
            }

            let host_dir = dir.join("host_vars");
            for host in hosts.values_mut() {
                if let Some((vars, path)) = read_overlay(&host_dir, &host.name)? {
                    host.definition.vars.extend(vars);
                    overlay_files.push(path);
                }
            }

            warn_orphan_overlays(&group_dir, |name| {
                name == ALL_GROUP || groups.contains_key(name)
            });
            warn_orphan_overlays(&host_dir, |name| hosts.contains_key(name));
        }

        debug!(
            "Loaded inventory {} with {} hosts, {} groups, {} overlay files",
            source.display(),
            hosts.len(),
            groups.len(),
            overlay_files.len()
        );

        let metadata = InventoryMetadata {
            source: source.to_path_buf(),
            parsed_at: Utc::now(),
            host_count: hosts.len(),
            group_count: groups.len(),
            overlay_files,
        };

        Ok(ParsedInventory {
            defaults: file.defaults,
            hosts,
            groups,
            global_vars,
            metadata,
        })
    }
}

impl Default for InventoryLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn read_file(path: &Path) -> Result<String, InventoryError> {
    std::fs::read_to_string(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => InventoryError::FileNotFound {
            path: path.to_path_buf(),
        },
        _ => InventoryError::Io {
            path: path.to_path_buf(),
            source: e,
        },
    })
}

type Overlay = (HashMap<String, serde_json::Value>, PathBuf);

fn read_overlay(dir: &Path, name: &str) -> Result<Option<Overlay>, InventoryError> {
    for extension in OVERLAY_EXTENSIONS {
        let path = dir.join(format!("{name}.{extension}"));
        if !path.is_file() {
            continue;
        }

        let content = read_file(&path)?;
        // An empty overlay file deserializes to unit, not a mapping
        if content.trim().is_empty() {
            return Ok(Some((HashMap::new(), path)));
        }
        let vars = serde_yaml::from_str(&content).map_err(|e| InventoryError::InvalidYaml {
            path: path.clone(),
            reason: e.to_string(),
        })?;
        return Ok(Some((vars, path)));
    }
    Ok(None)
}

fn warn_orphan_overlays(dir: &Path, known: impl Fn(&str) -> bool) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        let is_overlay = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| OVERLAY_EXTENSIONS.contains(&ext));
        if !is_overlay {
            continue;
        }
        if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
            if !known(stem) {
                warn!("Ignoring overlay {} for undefined name", path.display());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_implicit_hosts_and_membership() {
        let inventory = InventoryLoader::new()
            .load_str(
                r#"
groups:
  web:
    hosts: [web-01]
hosts:
  db-01:
    groups: [web]
"#,
            )
            .unwrap();

        assert_eq!(inventory.hosts.len(), 2);
        assert!(inventory.hosts["web-01"].direct_groups.contains("web"));
        assert!(inventory.hosts["db-01"].direct_groups.contains("web"));
    }

    #[test]
    fn test_all_group_vars_fold_into_globals() {
        let inventory = InventoryLoader::new()
            .load_str(
                r#"
vars: { a: 1 }
groups:
  all:
    vars: { b: 2 }
"#,
            )
            .unwrap();

        assert_eq!(inventory.global_vars.len(), 2);
        assert!(!inventory.groups.contains_key(ALL_GROUP));
    }

    #[test]
    fn test_all_group_cannot_list_hosts() {
        let result = InventoryLoader::new().load_str("groups:\n  all:\n    hosts: [x]\n");
        assert!(matches!(
            result,
            Err(InventoryError::Load(LoadError::InvalidGroup { .. }))
        ));
    }

    #[test]
    fn test_unknown_fields_rejected() {
        let result = InventoryLoader::new().load_str("hosts:\n  a:\n    adress: 10.0.0.1\n");
        assert!(matches!(result, Err(InventoryError::InvalidYaml { .. })));
    }
}
