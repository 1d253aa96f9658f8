use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::path::PathBuf;

/// Raw inventory as written in the inventory file, before overlays and resolution
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InventoryFile {
    #[serde(default)]
    pub defaults: ConnectionDefaults,
    #[serde(default)]
    pub vars: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub groups: BTreeMap<String, GroupDefinition>,
    #[serde(default)]
    pub hosts: BTreeMap<String, HostDefinition>,
}

/// Fleet-wide connection settings applied to hosts that do not override them
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConnectionDefaults {
    pub user: Option<String>,
    pub port: Option<u16>,
    pub credential: Option<String>,
    pub bootstrap_user: Option<String>,
    pub bootstrap_credential: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GroupDefinition {
    #[serde(default)]
    pub hosts: Vec<String>,
    #[serde(default)]
    pub children: Vec<String>,
    #[serde(default)]
    pub vars: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HostDefinition {
    pub address: Option<String>,
    pub port: Option<u16>,
    pub user: Option<String>,
    pub credential: Option<String>,
    pub bootstrap_user: Option<String>,
    pub bootstrap_credential: Option<String>,
    #[serde(default)]
    pub best_effort: bool,
    #[serde(default)]
    pub groups: Vec<String>,
    #[serde(default)]
    pub vars: HashMap<String, serde_json::Value>,
}

/// Inventory after overlay files have been merged, ready for validation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsedInventory {
    pub defaults: ConnectionDefaults,
    pub hosts: BTreeMap<String, InventoryHost>,
    pub groups: BTreeMap<String, InventoryGroup>,
    pub global_vars: HashMap<String, serde_json::Value>,
    pub metadata: InventoryMetadata,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventoryHost {
    pub name: String,
    pub definition: HostDefinition,
    /// Groups that list this host directly, from either side of the relation
    pub direct_groups: BTreeSet<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventoryGroup {
    pub name: String,
    pub hosts: Vec<String>,
    pub children: Vec<String>,
    pub variables: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventoryMetadata {
    pub source: PathBuf,
    pub parsed_at: DateTime<Utc>,
    pub host_count: usize,
    pub group_count: usize,
    pub overlay_files: Vec<PathBuf>,
}

/// Opaque reference to a credential (key file path, agent identity, ...).
/// The secret material itself never passes through the inventory.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CredentialRef(String);

impl CredentialRef {
    pub fn new(handle: impl Into<String>) -> Self {
        Self(handle.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Expand a leading `~/` against the local home directory
    pub fn expanded(&self) -> PathBuf {
        match self.0.strip_prefix("~/") {
            Some(rest) => dirs::home_dir()
                .map(|home| home.join(rest))
                .unwrap_or_else(|| PathBuf::from(&self.0)),
            None => PathBuf::from(&self.0),
        }
    }
}

/// A login identity used to reach a host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub user: String,
    pub credential: Option<CredentialRef>,
}

impl Identity {
    pub fn new(user: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            credential: None,
        }
    }

    pub fn with_credential(mut self, credential: CredentialRef) -> Self {
        self.credential = Some(credential);
        self
    }

    pub fn is_root(&self) -> bool {
        self.user == "root"
    }
}

/// Fully resolved host: immutable for the duration of a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Host {
    pub name: String,
    pub address: String,
    pub port: u16,
    pub control: Identity,
    pub bootstrap: Option<Identity>,
    pub groups: BTreeSet<String>,
    pub variables: BTreeMap<String, serde_json::Value>,
    pub best_effort: bool,
}

impl Host {
    pub fn target(&self, identity: &Identity) -> ConnectionTarget {
        ConnectionTarget {
            host: self.name.clone(),
            address: self.address.clone(),
            port: self.port,
            identity: identity.clone(),
        }
    }

    pub fn control_target(&self) -> ConnectionTarget {
        self.target(&self.control)
    }

    /// Identity used for bootstrap tasks: the fallback identity when configured
    pub fn bootstrap_target(&self) -> ConnectionTarget {
        self.target(self.bootstrap.as_ref().unwrap_or(&self.control))
    }

    pub fn is_member_of(&self, group: &str) -> bool {
        group == ALL_GROUP || self.groups.contains(group)
    }
}

/// Resolved group: transitive membership and its own variable layer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Group {
    pub name: String,
    pub members: BTreeSet<String>,
    pub children: Vec<String>,
    pub variables: HashMap<String, serde_json::Value>,
}

/// Where and as whom a remote operation is issued
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionTarget {
    pub host: String,
    pub address: String,
    pub port: u16,
    pub identity: Identity,
}

impl fmt::Display for ConnectionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.identity.user, self.address, self.port)
    }
}

/// Implicit group every host belongs to
pub const ALL_GROUP: &str = "all";

pub const DEFAULT_SSH_PORT: u16 = 22;
