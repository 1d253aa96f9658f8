use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

/// Read-only properties observed on a host before any task runs
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Facts {
    pub os_family: OsFamily,
    pub os_name: Option<String>,
    pub os_version: Option<String>,
    pub users: BTreeSet<String>,
    /// Installed package name to version
    pub packages: BTreeMap<String, String>,
    pub package_manager: PackageManagerKind,
}

impl Facts {
    /// Flat map exposed to `when` conditions
    pub fn to_variables(&self) -> HashMap<String, Value> {
        let mut vars = HashMap::new();
        vars.insert("os_family".to_string(), json!(self.os_family.to_string()));
        vars.insert("os_name".to_string(), json!(self.os_name));
        vars.insert("os_version".to_string(), json!(self.os_version));
        vars.insert("users".to_string(), json!(self.users));
        vars.insert("packages".to_string(), json!(self.packages));
        vars.insert(
            "package_manager".to_string(),
            json!(self.package_manager.to_string()),
        );
        vars
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OsFamily {
    Debian,
    RedHat,
    Suse,
    Arch,
    Alpine,
    #[default]
    Unknown,
}

impl OsFamily {
    /// Map an os-release `ID` (or one `ID_LIKE` entry) to a family
    pub fn from_os_id(id: &str) -> Option<Self> {
        let id = id.trim().to_ascii_lowercase();
        let family = match id.as_str() {
            "debian" | "ubuntu" | "raspbian" | "linuxmint" | "pop" => Self::Debian,
            "rhel" | "centos" | "fedora" | "rocky" | "almalinux" | "ol" | "amzn" => Self::RedHat,
            "suse" | "sles" | "opensuse" | "opensuse-leap" | "opensuse-tumbleweed" => Self::Suse,
            "arch" | "manjaro" => Self::Arch,
            "alpine" => Self::Alpine,
            _ => return None,
        };
        Some(family)
    }
}

impl fmt::Display for OsFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Debian => "Debian",
            Self::RedHat => "RedHat",
            Self::Suse => "Suse",
            Self::Arch => "Arch",
            Self::Alpine => "Alpine",
            Self::Unknown => "Unknown",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageManagerKind {
    Apt,
    Dnf,
    Yum,
    #[default]
    None,
}

impl fmt::Display for PackageManagerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Apt => "apt",
            Self::Dnf => "dnf",
            Self::Yum => "yum",
            Self::None => "none",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_os_family_mapping() {
        assert_eq!(OsFamily::from_os_id("ubuntu"), Some(OsFamily::Debian));
        assert_eq!(OsFamily::from_os_id("Rocky"), Some(OsFamily::RedHat));
        assert_eq!(OsFamily::from_os_id("plan9"), None);
    }

    #[test]
    fn test_condition_variables() {
        let mut facts = Facts {
            os_family: OsFamily::Debian,
            package_manager: PackageManagerKind::Apt,
            ..Default::default()
        };
        facts.users.insert("deploy".to_string());

        let vars = facts.to_variables();
        assert_eq!(vars["os_family"], json!("Debian"));
        assert_eq!(vars["package_manager"], json!("apt"));
        assert_eq!(vars["users"], json!(["deploy"]));
    }
}
