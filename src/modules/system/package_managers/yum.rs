//! RPM based package managers (dnf, and yum on older releases)

use crate::modules::system::package_managers::PackageManager;
use crate::types::PackageManagerKind;
use shell_words::quote;

const RPM_QUERY: &str = "rpm -q --qf '%{VERSION}'";
const RPM_LIST: &str = "rpm -qa --qf '%{NAME} %{VERSION}\\n'";

fn package_spec(name: &str, version: Option<&str>) -> String {
    match version {
        Some(version) => quote(&format!("{name}-{version}")).into_owned(),
        None => quote(name).into_owned(),
    }
}

pub struct DnfPackageManager;

impl Default for DnfPackageManager {
    fn default() -> Self {
        Self::new()
    }
}

impl DnfPackageManager {
    pub fn new() -> Self {
        Self
    }
}

impl PackageManager for DnfPackageManager {
    fn kind(&self) -> PackageManagerKind {
        PackageManagerKind::Dnf
    }

    fn query_command(&self, name: &str) -> String {
        format!("{RPM_QUERY} {}", quote(name))
    }

    fn install_command(&self, name: &str, version: Option<&str>) -> String {
        format!("dnf install -y {}", package_spec(name, version))
    }

    fn remove_command(&self, name: &str) -> String {
        format!("dnf remove -y {}", quote(name))
    }

    fn list_command(&self) -> &'static str {
        RPM_LIST
    }
}

pub struct YumPackageManager;

impl Default for YumPackageManager {
    fn default() -> Self {
        Self::new()
    }
}

impl YumPackageManager {
    pub fn new() -> Self {
        Self
    }
}

impl PackageManager for YumPackageManager {
    fn kind(&self) -> PackageManagerKind {
        PackageManagerKind::Yum
    }

    fn query_command(&self, name: &str) -> String {
        format!("{RPM_QUERY} {}", quote(name))
    }

    fn install_command(&self, name: &str, version: Option<&str>) -> String {
        format!("yum install -y {}", package_spec(name, version))
    }

    fn remove_command(&self, name: &str) -> String {
        format!("yum remove -y {}", quote(name))
    }

    fn list_command(&self) -> &'static str {
        RPM_LIST
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_pin() {
        let dnf = DnfPackageManager::new();
        assert_eq!(dnf.install_command("git", Some("2.43.0")), "dnf install -y git-2.43.0");
        assert_eq!(dnf.query_command("git"), "rpm -q --qf '%{VERSION}' git");
        assert_eq!(YumPackageManager::new().remove_command("git"), "yum remove -y git");
    }
}
