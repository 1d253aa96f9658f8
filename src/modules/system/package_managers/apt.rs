//! APT package manager for Debian/Ubuntu systems

use crate::modules::system::package_managers::PackageManager;
use crate::transport::CommandOutput;
use crate::types::PackageManagerKind;
use shell_words::quote;
use std::collections::BTreeMap;

/// dpkg keeps removed packages with conffiles around in state `rc`, so
/// every query carries the status abbreviation next to the version
const STATUS_FORMAT: &str = "${db:Status-Abbrev}";

pub struct AptPackageManager;

impl Default for AptPackageManager {
    fn default() -> Self {
        Self::new()
    }
}

impl AptPackageManager {
    pub fn new() -> Self {
        Self
    }
}

/// Second status letter `i` means unpacked and configured (`ii`, `hi`)
fn is_installed(status: &str) -> bool {
    status.as_bytes().get(1) == Some(&b'i')
}

impl PackageManager for AptPackageManager {
    fn kind(&self) -> PackageManagerKind {
        PackageManagerKind::Apt
    }

    fn query_command(&self, name: &str) -> String {
        format!("dpkg-query -W -f='{STATUS_FORMAT} ${{Version}}' {}", quote(name))
    }

    fn parse_query(&self, output: &CommandOutput) -> Option<String> {
        if !output.success() {
            return None;
        }
        let mut fields = output.stdout.split_whitespace();
        let status = fields.next()?;
        let version = fields.next()?;
        is_installed(status).then(|| version.to_string())
    }

    fn install_command(&self, name: &str, version: Option<&str>) -> String {
        let package = match version {
            Some(version) => format!("{name}={version}"),
            None => name.to_string(),
        };
        format!(
            "env DEBIAN_FRONTEND=noninteractive apt-get install -y {}",
            quote(&package)
        )
    }

    fn remove_command(&self, name: &str) -> String {
        format!(
            "env DEBIAN_FRONTEND=noninteractive apt-get remove -y {}",
            quote(name)
        )
    }

    fn list_command(&self) -> &'static str {
        "dpkg-query -W -f='${db:Status-Abbrev} ${Package} ${Version}\\n'"
    }

    fn parse_list(&self, output: &str) -> BTreeMap<String, String> {
        output
            .lines()
            .filter_map(|line| {
                let mut fields = line.split_whitespace();
                let status = fields.next()?;
                let name = fields.next()?;
                let version = fields.next().unwrap_or_default();
                is_installed(status).then(|| (name.to_string(), version.to_string()))
            })
            .collect()
    }
}
