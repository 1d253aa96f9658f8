//! Package manager command builders

use crate::transport::CommandOutput;
use crate::types::PackageManagerKind;
use std::collections::BTreeMap;

pub mod apt;
pub mod yum;

pub use apt::AptPackageManager;
pub use yum::{DnfPackageManager, YumPackageManager};

/// Remote command lines for one package manager
pub trait PackageManager: Send + Sync {
    fn kind(&self) -> PackageManagerKind;
    fn query_command(&self, name: &str) -> String;

    /// Installed version from the output of `query_command`. By default
    /// the query prints the version and exits non-zero when absent.
    fn parse_query(&self, output: &CommandOutput) -> Option<String> {
        let version = output.stdout.trim();
        (output.success() && !version.is_empty()).then(|| version.to_string())
    }

    fn install_command(&self, name: &str, version: Option<&str>) -> String;
    fn remove_command(&self, name: &str) -> String;
    /// Prints one `name version` pair per line
    fn list_command(&self) -> &'static str;

    fn parse_list(&self, output: &str) -> BTreeMap<String, String> {
        output
            .lines()
            .filter_map(|line| {
                let mut fields = line.split_whitespace();
                let name = fields.next()?;
                let version = fields.next().unwrap_or_default();
                Some((name.to_string(), version.to_string()))
            })
            .collect()
    }
}

pub fn for_kind(kind: PackageManagerKind) -> Option<Box<dyn PackageManager>> {
    match kind {
        PackageManagerKind::Apt => Some(Box::new(AptPackageManager::new())),
        PackageManagerKind::Dnf => Some(Box::new(DnfPackageManager::new())),
        PackageManagerKind::Yum => Some(Box::new(YumPackageManager::new())),
        PackageManagerKind::None => None,
    }
}
