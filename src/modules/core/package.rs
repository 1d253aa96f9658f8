//! Package module - manages system packages

use async_trait::async_trait;
use semver::{Version, VersionReq};

use crate::modules::{
    error::{ModuleExecutionError, ValidationError},
    interface::{ConvergenceModule, DesiredState, ModuleArgs, ModuleContext, StateCheck},
    system::package_managers::{self, PackageManager},
};

/// Package module - manages system packages
pub struct PackageModule;

impl PackageModule {
    fn manager(
        context: &ModuleContext<'_>,
    ) -> Result<Box<dyn PackageManager>, ModuleExecutionError> {
        package_managers::for_kind(context.facts.package_manager).ok_or_else(|| {
            ModuleExecutionError::Unsupported {
                reason: format!(
                    "no supported package manager on {} ({})",
                    context.host.name, context.facts.os_family
                ),
            }
        })
    }

    async fn installed_version(
        manager: &dyn PackageManager,
        context: &ModuleContext<'_>,
        name: &str,
    ) -> Result<Option<String>, ModuleExecutionError> {
        let output = context.run(&manager.query_command(name)).await?;
        Ok(manager.parse_query(&output))
    }
}

#[async_trait]
impl ConvergenceModule for PackageModule {
    fn name(&self) -> &'static str {
        "package"
    }

    fn validate_args(&self, args: &ModuleArgs) -> Result<(), ValidationError> {
        args.ensure_known(&["name", "version", "state"])?;
        args.expect_string("name", true)?;
        args.expect_string("version", false)?;
        args.state()?;

        if let Some(version) = args.get_str("version") {
            if is_requirement(version) && VersionReq::parse(version).is_err() {
                return Err(ValidationError::InvalidArgValue {
                    arg: "version".to_string(),
                    value: version.to_string(),
                    reason: "not a valid version requirement".to_string(),
                });
            }
        }
        Ok(())
    }

    async fn check(
        &self,
        args: &ModuleArgs,
        context: &ModuleContext<'_>,
    ) -> Result<StateCheck, ModuleExecutionError> {
        let name = args.required_str("name")?;
        let wanted = args.get_str("version");
        let manager = Self::manager(context)?;
        let installed = Self::installed_version(manager.as_ref(), context, name).await?;

        let check = match (args.state()?, installed) {
            (DesiredState::Present, None) => StateCheck::drift(format!("{name} not installed")),
            (DesiredState::Present, Some(installed)) => match wanted {
                Some(wanted) if !version_satisfies(&installed, wanted) => StateCheck::drift(
                    format!("{name} {installed} installed, want {wanted}"),
                ),
                _ => StateCheck::Satisfied,
            },
            (DesiredState::Absent, Some(installed)) => {
                StateCheck::drift(format!("{name} {installed} installed"))
            }
            (DesiredState::Absent, None) => StateCheck::Satisfied,
        };
        Ok(check)
    }

    async fn apply(
        &self,
        args: &ModuleArgs,
        context: &ModuleContext<'_>,
    ) -> Result<String, ModuleExecutionError> {
        let name = args.required_str("name")?;
        let manager = Self::manager(context)?;

        match args.state()? {
            DesiredState::Present => {
                // Requirements cannot be pinned; the repository's newest
                // candidate is installed instead
                let pin = args.get_str("version").filter(|v| !is_requirement(v));
                context
                    .run_checked(
                        &format!("{} install", manager.kind()),
                        &manager.install_command(name, pin),
                    )
                    .await?;
                Ok(match pin {
                    Some(version) => format!("installed {name} {version}"),
                    None => format!("installed {name}"),
                })
            }
            DesiredState::Absent => {
                context
                    .run_checked(
                        &format!("{} remove", manager.kind()),
                        &manager.remove_command(name),
                    )
                    .await?;
                Ok(format!("removed {name}"))
            }
        }
    }
}

/// `^1.2`, `>=2, <3`, `*` and friends; anything else is an exact version
fn is_requirement(version: &str) -> bool {
    version.starts_with(['^', '~', '=', '>', '<', '*']) || version.contains(',')
}

/// Distribution version with epoch and packaging revision removed,
/// e.g. `1:2.39.2-1ubuntu1` -> `2.39.2`
fn upstream_version(installed: &str) -> &str {
    let without_epoch = installed
        .split_once(':')
        .map_or(installed, |(_, rest)| rest);
    without_epoch
        .split(['-', '+', '~'])
        .next()
        .unwrap_or(without_epoch)
}

fn parse_lenient(version: &str) -> Option<Version> {
    let mut parts = [0u64; 3];
    let mut count = 0;
    for (i, part) in version.split('.').enumerate() {
        if i >= 3 {
            break;
        }
        parts[i] = part.parse().ok()?;
        count += 1;
    }
    (count > 0).then(|| Version::new(parts[0], parts[1], parts[2]))
}

pub(crate) fn version_satisfies(installed: &str, wanted: &str) -> bool {
    if !is_requirement(wanted) {
        return installed == wanted || upstream_version(installed) == wanted;
    }

    match (
        VersionReq::parse(wanted),
        parse_lenient(upstream_version(installed)),
    ) {
        (Ok(req), Some(version)) => req.matches(&version),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_versions() {
        assert!(version_satisfies("1:2.39.2-1ubuntu1", "1:2.39.2-1ubuntu1"));
        assert!(version_satisfies("1:2.39.2-1ubuntu1", "2.39.2"));
        assert!(!version_satisfies("1:2.39.2-1ubuntu1", "2.39"));
        assert!(!version_satisfies("2.43.0", "2.39.2"));
    }

    #[test]
    fn test_requirements() {
        assert!(version_satisfies("1:2.39.2-1", ">=2.30"));
        assert!(version_satisfies("5.1", "^5"));
        assert!(!version_satisfies("2.43.0", "<2.40"));
        assert!(!version_satisfies("weird-version", ">=1"));
    }

    #[test]
    fn test_validate_rejects_bad_requirement() {
        let args = ModuleArgs::new(
            [
                ("name".to_string(), serde_json::json!("git")),
                ("version".to_string(), serde_json::json!(">=not.a.version")),
            ]
            .into(),
        );
        assert!(PackageModule.validate_args(&args).is_err());
    }
}
