use crate::config::RetryPolicy;
use crate::modules::system::package_managers;
use crate::runtime::FactsError;
use crate::transport::{CommandOutput, Transport, TransportError};
use crate::types::{ConnectionTarget, Facts, Host, OsFamily, PackageManagerKind};
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, info, warn};

pub const OS_RELEASE_COMMAND: &str = "cat /etc/os-release";
pub const USERS_COMMAND: &str = "getent passwd";

/// Which of the host's identities the facts were gathered with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityRole {
    Control,
    Bootstrap,
}

#[derive(Debug)]
pub struct FactReport {
    pub facts: Facts,
    pub identity: IdentityRole,
    /// Set when some facts could not be gathered
    pub degraded: Option<FactsError>,
}

/// Gathers OS, user and package facts from a remote host
pub struct FactCollector<'a> {
    transport: &'a dyn Transport,
    retry: &'a RetryPolicy,
}

impl<'a> FactCollector<'a> {
    pub fn new(transport: &'a dyn Transport, retry: &'a RetryPolicy) -> Self {
        Self { transport, retry }
    }

    pub async fn collect(&self, host: &Host) -> Result<FactReport, FactsError> {
        let control = host.control_target();
        match self.run_with_retry(&control, OS_RELEASE_COMMAND).await {
            Ok(os_release) => self.gather(&control, os_release, IdentityRole::Control).await,
            Err(e) if e.is_authentication() && host.bootstrap.is_some() => {
                let bootstrap = host.bootstrap_target();
                info!(
                    "{}: control identity {} rejected, retrying as {}",
                    host.name, control.identity.user, bootstrap.identity.user
                );
                let os_release = self
                    .run_with_retry(&bootstrap, OS_RELEASE_COMMAND)
                    .await
                    .map_err(|e| classify(&bootstrap, e))?;
                self.gather(&bootstrap, os_release, IdentityRole::Bootstrap)
                    .await
            }
            Err(e) => Err(classify(&control, e)),
        }
    }

    async fn gather(
        &self,
        target: &ConnectionTarget,
        os_release: CommandOutput,
        identity: IdentityRole,
    ) -> Result<FactReport, FactsError> {
        let mut problems = Vec::new();
        let mut facts = Facts::default();

        if os_release.success() {
            apply_os_release(&mut facts, &parse_os_release(&os_release.stdout));
        } else {
            problems.push(format!("os-release unreadable: {}", os_release.error_text()));
        }

        let users = self
            .run_with_retry(target, USERS_COMMAND)
            .await
            .map_err(|e| classify(target, e))?;
        if users.success() {
            facts.users = parse_users(&users.stdout);
        } else {
            problems.push(format!("user list failed: {}", users.error_text()));
        }

        // No package manager is not an error: the package set stays empty
        if let Some(manager) = package_managers::for_kind(facts.package_manager) {
            let packages = self
                .run_with_retry(target, manager.list_command())
                .await
                .map_err(|e| classify(target, e))?;
            if packages.success() {
                facts.packages = manager.parse_list(&packages.stdout);
            } else {
                problems.push(format!("package list failed: {}", packages.error_text()));
            }
        }

        debug!(
            "{}: {} {:?}, {} users, {} packages via {}",
            target.host,
            facts.os_family,
            facts.os_version,
            facts.users.len(),
            facts.packages.len(),
            facts.package_manager
        );

        let degraded = (!problems.is_empty()).then(|| FactsError::FactGatheringFailed {
            host: target.host.clone(),
            reason: problems.join("; "),
        });

        Ok(FactReport {
            facts,
            identity,
            degraded,
        })
    }

    /// Transient connection failures are retried with backoff;
    /// authentication failures never are
    async fn run_with_retry(
        &self,
        target: &ConnectionTarget,
        command: &str,
    ) -> Result<CommandOutput, TransportError> {
        debug!("{}: {}", target, command);
        let mut attempt = 1;
        loop {
            match self.transport.run(target, command).await {
                Err(e) if e.is_transient() && attempt < self.retry.max_attempts => {
                    let delay = self.retry.delay_after(attempt);
                    warn!(
                        "{}: {} (attempt {}/{}), retrying in {:?}",
                        target.host, e, attempt, self.retry.max_attempts, delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                result => return result,
            }
        }
    }
}

fn classify(target: &ConnectionTarget, error: TransportError) -> FactsError {
    match error {
        TransportError::AuthenticationFailed { host, user } => {
            FactsError::AuthenticationFailed { host, user }
        }
        TransportError::Unreachable { host, reason } => FactsError::Unreachable { host, reason },
        other => FactsError::Unreachable {
            host: target.host.clone(),
            reason: other.to_string(),
        },
    }
}

pub fn parse_os_release(content: &str) -> HashMap<String, String> {
    content
        .lines()
        .filter_map(|line| line.split_once('='))
        .map(|(key, value)| {
            (
                key.trim().to_string(),
                value.trim().trim_matches('"').trim_matches('\'').to_string(),
            )
        })
        .collect()
}

fn apply_os_release(facts: &mut Facts, release: &HashMap<String, String>) {
    let id = release.get("ID").map(String::as_str).unwrap_or_default();
    facts.os_family = OsFamily::from_os_id(id)
        .or_else(|| {
            release
                .get("ID_LIKE")
                .and_then(|like| like.split_whitespace().find_map(OsFamily::from_os_id))
        })
        .unwrap_or(OsFamily::Unknown);
    facts.os_name = release.get("NAME").cloned();
    facts.os_version = release.get("VERSION_ID").cloned();
    facts.package_manager = detect_package_manager(facts.os_family, id, facts.os_version.as_deref());
}

/// dnf is the default from Fedora 22 and EL 8 onwards
fn detect_package_manager(
    family: OsFamily,
    id: &str,
    version: Option<&str>,
) -> PackageManagerKind {
    match family {
        OsFamily::Debian => PackageManagerKind::Apt,
        OsFamily::RedHat => {
            let major = version
                .and_then(|v| v.split('.').next())
                .and_then(|m| m.parse::<u32>().ok());
            match (id, major) {
                ("fedora", _) | ("amzn", Some(2023..)) => PackageManagerKind::Dnf,
                ("amzn", _) => PackageManagerKind::Yum,
                (_, Some(major)) if major < 8 => PackageManagerKind::Yum,
                _ => PackageManagerKind::Dnf,
            }
        }
        _ => PackageManagerKind::None,
    }
}

fn parse_users(passwd: &str) -> BTreeSet<String> {
    passwd
        .lines()
        .filter_map(|line| line.split(':').next())
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}
