use crate::config::SshConfig;
use crate::transport::{CommandOutput, Transport, TransportError};
use crate::types::inventory::ConnectionTarget;
use async_trait::async_trait;
use regex::Regex;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, trace};

/// ssh exits with this status when the connection itself failed, but a
/// remote command may exit with it too
const SSH_CONNECTION_FAILURE: i32 = 255;

/// Transport over the system `ssh` and `scp` clients
pub struct SshTransport {
    config: SshConfig,
    classifier: SshFailureClassifier,
    connect_timeout: Duration,
    command_timeout: Duration,
}

impl SshTransport {
    pub fn new(
        config: SshConfig,
        connect_timeout: Duration,
        command_timeout: Duration,
    ) -> Result<Self, TransportError> {
        for program in [&config.program, &config.scp_program] {
            which::which(program).map_err(|_| TransportError::ProgramNotFound {
                program: program.clone(),
            })?;
        }

        let classifier =
            SshFailureClassifier::new().map_err(|e| TransportError::InvalidPattern {
                reason: e.to_string(),
            })?;

        Ok(Self {
            config,
            classifier,
            connect_timeout,
            command_timeout,
        })
    }

    fn common_options(&self, target: &ConnectionTarget) -> Vec<String> {
        let mut options = vec![
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.connect_timeout.as_secs().max(1)),
            "-o".to_string(),
            format!(
                "StrictHostKeyChecking={}",
                if self.config.strict_host_key_checking {
                    "yes"
                } else {
                    "accept-new"
                }
            ),
        ];

        if let Some(credential) = &target.identity.credential {
            options.push("-i".to_string());
            options.push(credential.expanded().to_string_lossy().into_owned());
        }

        options.extend(self.config.extra_args.iter().cloned());
        options
    }

    fn destination(target: &ConnectionTarget) -> String {
        format!("{}@{}", target.identity.user, target.address)
    }

    async fn output(
        &self,
        target: &ConnectionTarget,
        mut cmd: Command,
    ) -> Result<std::process::Output, TransportError> {
        cmd.kill_on_drop(true);
        match tokio::time::timeout(self.command_timeout, cmd.output()).await {
            Ok(output) => Ok(output?),
            Err(_) => Err(TransportError::Timeout {
                host: target.host.clone(),
                timeout_secs: self.command_timeout.as_secs(),
            }),
        }
    }
}

#[async_trait]
impl Transport for SshTransport {
    async fn run(
        &self,
        target: &ConnectionTarget,
        command: &str,
    ) -> Result<CommandOutput, TransportError> {
        // Command text may carry secrets; callers log it redacted
        trace!("Executing command on {}", target);

        let mut cmd = Command::new(&self.config.program);
        cmd.args(self.common_options(target))
            .arg("-p")
            .arg(target.port.to_string())
            .arg(Self::destination(target))
            .arg("--")
            .arg(command);

        let output = self.output(target, cmd).await?;
        let result = CommandOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        };
        trace!("{} exited {}", target, result.exit_code);
        self.classifier.interpret(target, result)
    }

    async fn copy(
        &self,
        target: &ConnectionTarget,
        content: &[u8],
        remote_path: &str,
    ) -> Result<(), TransportError> {
        debug!("Copying {} bytes to {}:{}", content.len(), target, remote_path);

        let temp_file = tempfile::NamedTempFile::new()?;
        tokio::fs::write(temp_file.path(), content).await?;

        let mut cmd = Command::new(&self.config.scp_program);
        cmd.args(self.common_options(target))
            .arg("-P")
            .arg(target.port.to_string())
            .arg(temp_file.path())
            .arg(format!("{}:{}", Self::destination(target), remote_path));

        let output = self.output(target, cmd).await?;
        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        match self.classifier.classify(target, &stderr) {
            TransportError::Unreachable { reason, .. }
                if !self.classifier.is_connection_error(&stderr) =>
            {
                Err(TransportError::CopyFailed {
                    host: target.host.clone(),
                    path: remote_path.to_string(),
                    reason,
                })
            }
            other => Err(other),
        }
    }
}

/// Maps ssh/scp diagnostics onto connection error classes
pub struct SshFailureClassifier {
    authentication: Regex,
    connection: Regex,
    /// Lines ssh itself writes, as opposed to the remote command
    diagnostic: Regex,
}

impl SshFailureClassifier {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            authentication: Regex::new(
                r"(?i)permission denied|too many authentication failures|host key verification failed|no supported authentication methods",
            )?,
            connection: Regex::new(
                r"(?i)connection refused|connection timed out|operation timed out|could not resolve hostname|no route to host|network is unreachable|connection closed|connection reset",
            )?,
            diagnostic: Regex::new(
                r"(?im)^\s*(ssh: |\S+@\S+: permission denied|permission denied \(|connection (closed|reset|timed out) |host key verification failed|kex_exchange_identification|too many authentication failures|received disconnect from |banner exchange)",
            )?,
        })
    }

    /// Whether stderr carries a diagnostic from the ssh client itself
    pub fn is_ssh_diagnostic(&self, stderr: &str) -> bool {
        self.diagnostic.is_match(stderr)
    }

    /// Exit 255 is a connection failure only when ssh says so; otherwise
    /// it is the remote command's own status
    pub fn interpret(
        &self,
        target: &ConnectionTarget,
        output: CommandOutput,
    ) -> Result<CommandOutput, TransportError> {
        if output.exit_code == SSH_CONNECTION_FAILURE && self.is_ssh_diagnostic(&output.stderr) {
            return Err(self.classify(target, &output.stderr));
        }
        Ok(output)
    }

    pub fn is_connection_error(&self, stderr: &str) -> bool {
        self.connection.is_match(stderr)
    }

    pub fn classify(&self, target: &ConnectionTarget, stderr: &str) -> TransportError {
        if self.authentication.is_match(stderr) {
            return TransportError::AuthenticationFailed {
                host: target.host.clone(),
                user: target.identity.user.clone(),
            };
        }

        let reason = stderr
            .lines()
            .rev()
            .find(|line| !line.trim().is_empty())
            .unwrap_or("ssh connection failed")
            .trim()
            .to_string();

        TransportError::Unreachable {
            host: target.host.clone(),
            reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::inventory::Identity;

    fn target() -> ConnectionTarget {
        ConnectionTarget {
            host: "host-a".to_string(),
            address: "10.0.0.5".to_string(),
            port: 22,
            identity: Identity::new("deploy"),
        }
    }

    #[test]
    fn test_permission_denied_is_authentication_failure() {
        let classifier = SshFailureClassifier::new().unwrap();
        let err = classifier.classify(
            &target(),
            "deploy@10.0.0.5: Permission denied (publickey,password).\n",
        );
        assert!(err.is_authentication());
    }

    #[test]
    fn test_refused_is_unreachable() {
        let classifier = SshFailureClassifier::new().unwrap();
        let stderr = "ssh: connect to host 10.0.0.5 port 22: Connection refused\n";
        assert!(classifier.is_connection_error(stderr));
        let err = classifier.classify(&target(), stderr);
        assert!(err.is_transient());
        match err {
            TransportError::Unreachable { reason, .. } => {
                assert!(reason.contains("Connection refused"))
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_exit_255_needs_ssh_diagnostic() {
        let classifier = SshFailureClassifier::new().unwrap();
        let output = |stderr: &str| CommandOutput {
            exit_code: SSH_CONNECTION_FAILURE,
            stdout: String::new(),
            stderr: stderr.to_string(),
        };

        let refused = output("ssh: connect to host 10.0.0.5 port 22: Connection refused\n");
        assert!(matches!(
            classifier.interpret(&target(), refused),
            Err(TransportError::Unreachable { .. })
        ));

        let denied = output("deploy@10.0.0.5: Permission denied (publickey).\n");
        assert!(matches!(
            classifier.interpret(&target(), denied),
            Err(TransportError::AuthenticationFailed { .. })
        ));

        // The remote program failed on its own terms
        let remote = output("ERROR 2003 (HY000): Can't connect to MySQL server (111 Connection refused)\n");
        let result = classifier.interpret(&target(), remote).unwrap();
        assert_eq!(result.exit_code, 255);
        assert!(classifier.interpret(&target(), output("")).is_ok());
    }

    #[test]
    fn test_destination_format() {
        assert_eq!(SshTransport::destination(&target()), "deploy@10.0.0.5");
        assert_eq!(target().to_string(), "deploy@10.0.0.5:22");
    }
}
