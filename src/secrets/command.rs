use crate::secrets::{Secret, SecretError, SecretsProvider};
use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

const KEY_PLACEHOLDER: &str = "{key}";

/// Runs an external command per lookup, e.g. `["vault-get", "{key}"]`.
/// Trimmed stdout is the secret value.
#[derive(Debug, Clone)]
pub struct CommandSecretsProvider {
    argv: Vec<String>,
}

impl CommandSecretsProvider {
    pub fn new(argv: Vec<String>) -> Result<Self, SecretError> {
        if argv.first().map_or(true, |program| program.trim().is_empty()) {
            return Err(SecretError::EmptyCommand);
        }
        Ok(Self { argv })
    }

    fn argv_for(&self, key: &str) -> Vec<String> {
        let mut argv: Vec<String> = self
            .argv
            .iter()
            .map(|arg| arg.replace(KEY_PLACEHOLDER, key))
            .collect();
        if !self.argv.iter().any(|arg| arg.contains(KEY_PLACEHOLDER)) {
            argv.push(key.to_string());
        }
        argv
    }
}

#[async_trait]
impl SecretsProvider for CommandSecretsProvider {
    async fn fetch(&self, key: &str) -> Result<Secret, SecretError> {
        let argv = self.argv_for(key);
        debug!("Fetching secret {} via {}", key, argv[0]);

        let output = Command::new(&argv[0])
            .args(&argv[1..])
            .kill_on_drop(true)
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if stderr.trim().is_empty() {
                return Err(SecretError::NotFound {
                    key: key.to_string(),
                });
            }
            return Err(SecretError::CommandFailed {
                key: key.to_string(),
                reason: stderr.trim().to_string(),
            });
        }

        let value = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if value.is_empty() {
            return Err(SecretError::NotFound {
                key: key.to_string(),
            });
        }
        Ok(Secret::new(value))
    }
}
