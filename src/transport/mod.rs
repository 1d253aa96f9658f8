//! Remote command and file transfer against a host

pub mod error;
pub mod ssh;

pub use error::*;
pub use ssh::*;

use crate::types::inventory::ConnectionTarget;
use async_trait::async_trait;

/// Result of a remote command that reached the host
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// stderr when present, stdout otherwise
    pub fn error_text(&self) -> String {
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            self.stdout.trim().to_string()
        } else {
            stderr.to_string()
        }
    }
}

/// "Run remote command" and "copy file to remote path" against a host.
/// Connection-level problems are errors; a command that ran and exited
/// non-zero is a successful call with a non-zero `exit_code`.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn run(
        &self,
        target: &ConnectionTarget,
        command: &str,
    ) -> Result<CommandOutput, TransportError>;

    async fn copy(
        &self,
        target: &ConnectionTarget,
        content: &[u8],
        remote_path: &str,
    ) -> Result<(), TransportError>;
}
