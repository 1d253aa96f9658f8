use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Host {host} is unreachable: {reason}")]
    Unreachable { host: String, reason: String },

    #[error("Authentication failed for {user} on {host}")]
    AuthenticationFailed { host: String, user: String },

    #[error("Timeout exceeded on {host}: {timeout_secs}s")]
    Timeout { host: String, timeout_secs: u64 },

    #[error("Transport program not found: {program}")]
    ProgramNotFound { program: String },

    #[error("Copy to {host}:{path} failed: {reason}")]
    CopyFailed {
        host: String,
        path: String,
        reason: String,
    },

    #[error("Invalid failure pattern: {reason}")]
    InvalidPattern { reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    /// Failures where the host could not be reached at all; retrying may help
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unreachable { .. } | Self::Timeout { .. })
    }

    pub fn is_authentication(&self) -> bool {
        matches!(self, Self::AuthenticationFailed { .. })
    }
}
