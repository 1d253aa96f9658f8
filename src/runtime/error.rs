use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("Condition evaluation failed: {condition}")]
    ConditionFailed { condition: String },

    #[error("Module not found: {module}")]
    ModuleNotFound { module: String },

    #[error("Worker for {host} panicked: {reason}")]
    HostTaskPanicked { host: String, reason: String },
}

/// Fact gathering failures. `Unreachable` and `AuthenticationFailed` stop
/// a host; `FactGatheringFailed` is reported alongside partial facts.
#[derive(Debug, Error)]
pub enum FactsError {
    #[error("Host {host} is unreachable: {reason}")]
    Unreachable { host: String, reason: String },

    #[error("Authentication failed for {user} on {host}")]
    AuthenticationFailed { host: String, user: String },

    #[error("Fact gathering on {host} incomplete: {reason}")]
    FactGatheringFailed { host: String, reason: String },
}
