use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while loading a playbook into a task graph
#[derive(Debug, Error)]
pub enum TaskGraphError {
    #[error("File not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid YAML format: {reason}")]
    InvalidYaml { reason: String },

    #[error("Task '{task}' has no action")]
    MissingAction { task: String },

    #[error("Task '{task}' declares more than one action: {actions:?}")]
    MultipleActions { task: String, actions: Vec<String> },

    #[error("Task '{task}' uses unknown module: {module}")]
    UnknownModule { task: String, module: String },

    #[error("Task '{task}' has invalid arguments: {reason}")]
    InvalidArgs { task: String, reason: String },

    #[error("Duplicate task id: {id}")]
    DuplicateTaskId { id: String },
}
