use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum InventoryError {
    #[error("File not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid YAML in {path}: {reason}")]
    InvalidYaml { path: PathBuf, reason: String },

    #[error("Limit pattern '{pattern}' matches no host or group")]
    UnmatchedLimit { pattern: String },

    #[error(transparent)]
    Load(#[from] LoadError),
}

/// Structural inventory errors; fatal before any host is contacted
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LoadError {
    #[error("Cyclic group nesting: {}", cycle.join(" -> "))]
    CyclicGroup { cycle: Vec<String> },

    #[error("Unknown group '{group}' referenced by {referrer}")]
    UnknownGroupReference { referrer: String, group: String },

    #[error("Invalid group '{group}': {reason}")]
    InvalidGroup { group: String, reason: String },

    #[error("Invalid host '{host}': {reason}")]
    InvalidHost { host: String, reason: String },
}
