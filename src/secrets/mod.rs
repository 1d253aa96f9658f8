//! Secret lookup by key, delegated to an external process

pub mod command;

pub use command::CommandSecretsProvider;

use async_trait::async_trait;
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SecretError {
    #[error("Secret not found: {key}")]
    NotFound { key: String },

    #[error("Secrets command failed for {key}: {reason}")]
    CommandFailed { key: String, reason: String },

    #[error("Secrets command is empty")]
    EmptyCommand,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A secret value. Never printed, never serialized.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("***")
    }
}

const MASK: &str = "***";

/// Masks the values of resolved secrets in text headed for logs and
/// reports. Both the raw value and its shell-quoted form are masked.
#[derive(Clone, Default)]
pub struct Redactor {
    patterns: Vec<String>,
}

impl fmt::Debug for Redactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Redactor")
            .field("patterns", &self.patterns.len())
            .finish()
    }
}

impl Redactor {
    pub fn new<'s>(secrets: impl IntoIterator<Item = &'s Secret>) -> Self {
        let mut patterns = Vec::new();
        for secret in secrets {
            let value = secret.expose();
            if value.is_empty() {
                continue;
            }
            let quoted = shell_words::quote(value);
            if quoted != value {
                patterns.push(quoted.into_owned());
            }
            patterns.push(value.to_string());
        }
        // Longest first so a secret containing another is masked whole
        patterns.sort_by_key(|p| std::cmp::Reverse(p.len()));
        patterns.dedup();
        Self { patterns }
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn redact<'t>(&self, text: &'t str) -> Cow<'t, str> {
        if !self.patterns.iter().any(|p| text.contains(p.as_str())) {
            return Cow::Borrowed(text);
        }
        let mut masked = text.to_string();
        for pattern in &self.patterns {
            masked = masked.replace(pattern.as_str(), MASK);
        }
        Cow::Owned(masked)
    }
}

#[async_trait]
pub trait SecretsProvider: Send + Sync {
    async fn fetch(&self, key: &str) -> Result<Secret, SecretError>;
}

/// In-memory provider; an empty one answers `NotFound` for every key
#[derive(Debug, Default, Clone)]
pub struct StaticSecretsProvider {
    values: HashMap<String, Secret>,
}

impl StaticSecretsProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_secret(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(key.into(), Secret::new(value));
        self
    }
}

#[async_trait]
impl SecretsProvider for StaticSecretsProvider {
    async fn fetch(&self, key: &str) -> Result<Secret, SecretError> {
        self.values
            .get(key)
            .cloned()
            .ok_or_else(|| SecretError::NotFound {
                key: key.to_string(),
            })
    }
}
