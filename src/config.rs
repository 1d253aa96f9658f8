//! Run configuration: file-backed defaults that CLI flags override

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Fan-out used when neither the config file nor the CLI sets one
pub const DEFAULT_FORKS: usize = 20;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config {path}: {reason}")]
    Invalid { path: PathBuf, reason: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunConfig {
    /// Maximum number of hosts converged concurrently
    pub forks: usize,
    #[serde(with = "serde_duration")]
    pub connect_timeout: Duration,
    #[serde(with = "serde_duration")]
    pub command_timeout: Duration,
    #[serde(with = "serde_duration_opt")]
    pub run_timeout: Option<Duration>,
    pub fact_retry: RetryPolicy,
    pub ssh: SshConfig,
    pub secrets: SecretsConfig,
    pub output: OutputFormat,
    pub check_mode: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            forks: DEFAULT_FORKS,
            connect_timeout: Duration::from_secs(30),
            command_timeout: Duration::from_secs(300),
            run_timeout: None,
            fact_retry: RetryPolicy::default(),
            ssh: SshConfig::default(),
            secrets: SecretsConfig::default(),
            output: OutputFormat::Text,
            check_mode: false,
        }
    }
}

impl RunConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => ConfigError::FileNotFound {
                path: path.to_path_buf(),
            },
            _ => ConfigError::Io {
                path: path.to_path_buf(),
                source: e,
            },
        })?;
        Self::from_yaml(&content).map_err(|reason| ConfigError::Invalid {
            path: path.to_path_buf(),
            reason,
        })
    }

    pub fn from_yaml(content: &str) -> Result<Self, String> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Self = serde_yaml::from_str(content).map_err(|e| e.to_string())?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), String> {
        if self.forks == 0 {
            return Err("forks must be at least 1".to_string());
        }
        if self.fact_retry.max_attempts == 0 {
            return Err("fact_retry.max_attempts must be at least 1".to_string());
        }
        Ok(())
    }
}

/// Bounded retry for transient connection failures during fact gathering
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    #[serde(with = "serde_duration")]
    pub delay: Duration,
    pub backoff: BackoffStrategy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_secs(1),
            backoff: BackoffStrategy::Exponential,
        }
    }
}

impl RetryPolicy {
    /// Delay before the retry that follows `attempt` (1-based)
    pub fn delay_after(&self, attempt: u32) -> Duration {
        match self.backoff {
            BackoffStrategy::Fixed => self.delay,
            BackoffStrategy::Linear => self.delay * attempt,
            BackoffStrategy::Exponential => self.delay * 2_u32.saturating_pow(attempt - 1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackoffStrategy {
    Fixed,
    Linear,
    Exponential,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SshConfig {
    pub program: String,
    pub scp_program: String,
    pub extra_args: Vec<String>,
    pub strict_host_key_checking: bool,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            program: "ssh".to_string(),
            scp_program: "scp".to_string(),
            extra_args: Vec::new(),
            strict_host_key_checking: false,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SecretsConfig {
    /// argv of the external secrets command; `{key}` is replaced by the
    /// requested secret name
    pub command: Option<Vec<String>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

// Durations are written as whole seconds
mod serde_duration {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

mod serde_duration_opt {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => Some(d.as_secs()).serialize(serializer),
            None => None::<u64>.serialize(serializer),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs_opt = Option::<u64>::deserialize(deserializer)?;
        Ok(secs_opt.map(Duration::from_secs))
    }
}
