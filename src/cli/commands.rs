use crate::cli::options::{InventoryArgs, RunArgs};
use crate::config::{ConfigError, OutputFormat, RunConfig};
use crate::execution::{TaskGraph, TaskGraphError, TaskGraphParser};
use crate::inventory::{InventoryError, InventoryProcessor};
use crate::modules::ModuleRegistry;
use crate::runtime::{ConvergenceExecutor, RunReporter, RunSummary};
use crate::secrets::{CommandSecretsProvider, SecretError, SecretsProvider, StaticSecretsProvider};
use crate::transport::{SshTransport, Transport, TransportError};
use crate::types::Host;
use std::future::Future;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_RUN_FAILED: i32 = 1;
pub const EXIT_LOAD_ERROR: i32 = 2;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Inventory(#[from] InventoryError),

    #[error(transparent)]
    TaskGraph(#[from] TaskGraphError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Secret(#[from] SecretError),

    #[error("Failed to render output: {0}")]
    Render(String),

    #[error("Failed to write report: {0}")]
    Output(#[from] std::io::Error),
}

impl CliError {
    /// Everything that stops a run before a host is contacted is a load error
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Output(_) | Self::Render(_) => EXIT_RUN_FAILED,
            _ => EXIT_LOAD_ERROR,
        }
    }
}

pub fn exit_code(summary: &RunSummary) -> i32 {
    if summary.success {
        EXIT_SUCCESS
    } else {
        EXIT_RUN_FAILED
    }
}

/// Everything loaded and validated before any host is touched
pub struct RunPlan {
    pub config: RunConfig,
    pub hosts: Vec<Arc<Host>>,
    pub graph: TaskGraph,
}

impl RunArgs {
    /// File config with command line flags layered on top
    pub fn run_config(&self) -> Result<RunConfig, CliError> {
        let mut config = match &self.config {
            Some(path) => RunConfig::load(path)?,
            None => RunConfig::default(),
        };
        if let Some(concurrency) = self.concurrency {
            config.forks = concurrency as usize;
        }
        if self.check {
            config.check_mode = true;
        }
        if let Some(timeout) = self.timeout {
            config.run_timeout = Some(Duration::from_secs(timeout));
        }
        if let Some(format) = self.format {
            config.output = format;
        }
        Ok(config)
    }

    pub fn load_plan(&self, registry: &ModuleRegistry) -> Result<RunPlan, CliError> {
        let config = self.run_config()?;
        let inventory = InventoryProcessor::new().load(&self.inventory)?;
        let hosts = inventory.limit(&self.limit)?;
        let graph = TaskGraphParser::new(registry)
            .parse_file(&self.playbook)?
            .filter_tags(&self.tags);

        info!(
            "Loaded {} hosts and {} tasks",
            hosts.len(),
            graph.len()
        );
        Ok(RunPlan {
            config,
            hosts,
            graph,
        })
    }
}

pub fn secrets_provider(config: &RunConfig) -> Result<Arc<dyn SecretsProvider>, CliError> {
    Ok(match &config.secrets.command {
        Some(argv) => Arc::new(CommandSecretsProvider::new(argv.clone())?),
        None => Arc::new(StaticSecretsProvider::new()),
    })
}

/// `run`: load, converge, report. Returns the process exit code.
pub async fn execute_run(args: &RunArgs, cancel: CancellationToken) -> Result<i32, CliError> {
    let registry = ModuleRegistry::with_core_modules();
    let plan = args.load_plan(&registry)?;

    let transport: Arc<dyn Transport> = Arc::new(SshTransport::new(
        plan.config.ssh.clone(),
        plan.config.connect_timeout,
        plan.config.command_timeout,
    )?);
    let secrets = secrets_provider(&plan.config)?;
    let reporter = RunReporter::new(plan.config.output);

    let executor = ConvergenceExecutor::new(plan.config, registry, transport, secrets);
    let summary = executor
        .run(&plan.hosts, Arc::new(plan.graph), cancel)
        .await;

    let mut stdout = std::io::stdout().lock();
    reporter.write_summary(&summary, &mut stdout)?;
    stdout.flush()?;
    Ok(exit_code(&summary))
}

/// `inventory`: print resolved hosts with their merged variables
pub fn execute_inventory(args: &InventoryArgs) -> Result<i32, CliError> {
    let inventory = InventoryProcessor::new().load(&args.inventory)?;
    let selected = inventory.limit(&args.limit)?;
    let hosts: Vec<&Host> = selected.iter().map(|h| h.as_ref()).collect();

    let rendered = match args.format {
        OutputFormat::Text => {
            serde_yaml::to_string(&hosts).map_err(|e| CliError::Render(e.to_string()))?
        }
        OutputFormat::Json => {
            serde_json::to_string_pretty(&hosts).map_err(|e| CliError::Render(e.to_string()))?
        }
    };

    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "{}", rendered.trim_end())?;
    Ok(EXIT_SUCCESS)
}

/// Cancels the run on the first interrupt so in-flight tasks can finish.
/// Resolves to true when a second interrupt asks for an immediate exit,
/// false when interrupts can no longer be received.
pub async fn watch_interrupts<F, Fut>(mut interrupted: F, cancel: CancellationToken) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::io::Result<()>>,
{
    if interrupted().await.is_err() {
        return false;
    }
    warn!("Interrupted, letting in-flight tasks finish; interrupt again to exit now");
    cancel.cancel();
    interrupted().await.is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::LoadError;
    use std::path::PathBuf;

    fn args(config: Option<PathBuf>) -> RunArgs {
        RunArgs {
            inventory: PathBuf::from("fleet.yml"),
            playbook: PathBuf::from("site.yml"),
            limit: vec![],
            tags: vec![],
            check: true,
            concurrency: Some(3),
            config,
            timeout: Some(60),
            format: Some(OutputFormat::Json),
        }
    }

    #[test]
    fn test_flags_override_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yml");
        std::fs::write(&path, "forks: 50\noutput: text\nconnect_timeout: 5\n").unwrap();

        let config = args(Some(path)).run_config().unwrap();
        assert_eq!(config.forks, 3);
        assert!(config.check_mode);
        assert_eq!(config.run_timeout, Some(Duration::from_secs(60)));
        assert_eq!(config.output, OutputFormat::Json);
        assert_eq!(config.connect_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_load_errors_exit_2() {
        let error = CliError::from(InventoryError::from(LoadError::CyclicGroup {
            cycle: vec!["a".to_string(), "b".to_string()],
        }));
        assert_eq!(error.exit_code(), EXIT_LOAD_ERROR);

        let missing = args(Some(PathBuf::from("/nonexistent/config.yml"))).run_config();
        assert_eq!(missing.unwrap_err().exit_code(), EXIT_LOAD_ERROR);
    }

    #[tokio::test]
    async fn test_second_interrupt_requests_exit() {
        let cancel = CancellationToken::new();
        let force = watch_interrupts(|| async { Ok(()) }, cancel.clone()).await;
        assert!(force);
        assert!(cancel.is_cancelled());
    }

    #[tokio::test]
    async fn test_interrupt_stream_closing_only_cancels() {
        let cancel = CancellationToken::new();
        let mut signals = 0;
        let force = watch_interrupts(
            || {
                signals += 1;
                let first = signals == 1;
                async move {
                    if first {
                        Ok(())
                    } else {
                        Err(std::io::Error::other("signal stream closed"))
                    }
                }
            },
            cancel.clone(),
        )
        .await;
        assert!(!force);
        assert!(cancel.is_cancelled());

        let untouched = CancellationToken::new();
        let force = watch_interrupts(
            || async { Err(std::io::Error::other("no signal handler")) },
            untouched.clone(),
        )
        .await;
        assert!(!force);
        assert!(!untouched.is_cancelled());
    }
}
