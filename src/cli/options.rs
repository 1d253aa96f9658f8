use crate::config::OutputFormat;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Idempotent host bootstrap and configuration convergence
#[derive(Debug, Parser)]
#[command(name = "rustle-converge")]
#[command(about = "Converge a fleet of hosts to a declared state, safely and repeatably")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct RustleConvergeCli {
    #[command(subcommand)]
    pub command: Commands,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Converge hosts to the state described by a playbook
    Run(RunArgs),

    /// Print the resolved hosts of an inventory
    Inventory(InventoryArgs),
}

#[derive(Debug, Clone, Args)]
pub struct RunArgs {
    /// Inventory file with host and group definitions
    #[arg(short, long)]
    pub inventory: PathBuf,

    /// Playbook with the ordered task list
    #[arg(short, long)]
    pub playbook: PathBuf,

    /// Restrict the run to these hosts or groups (comma separated)
    #[arg(short, long, value_delimiter = ',')]
    pub limit: Vec<String>,

    /// Only run tasks carrying one of these tags (comma separated)
    #[arg(short, long, value_delimiter = ',')]
    pub tags: Vec<String>,

    /// Report what would change without changing anything
    #[arg(long)]
    pub check: bool,

    /// Maximum number of hosts converged at once
    #[arg(short = 'c', long, value_parser = clap::value_parser!(u32).range(1..))]
    pub concurrency: Option<u32>,

    /// Run configuration file
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Abort the run after this many seconds
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Report format
    #[arg(long, value_enum)]
    pub format: Option<OutputFormat>,
}

#[derive(Debug, Clone, Args)]
pub struct InventoryArgs {
    /// Inventory file with host and group definitions
    #[arg(short, long)]
    pub inventory: PathBuf,

    /// Restrict output to these hosts or groups (comma separated)
    #[arg(short, long, value_delimiter = ',')]
    pub limit: Vec<String>,

    /// Output format
    #[arg(long, value_enum, default_value = "text")]
    pub format: OutputFormat,
}

/// Log level for a `-v` count: warn, info, debug, trace
pub fn log_level(verbosity: u8) -> tracing::Level {
    match verbosity {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        2 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_arguments() {
        let cli = RustleConvergeCli::try_parse_from([
            "rustle-converge",
            "-vv",
            "run",
            "--inventory",
            "fleet.yml",
            "--playbook",
            "site.yml",
            "--limit",
            "dev,host-z",
            "--tags",
            "users",
            "--check",
            "--concurrency",
            "5",
            "--format",
            "json",
        ])
        .unwrap();

        assert_eq!(cli.verbose, 2);
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.limit, vec!["dev", "host-z"]);
        assert_eq!(args.tags, vec!["users"]);
        assert!(args.check);
        assert_eq!(args.concurrency, Some(5));
        assert_eq!(args.format, Some(OutputFormat::Json));
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let result = RustleConvergeCli::try_parse_from([
            "rustle-converge",
            "run",
            "-i",
            "fleet.yml",
            "-p",
            "site.yml",
            "--concurrency",
            "0",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_log_levels() {
        assert_eq!(log_level(0), tracing::Level::WARN);
        assert_eq!(log_level(1), tracing::Level::INFO);
        assert_eq!(log_level(7), tracing::Level::TRACE);
    }
}
