use anyhow::{anyhow, Result};
use clap::Parser;
use rustle_converge::cli::{
    execute_inventory, execute_run, log_level, watch_interrupts, Commands, RustleConvergeCli,
    EXIT_RUN_FAILED,
};
use tokio_util::sync::CancellationToken;
use tracing::error;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = RustleConvergeCli::parse();

    // Logs go to stderr so stdout carries only the report
    tracing_subscriber::fmt()
        .with_max_level(log_level(cli.verbose))
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init()
        .map_err(|e| anyhow!("Failed to initialize logging: {e}"))?;

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if watch_interrupts(tokio::signal::ctrl_c, interrupt).await {
            error!("Interrupted again, exiting without waiting for hosts");
            std::process::exit(EXIT_RUN_FAILED);
        }
    });

    let outcome = match &cli.command {
        Commands::Run(args) => execute_run(args, cancel).await,
        Commands::Inventory(args) => execute_inventory(args),
    };

    let code = match outcome {
        Ok(code) => code,
        Err(e) => {
            error!("{}", e);
            eprintln!("error: {e}");
            e.exit_code()
        }
    };
    std::process::exit(code);
}
