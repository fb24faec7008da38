//! Batchline CLI - Main entry point

use std::process;
use std::sync::Arc;

use batchline_cli::{commands, jobs, Cli, Commands, Config, RunsCommand};
use batchline_common::logging::{init_logging, LogConfig, LogLevel};
use batchline_core::chunk::LoggingObserver;
use batchline_core::{Launcher, PgLedger, RunStatus};
use clap::Parser;
use sqlx::postgres::PgPoolOptions;
use tracing::error;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // A .env file is a convenience, not a requirement.
    dotenvy::dotenv().ok();

    let mut log_config = LogConfig::from_env().unwrap_or_default();
    if cli.verbose {
        log_config.level = LogLevel::Debug;
    }
    // The CLI still works if logging cannot initialize.
    let _ = init_logging(&log_config);

    match execute_command(&cli).await {
        Ok(status) => {
            if status != RunStatus::Completed {
                process::exit(1);
            }
        },
        Err(e) => {
            error!(error = %e, "command failed");
            eprintln!("Error: {e}");
            process::exit(1);
        },
    }
}

/// Execute the CLI command, returning the terminal status that decides the
/// exit code. Inspection commands report COMPLETED on success.
async fn execute_command(cli: &Cli) -> batchline_cli::Result<RunStatus> {
    let config = Config::from_env()?;

    let ledger = Arc::new(
        PgLedger::connect(&config.ledger_database_url, config.ledger_pool_size).await?,
    );
    ledger.ensure_schema().await?;

    match &cli.command {
        Commands::Run { job, params } => {
            let business_pool = business_pool(&config).await?;
            jobs::ensure_business_schema(&business_pool).await?;
            let launcher = Launcher::new(jobs::build_registry(business_pool), ledger)
                .with_observer(Arc::new(LoggingObserver));
            commands::run::run(&launcher, job, params).await
        },

        Commands::Restart { run_id } => {
            let business_pool = business_pool(&config).await?;
            jobs::ensure_business_schema(&business_pool).await?;
            let launcher = Launcher::new(jobs::build_registry(business_pool), ledger)
                .with_observer(Arc::new(LoggingObserver));
            commands::restart::run(&launcher, *run_id).await
        },

        Commands::Stop { run_id } => {
            commands::stop::run(ledger.as_ref(), *run_id).await?;
            Ok(RunStatus::Completed)
        },

        Commands::Runs { command } => {
            match command {
                RunsCommand::List { job, status, limit } => {
                    commands::runs::list(ledger.as_ref(), job.clone(), status.clone(), *limit)
                        .await?
                },
                RunsCommand::Show { run_id } => {
                    commands::runs::show(ledger.as_ref(), *run_id).await?
                },
            }
            Ok(RunStatus::Completed)
        },
    }
}

/// The business pool is always separate from the ledger pool, even when
/// both point at the same database.
async fn business_pool(config: &Config) -> batchline_cli::Result<sqlx::PgPool> {
    Ok(PgPoolOptions::new()
        .max_connections(config.business_pool_size)
        .connect(&config.business_database_url)
        .await?)
}
