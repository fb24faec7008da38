//! Batchline CLI Library
//!
//! Command-line interface for the batch import engine:
//!
//! - **Run**: launch a registered job with parameters (`batchline run`)
//! - **Restart**: resume a failed or stopped run (`batchline restart`)
//! - **Inspection**: list and show ledger entries (`batchline runs`)

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod commands;
pub mod config;
pub mod error;
pub mod jobs;

pub use config::Config;
pub use error::{CliError, Result};

use clap::{Parser, Subcommand};
use uuid::Uuid;

/// Batchline - file-to-database batch import engine
#[derive(Parser, Debug)]
#[command(name = "batchline")]
#[command(author, version, about, long_about = None)]
#[command(arg_required_else_help = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Launch a registered job
    Run {
        /// Job name to launch
        #[arg(long)]
        job: String,

        /// Launch parameters as key=value pairs
        #[arg(long = "param", value_name = "KEY=VALUE")]
        params: Vec<String>,
    },

    /// Relaunch a failed or stopped run with its original parameters
    Restart {
        /// Run to resume
        #[arg(long)]
        run_id: Uuid,
    },

    /// Ask a running run to stop at its next chunk boundary
    Stop {
        /// Run to stop
        #[arg(long)]
        run_id: Uuid,
    },

    /// Inspect the execution ledger
    Runs {
        #[command(subcommand)]
        command: RunsCommand,
    },
}

/// Ledger inspection commands
#[derive(Subcommand, Debug)]
pub enum RunsCommand {
    /// List recent runs
    List {
        /// Only runs of this job
        #[arg(long)]
        job: Option<String>,

        /// Only runs with this status (running, completed, failed, stopped)
        #[arg(long)]
        status: Option<String>,

        /// Maximum entries to show
        #[arg(long, default_value = "20")]
        limit: u32,
    },

    /// Show one run in full
    Show {
        /// Run to display
        run_id: Uuid,
    },
}
