//! Durable execution ledger
//!
//! Every run gets exactly one ledger entry, created RUNNING before any
//! business write and finalized to exactly one terminal status. Ledger
//! writes always use their own connection pool so a rolled-back business
//! transaction can never take run bookkeeping down with it.

mod memory;
mod postgres;

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::chunk::StepCounters;

pub use memory::MemoryLedger;
pub use postgres::PgLedger;

/// Launch parameters for a run, keyed by name. Ordering is stable so that
/// parameter sets can be compared across restarts.
pub type RunParams = BTreeMap<String, String>;

/// Lifecycle status of a run. RUNNING is the only non-terminal status and
/// transitions are monotonic: once terminal, an entry never changes again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
    Stopped,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Stopped => "stopped",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunStatus::Running)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for RunStatus {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "running" => Ok(RunStatus::Running),
            "completed" => Ok(RunStatus::Completed),
            "failed" => Ok(RunStatus::Failed),
            "stopped" => Ok(RunStatus::Stopped),
            other => Err(LedgerError::Database(format!(
                "unknown run status: {other}"
            ))),
        }
    }
}

/// One run's bookkeeping record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub run_id: Uuid,
    pub job_name: String,
    pub params: RunParams,
    /// Run this one resumes, when launched by the restart coordinator
    pub resumes_from: Option<Uuid>,
    pub status: RunStatus,
    pub stop_requested: bool,
    pub read_count: u64,
    pub write_count: u64,
    pub skip_count: u64,
    pub filtered_count: u64,
    /// Record count the file's footer declared, once known
    pub declared_count: Option<u64>,
    pub business_date: Option<NaiveDate>,
    pub header_metadata: Option<Value>,
    pub footer_metadata: Option<Value>,
    pub failure_cause: Option<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

/// Query filter for [`ExecutionLedger::list_runs`].
#[derive(Debug, Clone, Default)]
pub struct RunFilter {
    pub job_name: Option<String>,
    pub status: Option<RunStatus>,
    pub limit: Option<u32>,
}

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("run {0} not found")]
    NotFound(Uuid),

    #[error("run {run_id} cannot move from {from} to {to}")]
    InvalidTransition {
        run_id: Uuid,
        from: RunStatus,
        to: RunStatus,
    },

    #[error("ledger database error: {0}")]
    Database(String),
}

impl From<sqlx::Error> for LedgerError {
    fn from(err: sqlx::Error) -> Self {
        LedgerError::Database(err.to_string())
    }
}

impl From<LedgerError> for batchline_common::BatchlineError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::NotFound(run_id) => {
                batchline_common::BatchlineError::RunNotFound(run_id.to_string())
            },
            other => batchline_common::BatchlineError::Database(other.to_string()),
        }
    }
}

/// Durable store for run entries.
///
/// Implementations commit each mutation independently of any business-data
/// transaction in flight.
#[async_trait]
pub trait ExecutionLedger: Send + Sync {
    /// Insert a new RUNNING entry and return it.
    async fn create_run(
        &self,
        job_name: &str,
        params: &RunParams,
        resumes_from: Option<Uuid>,
    ) -> Result<LedgerEntry, LedgerError>;

    /// Persist counter progress after a chunk commit.
    async fn update_progress(
        &self,
        run_id: Uuid,
        counters: &StepCounters,
    ) -> Result<(), LedgerError>;

    /// Record header metadata once the header line is parsed.
    async fn attach_header(
        &self,
        run_id: Uuid,
        business_date: Option<NaiveDate>,
        metadata: Option<Value>,
    ) -> Result<(), LedgerError>;

    /// Record the declared count once the footer line is parsed.
    async fn attach_footer(
        &self,
        run_id: Uuid,
        declared_count: u64,
        metadata: Option<Value>,
    ) -> Result<(), LedgerError>;

    /// Ask a RUNNING run to stop at its next chunk boundary.
    async fn request_stop(&self, run_id: Uuid) -> Result<(), LedgerError>;

    async fn is_stop_requested(&self, run_id: Uuid) -> Result<bool, LedgerError>;

    /// Move a RUNNING entry to a terminal status. Finalizing an already
    /// terminal entry is an [`LedgerError::InvalidTransition`].
    async fn finalize(
        &self,
        run_id: Uuid,
        status: RunStatus,
        failure_cause: Option<&str>,
    ) -> Result<LedgerEntry, LedgerError>;

    async fn get_run(&self, run_id: Uuid) -> Result<LedgerEntry, LedgerError>;

    async fn list_runs(&self, filter: &RunFilter) -> Result<Vec<LedgerEntry>, LedgerError>;
}
