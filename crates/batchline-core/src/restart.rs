//! Restart coordination
//!
//! A restart is a brand-new run that re-reads its file from byte zero with
//! the original launch parameters, linked to the run it resumes. Only FAILED
//! and STOPPED runs are restartable; COMPLETED runs are a no-op and RUNNING
//! runs are refused. Requests carrying any parameter beyond the run
//! reference are refused outright, before the ledger is even consulted.

use batchline_common::BatchlineError;
use tracing::info;
use uuid::Uuid;

use crate::launcher::Launcher;
use crate::ledger::{LedgerEntry, RunParams, RunStatus};

/// A request to resume one terminal run.
#[derive(Debug, Clone, Default)]
pub struct RestartRequest {
    pub run_id: Uuid,
    /// Anything here beyond the run reference makes the request invalid
    pub extra_params: RunParams,
}

impl RestartRequest {
    pub fn new(run_id: Uuid) -> Self {
        Self {
            run_id,
            extra_params: RunParams::new(),
        }
    }
}

/// What a restart request resolved to.
#[derive(Debug)]
pub enum RestartOutcome {
    /// The run already completed; nothing was launched
    AlreadyCompleted(LedgerEntry),
    /// A new run was launched and drove to a terminal status
    Relaunched(LedgerEntry),
}

impl RestartOutcome {
    pub fn entry(&self) -> &LedgerEntry {
        match self {
            RestartOutcome::AlreadyCompleted(entry) => entry,
            RestartOutcome::Relaunched(entry) => entry,
        }
    }
}

/// Resolves restart requests against the ledger and relaunches through the
/// launcher.
pub struct RestartCoordinator<'a> {
    launcher: &'a Launcher,
}

impl<'a> RestartCoordinator<'a> {
    pub fn new(launcher: &'a Launcher) -> Self {
        Self { launcher }
    }

    pub async fn restart(&self, request: RestartRequest) -> Result<RestartOutcome, BatchlineError> {
        if !request.extra_params.is_empty() {
            let keys: Vec<&str> = request.extra_params.keys().map(String::as_str).collect();
            return Err(BatchlineError::InvalidParameters(format!(
                "restart accepts no parameters beyond the run reference, got: {}",
                keys.join(", ")
            )));
        }

        let previous = self.launcher.ledger().get_run(request.run_id).await?;
        match previous.status {
            RunStatus::Running => Err(BatchlineError::InvalidParameters(format!(
                "run {} is still running and cannot be restarted",
                previous.run_id
            ))),
            RunStatus::Completed => {
                info!(run_id = %previous.run_id, "run already completed, nothing to restart");
                Ok(RestartOutcome::AlreadyCompleted(previous))
            },
            RunStatus::Failed | RunStatus::Stopped => {
                info!(
                    run_id = %previous.run_id,
                    status = %previous.status,
                    job = %previous.job_name,
                    "relaunching run with original parameters"
                );
                let entry = self
                    .launcher
                    .launch_resuming(
                        &previous.job_name,
                        previous.params.clone(),
                        previous.run_id,
                    )
                    .await?;
                Ok(RestartOutcome::Relaunched(entry))
            },
        }
    }
}
