//! `batchline restart` - resume a failed or stopped run

use batchline_core::{Launcher, RestartCoordinator, RestartOutcome, RestartRequest, RunStatus};
use uuid::Uuid;

use crate::error::Result;

pub async fn run(launcher: &Launcher, run_id: Uuid) -> Result<RunStatus> {
    let coordinator = RestartCoordinator::new(launcher);
    let outcome = coordinator.restart(RestartRequest::new(run_id)).await?;

    match &outcome {
        RestartOutcome::AlreadyCompleted(entry) => {
            println!("run {} already completed, nothing to do", entry.run_id);
        },
        RestartOutcome::Relaunched(entry) => {
            println!("resumed:  {run_id}");
            println!("new run:  {}", entry.run_id);
            println!("status:   {}", entry.status);
            println!(
                "counts:   read={} write={} skip={} filtered={}",
                entry.read_count, entry.write_count, entry.skip_count, entry.filtered_count
            );
            if let Some(cause) = &entry.failure_cause {
                println!("cause:    {cause}");
            }
        },
    }
    Ok(outcome.entry().status)
}
