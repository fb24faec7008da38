//! `batchline stop` - request a graceful stop
//!
//! The flag is only honored at chunk boundaries, so the run keeps whatever
//! it has already committed and finalizes as STOPPED.

use batchline_core::ExecutionLedger;
use uuid::Uuid;

use crate::error::Result;

pub async fn run(ledger: &dyn ExecutionLedger, run_id: Uuid) -> Result<()> {
    ledger.request_stop(run_id).await?;
    println!("stop requested for run {run_id}");
    Ok(())
}
