//! `batchline runs` - inspect the execution ledger

use batchline_core::{ExecutionLedger, RunFilter, RunStatus};
use uuid::Uuid;

use crate::error::{CliError, Result};

pub async fn list(
    ledger: &dyn ExecutionLedger,
    job: Option<String>,
    status: Option<String>,
    limit: u32,
) -> Result<()> {
    let status = status
        .map(|s| {
            s.parse::<RunStatus>()
                .map_err(|_| CliError::InvalidParameter(format!("unknown status {s:?}")))
        })
        .transpose()?;

    let entries = ledger
        .list_runs(&RunFilter {
            job_name: job,
            status,
            limit: Some(limit),
        })
        .await?;

    if entries.is_empty() {
        println!("no runs found");
        return Ok(());
    }

    println!(
        "{:<36}  {:<20}  {:<9}  {:>8}  {:>8}  {:>6}  started",
        "run", "job", "status", "read", "write", "skip"
    );
    for entry in entries {
        println!(
            "{:<36}  {:<20}  {:<9}  {:>8}  {:>8}  {:>6}  {}",
            entry.run_id,
            entry.job_name,
            entry.status.as_str(),
            entry.read_count,
            entry.write_count,
            entry.skip_count,
            entry.started_at.format("%Y-%m-%d %H:%M:%S"),
        );
    }
    Ok(())
}

pub async fn show(ledger: &dyn ExecutionLedger, run_id: Uuid) -> Result<()> {
    let entry = ledger.get_run(run_id).await?;

    println!("run:          {}", entry.run_id);
    println!("job:          {}", entry.job_name);
    println!("status:       {}", entry.status);
    if let Some(resumes_from) = entry.resumes_from {
        println!("resumes from: {resumes_from}");
    }
    for (key, value) in &entry.params {
        println!("param:        {key}={value}");
    }
    println!("read:         {}", entry.read_count);
    println!("write:        {}", entry.write_count);
    println!("skip:         {}", entry.skip_count);
    println!("filtered:     {}", entry.filtered_count);
    if let Some(declared) = entry.declared_count {
        println!("declared:     {declared}");
    }
    if let Some(date) = entry.business_date {
        println!("business day: {date}");
    }
    if entry.stop_requested {
        println!("stop:         requested");
    }
    if let Some(cause) = &entry.failure_cause {
        println!("cause:        {cause}");
    }
    println!("started:      {}", entry.started_at.to_rfc3339());
    if let Some(ended) = entry.ended_at {
        println!("ended:        {}", ended.to_rfc3339());
    }
    Ok(())
}
