//! In-memory ledger for tests and dry runs

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use serde_json::Value;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::chunk::StepCounters;

use super::{ExecutionLedger, LedgerEntry, LedgerError, RunFilter, RunParams, RunStatus};

/// Ledger backed by a process-local map. Honors the same monotonic
/// transition rules as the durable backend.
#[derive(Debug, Default)]
pub struct MemoryLedger {
    runs: Mutex<HashMap<Uuid, LedgerEntry>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ExecutionLedger for MemoryLedger {
    async fn create_run(
        &self,
        job_name: &str,
        params: &RunParams,
        resumes_from: Option<Uuid>,
    ) -> Result<LedgerEntry, LedgerError> {
        let entry = LedgerEntry {
            run_id: Uuid::new_v4(),
            job_name: job_name.to_string(),
            params: params.clone(),
            resumes_from,
            status: RunStatus::Running,
            stop_requested: false,
            read_count: 0,
            write_count: 0,
            skip_count: 0,
            filtered_count: 0,
            declared_count: None,
            business_date: None,
            header_metadata: None,
            footer_metadata: None,
            failure_cause: None,
            started_at: Utc::now(),
            ended_at: None,
        };
        self.runs.lock().await.insert(entry.run_id, entry.clone());
        Ok(entry)
    }

    async fn update_progress(
        &self,
        run_id: Uuid,
        counters: &StepCounters,
    ) -> Result<(), LedgerError> {
        let mut runs = self.runs.lock().await;
        let entry = runs.get_mut(&run_id).ok_or(LedgerError::NotFound(run_id))?;
        entry.read_count = counters.read;
        entry.write_count = counters.write;
        entry.skip_count = counters.skip;
        entry.filtered_count = counters.filtered;
        Ok(())
    }

    async fn attach_header(
        &self,
        run_id: Uuid,
        business_date: Option<NaiveDate>,
        metadata: Option<Value>,
    ) -> Result<(), LedgerError> {
        let mut runs = self.runs.lock().await;
        let entry = runs.get_mut(&run_id).ok_or(LedgerError::NotFound(run_id))?;
        entry.business_date = business_date;
        entry.header_metadata = metadata;
        Ok(())
    }

    async fn attach_footer(
        &self,
        run_id: Uuid,
        declared_count: u64,
        metadata: Option<Value>,
    ) -> Result<(), LedgerError> {
        let mut runs = self.runs.lock().await;
        let entry = runs.get_mut(&run_id).ok_or(LedgerError::NotFound(run_id))?;
        entry.declared_count = Some(declared_count);
        entry.footer_metadata = metadata;
        Ok(())
    }

    async fn request_stop(&self, run_id: Uuid) -> Result<(), LedgerError> {
        let mut runs = self.runs.lock().await;
        let entry = runs.get_mut(&run_id).ok_or(LedgerError::NotFound(run_id))?;
        entry.stop_requested = true;
        Ok(())
    }

    async fn is_stop_requested(&self, run_id: Uuid) -> Result<bool, LedgerError> {
        let runs = self.runs.lock().await;
        let entry = runs.get(&run_id).ok_or(LedgerError::NotFound(run_id))?;
        Ok(entry.stop_requested)
    }

    async fn finalize(
        &self,
        run_id: Uuid,
        status: RunStatus,
        failure_cause: Option<&str>,
    ) -> Result<LedgerEntry, LedgerError> {
        let mut runs = self.runs.lock().await;
        let entry = runs.get_mut(&run_id).ok_or(LedgerError::NotFound(run_id))?;
        if entry.status != RunStatus::Running || !status.is_terminal() {
            return Err(LedgerError::InvalidTransition {
                run_id,
                from: entry.status,
                to: status,
            });
        }
        entry.status = status;
        entry.failure_cause = failure_cause.map(str::to_string);
        entry.ended_at = Some(Utc::now());
        Ok(entry.clone())
    }

    async fn get_run(&self, run_id: Uuid) -> Result<LedgerEntry, LedgerError> {
        let runs = self.runs.lock().await;
        runs.get(&run_id)
            .cloned()
            .ok_or(LedgerError::NotFound(run_id))
    }

    async fn list_runs(&self, filter: &RunFilter) -> Result<Vec<LedgerEntry>, LedgerError> {
        let runs = self.runs.lock().await;
        let mut entries: Vec<LedgerEntry> = runs
            .values()
            .filter(|e| {
                filter
                    .job_name
                    .as_ref()
                    .is_none_or(|name| &e.job_name == name)
            })
            .filter(|e| filter.status.is_none_or(|s| e.status == s))
            .cloned()
            .collect();
        entries.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        if let Some(limit) = filter.limit {
            entries.truncate(limit as usize);
        }
        Ok(entries)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_and_finalize() {
        let ledger = MemoryLedger::new();
        let entry = ledger
            .create_run("users-import", &RunParams::new(), None)
            .await
            .unwrap();
        assert_eq!(entry.status, RunStatus::Running);

        let done = ledger
            .finalize(entry.run_id, RunStatus::Completed, None)
            .await
            .unwrap();
        assert_eq!(done.status, RunStatus::Completed);
        assert!(done.ended_at.is_some());
    }

    #[tokio::test]
    async fn test_terminal_entries_are_immutable() {
        let ledger = MemoryLedger::new();
        let entry = ledger
            .create_run("users-import", &RunParams::new(), None)
            .await
            .unwrap();
        ledger
            .finalize(entry.run_id, RunStatus::Failed, Some("boom"))
            .await
            .unwrap();

        let err = ledger
            .finalize(entry.run_id, RunStatus::Completed, None)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn test_progress_and_frame_metadata() {
        let ledger = MemoryLedger::new();
        let entry = ledger
            .create_run("users-import", &RunParams::new(), None)
            .await
            .unwrap();

        let counters = StepCounters {
            read: 10,
            write: 8,
            skip: 2,
            filtered: 0,
        };
        ledger
            .update_progress(entry.run_id, &counters)
            .await
            .unwrap();
        ledger.attach_footer(entry.run_id, 10, None).await.unwrap();

        let entry = ledger.get_run(entry.run_id).await.unwrap();
        assert_eq!(entry.write_count, 8);
        assert_eq!(entry.skip_count, 2);
        assert_eq!(entry.declared_count, Some(10));
    }

    #[tokio::test]
    async fn test_list_runs_filters_and_orders() {
        let ledger = MemoryLedger::new();
        let a = ledger
            .create_run("alpha", &RunParams::new(), None)
            .await
            .unwrap();
        ledger
            .create_run("beta", &RunParams::new(), None)
            .await
            .unwrap();
        ledger
            .finalize(a.run_id, RunStatus::Failed, Some("boom"))
            .await
            .unwrap();

        let failed = ledger
            .list_runs(&RunFilter {
                status: Some(RunStatus::Failed),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].job_name, "alpha");

        let alpha = ledger
            .list_runs(&RunFilter {
                job_name: Some("alpha".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(alpha.len(), 1);
    }

    #[tokio::test]
    async fn test_stop_request_flag() {
        let ledger = MemoryLedger::new();
        let entry = ledger
            .create_run("users-import", &RunParams::new(), None)
            .await
            .unwrap();
        assert!(!ledger.is_stop_requested(entry.run_id).await.unwrap());
        ledger.request_stop(entry.run_id).await.unwrap();
        assert!(ledger.is_stop_requested(entry.run_id).await.unwrap());
    }
}
