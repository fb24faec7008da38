//! Partitioned file import
//!
//! A file is split into contiguous line ranges and each range is driven by
//! its own engine on its own task, all writing through the shared sink.
//! Only the first partition parses the header and only the last one sees
//! the footer. Workers touch the ledger only to poll for stop requests;
//! the coordinator merges their counters, validates the footer against the
//! merged totals and reports once after all of them finish.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info};
use uuid::Uuid;

use crate::chunk::{ChunkCommitEngine, ChunkConfig, EngineOutcome, StepCounters};
use crate::decode::{RecordDecoder, RecordProcessor};
use crate::error::RunError;
use crate::ledger::ExecutionLedger;
use crate::reader::{FooterSpec, FramedLineSource, HeaderSpec};
use crate::writer::ChunkWriter;

/// One contiguous range of raw lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinePartition {
    pub index: usize,
    /// Raw lines to discard before the range starts
    pub start_line: u64,
    /// Raw lines in the range; `None` means read to end of file
    pub line_count: Option<u64>,
    pub first: bool,
    pub last: bool,
}

/// Split a file into up to `workers` contiguous line ranges. Files shorter
/// than the worker count get fewer partitions; an empty file gets one.
pub fn plan_line_partitions(path: &Path, workers: usize) -> Result<Vec<LinePartition>, RunError> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut total: u64 = 0;
    let mut buf = String::new();
    loop {
        buf.clear();
        if reader.read_line(&mut buf)? == 0 {
            break;
        }
        total += 1;
    }

    let workers = workers.max(1) as u64;
    let ranges = workers.min(total).max(1);
    let per = total.div_ceil(ranges).max(1);

    let mut partitions = Vec::new();
    let mut start = 0;
    let mut index = 0;
    while start < total || index == 0 {
        let last = start + per >= total;
        partitions.push(LinePartition {
            index,
            start_line: start,
            line_count: if last { None } else { Some(per) },
            first: index == 0,
            last,
        });
        if last {
            break;
        }
        start += per;
        index += 1;
    }
    debug!(total_lines = total, partitions = partitions.len(), "planned partitions");
    Ok(partitions)
}

/// A file import fanned out across parallel line-range workers.
pub struct PartitionedImport<T> {
    pub path: PathBuf,
    pub workers: usize,
    pub header: Option<HeaderSpec>,
    pub footer: Option<FooterSpec>,
    pub decoder: Arc<dyn RecordDecoder<T>>,
    pub processor: Option<Arc<dyn RecordProcessor<T, T>>>,
    pub writer: Arc<dyn ChunkWriter<T>>,
    pub config: ChunkConfig,
}

impl<T: Send + Sync + 'static> PartitionedImport<T> {
    pub async fn run(
        self,
        ledger: Arc<dyn ExecutionLedger>,
        run_id: Uuid,
    ) -> Result<EngineOutcome, RunError> {
        if ledger.is_stop_requested(run_id).await? {
            return Ok(EngineOutcome {
                stopped: true,
                ..Default::default()
            });
        }

        let partitions = plan_line_partitions(&self.path, self.workers)?;
        info!(%run_id, workers = partitions.len(), "starting partitioned import");

        let mut handles = Vec::with_capacity(partitions.len());
        for partition in partitions {
            // Header and footer are positional: the header line only exists
            // in the first range, the footer only in the last. The footer
            // validator is withheld from the worker and applied below with
            // the merged counts.
            let header = partition.first.then(|| self.header.clone()).flatten();
            let footer = partition
                .last
                .then(|| self.footer.clone())
                .flatten()
                .map(FooterSpec::without_validator);
            let source = FramedLineSource::open(&self.path, header, footer)?
                .with_scope(partition.start_line, partition.line_count);

            let mut engine = ChunkCommitEngine::new(
                source,
                self.decoder.clone(),
                self.writer.clone(),
            )
            .with_config(self.config)
            .without_progress_reports();
            if let Some(processor) = &self.processor {
                engine = engine.with_processor(processor.clone());
            }

            let ledger = ledger.clone();
            handles.push(tokio::spawn(async move {
                engine.run(ledger.as_ref(), run_id, &[]).await
            }));
        }

        let mut merged = StepCounters::default();
        let mut header = None;
        let mut footer = None;
        let mut stopped = false;
        let mut remaining = handles.into_iter();
        while let Some(handle) = remaining.next() {
            let outcome = match handle.await {
                Ok(Ok(outcome)) => outcome,
                Ok(Err(err)) => {
                    abort_workers(remaining).await;
                    return Err(err);
                },
                Err(join_err) => {
                    abort_workers(remaining).await;
                    return Err(RunError::Worker(join_err.to_string()));
                },
            };
            merged.read += outcome.counters.read;
            merged.write += outcome.counters.write;
            merged.skip += outcome.counters.skip;
            merged.filtered += outcome.counters.filtered;
            stopped |= outcome.stopped;
            if outcome.header.is_some() {
                header = outcome.header;
            }
            if outcome.footer.is_some() {
                footer = outcome.footer;
            }
        }

        ledger.update_progress(run_id, &merged).await?;

        // Workers consumed data lines independently; the declared count can
        // only be judged against the merged total.
        if let (Some(spec), Some(info)) = (&self.footer, &footer) {
            if let Some(validator) = &spec.validator {
                validator(info, merged.read)
                    .map_err(|e| RunError::FooterValidation(e.to_string()))?;
            }
        }

        if !stopped {
            if let Some(info) = &header {
                let metadata = (!info.metadata.is_empty())
                    .then(|| serde_json::Value::Object(info.metadata.clone()));
                ledger
                    .attach_header(run_id, info.business_date, metadata)
                    .await?;
            }
            if let Some(info) = &footer {
                let metadata = (!info.metadata.is_empty())
                    .then(|| serde_json::Value::Object(info.metadata.clone()));
                ledger
                    .attach_footer(run_id, info.declared_count, metadata)
                    .await?;
            }
        }

        Ok(EngineOutcome {
            counters: merged,
            header,
            footer,
            stopped,
        })
    }
}

type WorkerHandle = tokio::task::JoinHandle<Result<EngineOutcome, RunError>>;

/// Cancel the workers still in flight after one of them failed, and wait
/// for every cancellation to land so no task can write business rows once
/// the run is finalized.
async fn abort_workers(remaining: impl Iterator<Item = WorkerHandle>) {
    let remaining: Vec<_> = remaining.collect();
    for handle in &remaining {
        handle.abort();
    }
    for handle in remaining {
        let _ = handle.await;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::error::RecordError;
    use crate::ledger::{
        ExecutionLedger, LedgerEntry, LedgerError, MemoryLedger, RunFilter, RunParams, RunStatus,
    };
    use crate::reader::{FooterInfo, Line};
    use crate::writer::MemoryWriter;
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use serde_json::Value;
    use std::io::Write as _;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn write_file(dir: &tempfile::TempDir, content: &str) -> PathBuf {
        let path = dir.path().join("input.txt");
        let mut file = File::create(&path).unwrap();
        file.write_all(content.as_bytes()).unwrap();
        path
    }

    fn int_decoder() -> Arc<dyn RecordDecoder<i64>> {
        Arc::new(|line: &Line| {
            line.text
                .trim()
                .parse::<i64>()
                .map_err(|_| RecordError::skippable("not an integer").at_line(line.number))
        })
    }

    #[test]
    fn test_plan_covers_file_exactly_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "1\n2\n3\n4\n5\n6\n7");
        let plan = plan_line_partitions(&path, 3).unwrap();

        assert_eq!(plan.len(), 3);
        assert!(plan[0].first && !plan[0].last);
        assert!(plan[2].last && !plan[2].first);
        assert_eq!(plan[0].start_line, 0);
        assert_eq!(plan[1].start_line, 3);
        assert_eq!(plan[2].start_line, 6);
        assert_eq!(plan[2].line_count, None);
    }

    #[test]
    fn test_plan_shrinks_for_short_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "1\n2");
        let plan = plan_line_partitions(&path, 8).unwrap();
        assert_eq!(plan.len(), 2);

        let empty = write_file(&dir, "");
        let plan = plan_line_partitions(&empty, 4).unwrap();
        assert_eq!(plan.len(), 1);
        assert!(plan[0].first && plan[0].last);
    }

    #[tokio::test]
    async fn test_partitioned_import_merges_counters_and_frame() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "20260119\n1\n2\n3\n4\n5\n5");
        let ledger: Arc<dyn ExecutionLedger> = Arc::new(MemoryLedger::new());
        let entry = ledger
            .create_run("numbers", &RunParams::new(), None)
            .await
            .unwrap();
        let writer = Arc::new(MemoryWriter::<i64>::new());

        let outcome = PartitionedImport {
            path,
            workers: 3,
            header: Some(HeaderSpec::date("%Y%m%d")),
            footer: Some(FooterSpec::count()),
            decoder: int_decoder(),
            processor: None,
            writer: writer.clone(),
            config: ChunkConfig {
                chunk_size: 2,
                ..Default::default()
            },
        }
        .run(ledger.clone(), entry.run_id)
        .await
        .unwrap();

        assert_eq!(outcome.counters.write, 5);
        assert!(outcome.header.is_some());
        assert_eq!(outcome.footer.unwrap().declared_count, 5);

        let mut stored = writer.records(entry.run_id).await;
        stored.sort_unstable();
        assert_eq!(stored, vec![1, 2, 3, 4, 5]);

        let entry = ledger.get_run(entry.run_id).await.unwrap();
        assert_eq!(entry.write_count, 5);
        assert_eq!(entry.declared_count, Some(5));
    }

    #[tokio::test]
    async fn test_middle_partition_treats_numeric_line_as_data() {
        // A numeric line in the middle of the file must never be mistaken
        // for a footer by a worker that happens to end its range there.
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "1\n2\n3\n4\n4");
        let ledger: Arc<dyn ExecutionLedger> = Arc::new(MemoryLedger::new());
        let entry = ledger
            .create_run("numbers", &RunParams::new(), None)
            .await
            .unwrap();
        let writer = Arc::new(MemoryWriter::<i64>::new());

        let outcome = PartitionedImport {
            path,
            workers: 2,
            header: None,
            footer: Some(FooterSpec::count()),
            decoder: int_decoder(),
            processor: None,
            writer: writer.clone(),
            config: ChunkConfig::default(),
        }
        .run(ledger, entry.run_id)
        .await
        .unwrap();

        assert_eq!(outcome.counters.write, 4);
        assert_eq!(outcome.footer.unwrap().declared_count, 4);
    }

    /// Reports no stop for the coordinator's launch check, then a stop for
    /// every worker poll after it.
    struct StopAfterLaunch {
        inner: MemoryLedger,
        polls: AtomicU32,
    }

    #[async_trait]
    impl ExecutionLedger for StopAfterLaunch {
        async fn create_run(
            &self,
            job_name: &str,
            params: &RunParams,
            resumes_from: Option<Uuid>,
        ) -> Result<LedgerEntry, LedgerError> {
            self.inner.create_run(job_name, params, resumes_from).await
        }

        async fn update_progress(
            &self,
            run_id: Uuid,
            counters: &StepCounters,
        ) -> Result<(), LedgerError> {
            self.inner.update_progress(run_id, counters).await
        }

        async fn attach_header(
            &self,
            run_id: Uuid,
            business_date: Option<NaiveDate>,
            metadata: Option<Value>,
        ) -> Result<(), LedgerError> {
            self.inner.attach_header(run_id, business_date, metadata).await
        }

        async fn attach_footer(
            &self,
            run_id: Uuid,
            declared_count: u64,
            metadata: Option<Value>,
        ) -> Result<(), LedgerError> {
            self.inner.attach_footer(run_id, declared_count, metadata).await
        }

        async fn request_stop(&self, run_id: Uuid) -> Result<(), LedgerError> {
            self.inner.request_stop(run_id).await
        }

        async fn is_stop_requested(&self, _run_id: Uuid) -> Result<bool, LedgerError> {
            Ok(self.polls.fetch_add(1, Ordering::SeqCst) > 0)
        }

        async fn finalize(
            &self,
            run_id: Uuid,
            status: RunStatus,
            failure_cause: Option<&str>,
        ) -> Result<LedgerEntry, LedgerError> {
            self.inner.finalize(run_id, status, failure_cause).await
        }

        async fn get_run(&self, run_id: Uuid) -> Result<LedgerEntry, LedgerError> {
            self.inner.get_run(run_id).await
        }

        async fn list_runs(&self, filter: &RunFilter) -> Result<Vec<LedgerEntry>, LedgerError> {
            self.inner.list_runs(filter).await
        }
    }

    #[tokio::test]
    async fn test_workers_observe_stop_requested_after_launch() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "1\n2\n3\n4\n5\n6");
        let ledger = Arc::new(StopAfterLaunch {
            inner: MemoryLedger::new(),
            polls: AtomicU32::new(0),
        });
        let entry = ledger
            .create_run("numbers", &RunParams::new(), None)
            .await
            .unwrap();
        let writer = Arc::new(MemoryWriter::<i64>::new());

        let outcome = PartitionedImport {
            path,
            workers: 2,
            header: None,
            footer: None,
            decoder: int_decoder(),
            processor: None,
            writer: writer.clone(),
            config: ChunkConfig {
                chunk_size: 2,
                ..Default::default()
            },
        }
        .run(ledger, entry.run_id)
        .await
        .unwrap();

        assert!(outcome.stopped);
        assert_eq!(writer.stored(entry.run_id).await, 0);
    }

    /// Fails fatally on the first partition's rows and stalls on everything
    /// else, so other workers are still in flight when the failure lands.
    struct FailFirstStallRest {
        rows: tokio::sync::Mutex<Vec<i64>>,
    }

    #[async_trait]
    impl ChunkWriter<i64> for FailFirstStallRest {
        async fn write(&self, _run_id: Uuid, records: &[i64]) -> Result<(), RecordError> {
            if records.contains(&1) {
                return Err(RecordError::fatal("bad partition"));
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
            self.rows.lock().await.extend_from_slice(records);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_failed_worker_cancels_the_rest() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "1\n2\n3\n4\n5\n6");
        let ledger: Arc<dyn ExecutionLedger> = Arc::new(MemoryLedger::new());
        let entry = ledger
            .create_run("numbers", &RunParams::new(), None)
            .await
            .unwrap();
        let writer = Arc::new(FailFirstStallRest {
            rows: tokio::sync::Mutex::new(Vec::new()),
        });

        let err = PartitionedImport {
            path,
            workers: 3,
            header: None,
            footer: None,
            decoder: int_decoder(),
            processor: None,
            writer: writer.clone(),
            config: ChunkConfig::default(),
        }
        .run(ledger, entry.run_id)
        .await
        .unwrap_err();
        assert!(matches!(err, RunError::Write(_)));

        // All workers are joined or cancelled before the error surfaces, so
        // nothing can commit rows behind the coordinator's back.
        let settled = writer.rows.lock().await.len();
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(writer.rows.lock().await.len(), settled);
    }

    #[tokio::test]
    async fn test_footer_validator_judges_merged_counts() {
        let dir = tempfile::tempdir().unwrap();
        let footer = FooterSpec::count().with_validator(Arc::new(
            |info: &FooterInfo, emitted: u64| {
                if info.declared_count == emitted {
                    Ok(())
                } else {
                    Err(anyhow::anyhow!(
                        "declared {} but emitted {}",
                        info.declared_count,
                        emitted
                    ))
                }
            },
        ));

        // The last partition alone emits fewer lines than the footer
        // declares; only the merged total satisfies the validator.
        let path = write_file(&dir, "1\n2\n3\n4\n4");
        let ledger: Arc<dyn ExecutionLedger> = Arc::new(MemoryLedger::new());
        let entry = ledger
            .create_run("numbers", &RunParams::new(), None)
            .await
            .unwrap();
        let outcome = PartitionedImport {
            path,
            workers: 2,
            header: None,
            footer: Some(footer.clone()),
            decoder: int_decoder(),
            processor: None,
            writer: Arc::new(MemoryWriter::<i64>::new()),
            config: ChunkConfig::default(),
        }
        .run(ledger.clone(), entry.run_id)
        .await
        .unwrap();
        assert_eq!(outcome.counters.write, 4);

        let path = write_file(&dir, "1\n2\n3\n9");
        let entry = ledger
            .create_run("numbers", &RunParams::new(), None)
            .await
            .unwrap();
        let err = PartitionedImport {
            path,
            workers: 2,
            header: None,
            footer: Some(footer),
            decoder: int_decoder(),
            processor: None,
            writer: Arc::new(MemoryWriter::<i64>::new()),
            config: ChunkConfig::default(),
        }
        .run(ledger, entry.run_id)
        .await
        .unwrap_err();
        assert!(matches!(err, RunError::FooterValidation(_)));
    }
}
