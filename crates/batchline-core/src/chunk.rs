//! Chunk-oriented commit engine
//!
//! Records are read, decoded and buffered into chunks; each chunk is written
//! through the sink in one transaction. Skippable failures consume the
//! offending record and burn skip budget, retryable failures re-attempt the
//! same record or chunk up to the retry budget, and fatal failures end the
//! run. A whole-chunk write failure tagged skippable triggers a record by
//! record rescan so only the bad records are lost.
//!
//! Counter updates reach the ledger after every committed chunk, so a crash
//! or abort mid-run leaves the ledger describing exactly the committed
//! prefix of the file.

use std::io::BufRead;
use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{info, warn};
use uuid::Uuid;

use crate::decode::{RecordDecoder, RecordProcessor};
use crate::error::{ErrorClass, RecordError, RunError};
use crate::ledger::{ExecutionLedger, LedgerEntry};
use crate::reader::{FooterInfo, FramedLineSource, HeaderInfo};
use crate::writer::ChunkWriter;

/// Fault-tolerance budgets for one run.
#[derive(Debug, Clone, Copy)]
pub struct ChunkConfig {
    /// Records buffered per transaction
    pub chunk_size: usize,
    /// Total skippable failures tolerated before the run fails
    pub skip_limit: u64,
    /// Re-attempts per retryable failure before it degrades to a skip
    pub retry_limit: u32,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            skip_limit: 100,
            retry_limit: 3,
        }
    }
}

/// Monotonic per-run progress counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StepCounters {
    /// Records decoded successfully
    pub read: u64,
    /// Records durably written
    pub write: u64,
    /// Records dropped by skip policy (decode or write failures)
    pub skip: u64,
    /// Records dropped by the processor, not charged to skip budget
    pub filtered: u64,
}

/// Callbacks fired at run lifecycle points. All methods default to no-ops.
pub trait RunObserver: Send + Sync {
    fn on_run_start(&self, _entry: &LedgerEntry) {}
    fn on_chunk_commit(&self, _run_id: Uuid, _counters: &StepCounters) {}
    fn on_run_end(&self, _entry: &LedgerEntry) {}
}

/// Observer that narrates run progress through the tracing subscriber.
#[derive(Debug, Default)]
pub struct LoggingObserver;

impl RunObserver for LoggingObserver {
    fn on_run_start(&self, entry: &LedgerEntry) {
        info!(run_id = %entry.run_id, job = %entry.job_name, "run started");
    }

    fn on_chunk_commit(&self, run_id: Uuid, counters: &StepCounters) {
        info!(
            %run_id,
            read = counters.read,
            write = counters.write,
            skip = counters.skip,
            "chunk committed"
        );
    }

    fn on_run_end(&self, entry: &LedgerEntry) {
        info!(
            run_id = %entry.run_id,
            status = %entry.status,
            write = entry.write_count,
            skip = entry.skip_count,
            "run ended"
        );
    }
}

/// What the engine produced for one (partition of a) run.
#[derive(Debug, Clone, Default)]
pub struct EngineOutcome {
    pub counters: StepCounters,
    pub header: Option<HeaderInfo>,
    pub footer: Option<FooterInfo>,
    /// True when the run ended early because a stop was requested
    pub stopped: bool,
}

/// Drives one source through decode, process and chunked writes.
pub struct ChunkCommitEngine<B: BufRead, T> {
    source: FramedLineSource<B>,
    decoder: Arc<dyn RecordDecoder<T>>,
    processor: Option<Arc<dyn RecordProcessor<T, T>>>,
    writer: Arc<dyn ChunkWriter<T>>,
    config: ChunkConfig,
    /// Partition workers report through their coordinator instead
    report_progress: bool,
}

impl<B: BufRead + Send, T: Send + Sync> ChunkCommitEngine<B, T> {
    pub fn new(
        source: FramedLineSource<B>,
        decoder: Arc<dyn RecordDecoder<T>>,
        writer: Arc<dyn ChunkWriter<T>>,
    ) -> Self {
        Self {
            source,
            decoder,
            processor: None,
            writer,
            config: ChunkConfig::default(),
            report_progress: true,
        }
    }

    pub fn with_processor(mut self, processor: Arc<dyn RecordProcessor<T, T>>) -> Self {
        self.processor = Some(processor);
        self
    }

    pub fn with_config(mut self, config: ChunkConfig) -> Self {
        self.config = config;
        self
    }

    /// Leave counter and frame reporting to a coordinator. The engine still
    /// polls the ledger for stop requests at every chunk boundary.
    pub fn without_progress_reports(mut self) -> Self {
        self.report_progress = false;
        self
    }

    /// Run to completion, stop request, or failure.
    pub async fn run(
        mut self,
        ledger: &dyn ExecutionLedger,
        run_id: Uuid,
        observers: &[Arc<dyn RunObserver>],
    ) -> Result<EngineOutcome, RunError> {
        let mut counters = StepCounters::default();
        let mut stopped = false;

        loop {
            if ledger.is_stop_requested(run_id).await? {
                info!(%run_id, "stopping at chunk boundary");
                stopped = true;
                break;
            }

            let mut chunk = Vec::with_capacity(self.config.chunk_size);
            let mut exhausted = false;
            while chunk.len() < self.config.chunk_size {
                match self.next_record(&mut counters)? {
                    Some(record) => chunk.push(record),
                    None => {
                        exhausted = true;
                        break;
                    },
                }
            }

            if !chunk.is_empty() {
                self.write_chunk(run_id, chunk, &mut counters).await?;
                if self.report_progress {
                    ledger.update_progress(run_id, &counters).await?;
                }
                for observer in observers {
                    observer.on_chunk_commit(run_id, &counters);
                }
            }

            if exhausted {
                break;
            }
        }

        let summary = self.source.finish();
        if self.report_progress && !stopped {
            if let Some(header) = &summary.header {
                ledger
                    .attach_header(
                        run_id,
                        header.business_date,
                        metadata_json(&header.metadata),
                    )
                    .await?;
            }
            if let Some(footer) = &summary.footer {
                ledger
                    .attach_footer(run_id, footer.declared_count, metadata_json(&footer.metadata))
                    .await?;
            }
        }

        Ok(EngineOutcome {
            counters,
            header: summary.header,
            footer: summary.footer,
            stopped,
        })
    }

    /// Decode the next data line, honoring skip and retry budgets. The
    /// source position only advances once the line's fate is decided, so a
    /// retry re-reads the same logical position.
    fn next_record(&mut self, counters: &mut StepCounters) -> Result<Option<T>, RunError> {
        let mut attempts: u32 = 0;
        loop {
            let Some(line) = self.source.peek()? else {
                return Ok(None);
            };

            match self.decoder.decode(&line) {
                Ok(record) => {
                    self.source.consume();
                    counters.read += 1;
                    match self.apply_processor(record, &line, counters)? {
                        Some(record) => return Ok(Some(record)),
                        None => {
                            attempts = 0;
                            continue;
                        },
                    }
                },
                Err(err) => match err.class() {
                    ErrorClass::Skippable => {
                        self.charge_skip(counters, &err)?;
                        self.source.consume_skipped();
                        warn!(line = line.number, %err, "skipped record");
                        attempts = 0;
                    },
                    ErrorClass::Retryable => {
                        attempts += 1;
                        if attempts > self.config.retry_limit {
                            self.charge_skip(counters, &err)?;
                            self.source.consume_skipped();
                            warn!(line = line.number, %err, "retries exhausted, skipped record");
                            attempts = 0;
                        } else {
                            warn!(line = line.number, attempt = attempts, %err, "retrying record");
                        }
                    },
                    ErrorClass::Fatal => return Err(RunError::Record(err.to_string())),
                },
            }
        }
    }

    fn apply_processor(
        &self,
        record: T,
        line: &crate::reader::Line,
        counters: &mut StepCounters,
    ) -> Result<Option<T>, RunError> {
        let Some(processor) = &self.processor else {
            return Ok(Some(record));
        };
        match processor.process(record) {
            Ok(Some(out)) => Ok(Some(out)),
            Ok(None) => {
                counters.filtered += 1;
                Ok(None)
            },
            Err(err) => match err.class() {
                // The record is already consumed; any non-fatal processor
                // failure can only be resolved by dropping it.
                ErrorClass::Skippable | ErrorClass::Retryable => {
                    self.charge_skip(counters, &err)?;
                    warn!(line = line.number, %err, "processor dropped record");
                    Ok(None)
                },
                ErrorClass::Fatal => Err(RunError::Record(err.to_string())),
            },
        }
    }

    /// Write one chunk, retrying whole-chunk transient failures and falling
    /// back to a record by record rescan when the failure is skippable.
    async fn write_chunk(
        &self,
        run_id: Uuid,
        chunk: Vec<T>,
        counters: &mut StepCounters,
    ) -> Result<(), RunError> {
        let mut attempts: u32 = 0;
        loop {
            match self.writer.write(run_id, &chunk).await {
                Ok(()) => {
                    counters.write += chunk.len() as u64;
                    return Ok(());
                },
                Err(err) => match err.class() {
                    ErrorClass::Retryable => {
                        attempts += 1;
                        if attempts > self.config.retry_limit {
                            return Err(RunError::Write(format!(
                                "retries exhausted after {attempts} attempts: {err}"
                            )));
                        }
                        warn!(%run_id, attempt = attempts, %err, "retrying chunk write");
                    },
                    ErrorClass::Skippable => {
                        warn!(%run_id, %err, "chunk write failed, rescanning record by record");
                        return self.rescan_chunk(run_id, chunk, counters).await;
                    },
                    ErrorClass::Fatal => return Err(RunError::Write(err.to_string())),
                },
            }
        }
    }

    /// Re-write a failed chunk one record at a time, charging bad records
    /// to the skip budget and keeping the good ones.
    async fn rescan_chunk(
        &self,
        run_id: Uuid,
        chunk: Vec<T>,
        counters: &mut StepCounters,
    ) -> Result<(), RunError> {
        for record in &chunk {
            let mut attempts: u32 = 0;
            loop {
                match self.writer.write(run_id, std::slice::from_ref(record)).await {
                    Ok(()) => {
                        counters.write += 1;
                        break;
                    },
                    Err(err) => match err.class() {
                        ErrorClass::Skippable => {
                            self.charge_skip(counters, &err)?;
                            warn!(%run_id, %err, "skipped record during rescan");
                            break;
                        },
                        ErrorClass::Retryable => {
                            attempts += 1;
                            if attempts > self.config.retry_limit {
                                self.charge_skip(counters, &err)?;
                                warn!(%run_id, %err, "retries exhausted during rescan, skipped");
                                break;
                            }
                        },
                        ErrorClass::Fatal => return Err(RunError::Write(err.to_string())),
                    },
                }
            }
        }
        Ok(())
    }

    fn charge_skip(&self, counters: &mut StepCounters, cause: &RecordError) -> Result<(), RunError> {
        if counters.skip >= self.config.skip_limit {
            return Err(RunError::SkipLimitExceeded {
                limit: self.config.skip_limit,
                cause: cause.to_string(),
            });
        }
        counters.skip += 1;
        Ok(())
    }
}

fn metadata_json(metadata: &Map<String, Value>) -> Option<Value> {
    if metadata.is_empty() {
        None
    } else {
        Some(Value::Object(metadata.clone()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::ledger::MemoryLedger;
    use crate::reader::Line;
    use crate::writer::MemoryWriter;
    use std::io::Cursor;

    fn source(content: &str) -> FramedLineSource<Cursor<Vec<u8>>> {
        FramedLineSource::new(Cursor::new(content.as_bytes().to_vec()), None, None)
    }

    fn int_decoder() -> Arc<dyn RecordDecoder<i64>> {
        Arc::new(|line: &Line| {
            line.text
                .trim()
                .parse::<i64>()
                .map_err(|_| RecordError::skippable("not an integer").at_line(line.number))
        })
    }

    async fn running_entry(ledger: &MemoryLedger) -> LedgerEntry {
        use crate::ledger::{ExecutionLedger, RunParams};
        ledger
            .create_run("numbers", &RunParams::new(), None)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_happy_path_chunks() {
        let ledger = MemoryLedger::new();
        let entry = running_entry(&ledger).await;
        let writer = Arc::new(MemoryWriter::<i64>::new());

        let engine = ChunkCommitEngine::new(source("1\n2\n3\n4\n5"), int_decoder(), writer.clone())
            .with_config(ChunkConfig {
                chunk_size: 2,
                ..Default::default()
            });
        let outcome = engine.run(&ledger, entry.run_id, &[]).await.unwrap();

        assert_eq!(outcome.counters.read, 5);
        assert_eq!(outcome.counters.write, 5);
        assert_eq!(outcome.counters.skip, 0);
        assert_eq!(writer.stored(entry.run_id).await, 5);
        // 5 records at chunk size 2: three write calls
        assert_eq!(writer.write_calls(), 3);
    }

    #[tokio::test]
    async fn test_decode_failures_burn_skip_budget() {
        let ledger = MemoryLedger::new();
        let entry = running_entry(&ledger).await;
        let writer = Arc::new(MemoryWriter::<i64>::new());

        let engine = ChunkCommitEngine::new(source("1\nbad\n3"), int_decoder(), writer.clone())
            .with_config(ChunkConfig {
                chunk_size: 10,
                skip_limit: 1,
                retry_limit: 0,
            });
        let outcome = engine.run(&ledger, entry.run_id, &[]).await.unwrap();

        assert_eq!(outcome.counters.read, 2);
        assert_eq!(outcome.counters.skip, 1);
        assert_eq!(writer.records(entry.run_id).await, vec![1, 3]);
    }

    #[tokio::test]
    async fn test_skip_limit_exceeded_fails_run() {
        let ledger = MemoryLedger::new();
        let entry = running_entry(&ledger).await;
        let writer = Arc::new(MemoryWriter::<i64>::new());

        let engine = ChunkCommitEngine::new(source("bad\nworse\n3"), int_decoder(), writer)
            .with_config(ChunkConfig {
                chunk_size: 10,
                skip_limit: 1,
                retry_limit: 0,
            });
        let err = engine.run(&ledger, entry.run_id, &[]).await.unwrap_err();
        assert!(matches!(err, RunError::SkipLimitExceeded { limit: 1, .. }));
    }

    #[tokio::test]
    async fn test_transient_chunk_write_is_retried() {
        let ledger = MemoryLedger::new();
        let entry = running_entry(&ledger).await;
        let writer = Arc::new(MemoryWriter::with_fault(Arc::new(|call, _: &[i64]| {
            (call == 1).then(|| RecordError::retryable("deadlock"))
        })));

        let engine = ChunkCommitEngine::new(source("1\n2"), int_decoder(), writer.clone());
        let outcome = engine.run(&ledger, entry.run_id, &[]).await.unwrap();

        assert_eq!(outcome.counters.write, 2);
        assert_eq!(writer.write_calls(), 2);
    }

    #[tokio::test]
    async fn test_skippable_chunk_write_triggers_rescan() {
        let ledger = MemoryLedger::new();
        let entry = running_entry(&ledger).await;
        // Whole-chunk write fails; on rescan only the single-record write
        // containing 2 fails.
        let writer = Arc::new(MemoryWriter::with_fault(Arc::new(|_, chunk: &[i64]| {
            chunk.contains(&2).then(|| RecordError::skippable("bad row"))
        })));

        let engine = ChunkCommitEngine::new(source("1\n2\n3"), int_decoder(), writer.clone())
            .with_config(ChunkConfig {
                chunk_size: 3,
                ..Default::default()
            });
        let outcome = engine.run(&ledger, entry.run_id, &[]).await.unwrap();

        assert_eq!(outcome.counters.write, 2);
        assert_eq!(outcome.counters.skip, 1);
        assert_eq!(writer.records(entry.run_id).await, vec![1, 3]);
    }

    #[tokio::test]
    async fn test_processor_filters_without_burning_skips() {
        let ledger = MemoryLedger::new();
        let entry = running_entry(&ledger).await;
        let writer = Arc::new(MemoryWriter::<i64>::new());

        let engine = ChunkCommitEngine::new(source("1\n2\n3\n4"), int_decoder(), writer.clone())
            .with_processor(Arc::new(|n: i64| Ok((n % 2 == 0).then_some(n))));
        let outcome = engine.run(&ledger, entry.run_id, &[]).await.unwrap();

        assert_eq!(outcome.counters.read, 4);
        assert_eq!(outcome.counters.filtered, 2);
        assert_eq!(outcome.counters.skip, 0);
        assert_eq!(writer.records(entry.run_id).await, vec![2, 4]);
    }

    #[tokio::test]
    async fn test_stop_request_honored_at_chunk_boundary() {
        use crate::ledger::ExecutionLedger;

        let ledger = MemoryLedger::new();
        let entry = running_entry(&ledger).await;
        ledger.request_stop(entry.run_id).await.unwrap();

        let writer = Arc::new(MemoryWriter::<i64>::new());
        let engine = ChunkCommitEngine::new(source("1\n2\n3"), int_decoder(), writer.clone());
        let outcome = engine.run(&ledger, entry.run_id, &[]).await.unwrap();

        assert!(outcome.stopped);
        assert_eq!(outcome.counters.write, 0);
        assert_eq!(writer.stored(entry.run_id).await, 0);
    }

    #[tokio::test]
    async fn test_stop_honored_even_without_progress_reports() {
        use crate::ledger::ExecutionLedger;

        let ledger = MemoryLedger::new();
        let entry = running_entry(&ledger).await;
        ledger.request_stop(entry.run_id).await.unwrap();

        let writer = Arc::new(MemoryWriter::<i64>::new());
        let engine = ChunkCommitEngine::new(source("1\n2\n3"), int_decoder(), writer.clone())
            .without_progress_reports();
        let outcome = engine.run(&ledger, entry.run_id, &[]).await.unwrap();

        assert!(outcome.stopped);
        assert_eq!(writer.stored(entry.run_id).await, 0);
    }

    #[tokio::test]
    async fn test_progress_reaches_ledger_per_chunk() {
        use crate::ledger::ExecutionLedger;

        let ledger = MemoryLedger::new();
        let entry = running_entry(&ledger).await;
        let writer = Arc::new(MemoryWriter::<i64>::new());

        let engine = ChunkCommitEngine::new(source("1\n2\n3"), int_decoder(), writer)
            .with_config(ChunkConfig {
                chunk_size: 2,
                ..Default::default()
            });
        engine.run(&ledger, entry.run_id, &[]).await.unwrap();

        let entry = ledger.get_run(entry.run_id).await.unwrap();
        assert_eq!(entry.read_count, 3);
        assert_eq!(entry.write_count, 3);
    }
}
