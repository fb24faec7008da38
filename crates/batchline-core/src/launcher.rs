//! Job registry and run launcher
//!
//! Jobs are registered explicitly by name; nothing is discovered at
//! runtime. The launcher owns the run lifecycle: it creates the RUNNING
//! ledger entry, drives the job, validates declared counts against the
//! footer, and finalizes the entry to exactly one terminal status. A run
//! failure is not a launch failure: the launcher reports it through the
//! returned entry's status.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use batchline_common::BatchlineError;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::chunk::{ChunkCommitEngine, ChunkConfig, EngineOutcome, RunObserver};
use crate::decode::{RecordDecoder, RecordProcessor};
use crate::error::RunError;
use crate::ledger::{ExecutionLedger, LedgerEntry, RunParams, RunStatus};
use crate::partition::PartitionedImport;
use crate::reader::{FooterSpec, FramedLineSource, HeaderSpec};
use crate::writer::ChunkWriter;

/// How the footer's declared count is checked against what the run did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CountPolicy {
    /// Declared count covers every data record, written or skipped
    #[default]
    WritesPlusSkips,
    /// Declared count covers only the records that had to be written
    WritesOnly,
}

impl CountPolicy {
    fn actual(&self, outcome: &EngineOutcome) -> u64 {
        match self {
            CountPolicy::WritesPlusSkips => outcome.counters.write + outcome.counters.skip,
            CountPolicy::WritesOnly => outcome.counters.write,
        }
    }
}

/// Everything a job sees while executing one run.
pub struct RunContext<'a> {
    pub entry: &'a LedgerEntry,
    pub ledger: Arc<dyn ExecutionLedger>,
    pub observers: &'a [Arc<dyn RunObserver>],
}

impl RunContext<'_> {
    /// Fetch a required launch parameter.
    pub fn param(&self, key: &str) -> Result<&str, RunError> {
        self.entry
            .params
            .get(key)
            .map(String::as_str)
            .ok_or_else(|| RunError::Parameters(format!("missing parameter {key:?}")))
    }
}

/// A runnable batch job.
#[async_trait]
pub trait BatchJob: Send + Sync {
    fn name(&self) -> &str;

    async fn execute(&self, ctx: &RunContext<'_>) -> Result<EngineOutcome, RunError>;

    fn count_policy(&self) -> CountPolicy {
        CountPolicy::default()
    }

    /// Best-effort removal of this run's business rows after a count
    /// mismatch. Returns the number of rows removed.
    async fn compensate(&self, _run_id: Uuid) -> Result<u64, RunError> {
        Ok(0)
    }
}

type DecoderArc<T> = Arc<dyn RecordDecoder<T>>;
type ProcessorArc<T> = Arc<dyn RecordProcessor<T, T>>;
type WriterArc<T> = Arc<dyn ChunkWriter<T>>;

/// File-to-sink import job: framed read, decode, optional process, chunked
/// transactional writes. The input file comes from the `input.file` launch
/// parameter unless overridden.
pub struct FileImportJob<T> {
    name: String,
    input_param: String,
    header: Option<HeaderSpec>,
    footer: Option<FooterSpec>,
    decoder: DecoderArc<T>,
    processor: Option<ProcessorArc<T>>,
    writer: WriterArc<T>,
    config: ChunkConfig,
    count_policy: CountPolicy,
    partitions: Option<usize>,
}

impl<T: Send + Sync + 'static> FileImportJob<T> {
    pub fn new(name: impl Into<String>, decoder: DecoderArc<T>, writer: WriterArc<T>) -> Self {
        Self {
            name: name.into(),
            input_param: "input.file".to_string(),
            header: None,
            footer: None,
            decoder,
            processor: None,
            writer,
            config: ChunkConfig::default(),
            count_policy: CountPolicy::default(),
            partitions: None,
        }
    }

    /// Launch parameter naming the input file.
    pub fn input_param(mut self, key: impl Into<String>) -> Self {
        self.input_param = key.into();
        self
    }

    pub fn header(mut self, spec: HeaderSpec) -> Self {
        self.header = Some(spec);
        self
    }

    pub fn footer(mut self, spec: FooterSpec) -> Self {
        self.footer = Some(spec);
        self
    }

    pub fn processor(mut self, processor: ProcessorArc<T>) -> Self {
        self.processor = Some(processor);
        self
    }

    pub fn chunk_config(mut self, config: ChunkConfig) -> Self {
        self.config = config;
        self
    }

    pub fn count_policy(mut self, policy: CountPolicy) -> Self {
        self.count_policy = policy;
        self
    }

    /// Split the file across this many parallel workers.
    pub fn partitions(mut self, workers: usize) -> Self {
        self.partitions = Some(workers);
        self
    }
}

#[async_trait]
impl<T: Send + Sync + 'static> BatchJob for FileImportJob<T> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, ctx: &RunContext<'_>) -> Result<EngineOutcome, RunError> {
        let path = PathBuf::from(ctx.param(&self.input_param)?);

        match self.partitions {
            Some(workers) if workers > 1 => {
                PartitionedImport {
                    path,
                    workers,
                    header: self.header.clone(),
                    footer: self.footer.clone(),
                    decoder: self.decoder.clone(),
                    processor: self.processor.clone(),
                    writer: self.writer.clone(),
                    config: self.config,
                }
                .run(ctx.ledger.clone(), ctx.entry.run_id)
                .await
            },
            _ => {
                let source =
                    FramedLineSource::open(&path, self.header.clone(), self.footer.clone())?;
                let mut engine = ChunkCommitEngine::new(
                    source,
                    self.decoder.clone(),
                    self.writer.clone(),
                )
                .with_config(self.config);
                if let Some(processor) = &self.processor {
                    engine = engine.with_processor(processor.clone());
                }
                engine
                    .run(ctx.ledger.as_ref(), ctx.entry.run_id, ctx.observers)
                    .await
            },
        }
    }

    fn count_policy(&self) -> CountPolicy {
        self.count_policy
    }

    async fn compensate(&self, run_id: Uuid) -> Result<u64, RunError> {
        self.writer
            .purge(run_id)
            .await
            .map_err(|e| RunError::Write(e.to_string()))
    }
}

/// Explicit name-to-job mapping.
#[derive(Default)]
pub struct JobRegistry {
    jobs: HashMap<String, Arc<dyn BatchJob>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, job: Arc<dyn BatchJob>) {
        self.jobs.insert(job.name().to_string(), job);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn BatchJob>> {
        self.jobs.get(name).cloned()
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.jobs.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

/// Creates, drives and finalizes runs.
pub struct Launcher {
    registry: JobRegistry,
    ledger: Arc<dyn ExecutionLedger>,
    observers: Vec<Arc<dyn RunObserver>>,
}

impl Launcher {
    pub fn new(registry: JobRegistry, ledger: Arc<dyn ExecutionLedger>) -> Self {
        Self {
            registry,
            ledger,
            observers: Vec::new(),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn RunObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    pub fn ledger(&self) -> &Arc<dyn ExecutionLedger> {
        &self.ledger
    }

    /// Launch a fresh run of a registered job.
    pub async fn launch(
        &self,
        job_name: &str,
        params: RunParams,
    ) -> Result<LedgerEntry, BatchlineError> {
        self.launch_inner(job_name, params, None).await
    }

    /// Launch a run that resumes an earlier, terminal one.
    pub(crate) async fn launch_resuming(
        &self,
        job_name: &str,
        params: RunParams,
        resumes_from: Uuid,
    ) -> Result<LedgerEntry, BatchlineError> {
        self.launch_inner(job_name, params, Some(resumes_from)).await
    }

    async fn launch_inner(
        &self,
        job_name: &str,
        params: RunParams,
        resumes_from: Option<Uuid>,
    ) -> Result<LedgerEntry, BatchlineError> {
        let job = self
            .registry
            .get(job_name)
            .ok_or_else(|| BatchlineError::JobNotFound(job_name.to_string()))?;

        let entry = self.ledger.create_run(job_name, &params, resumes_from).await?;
        info!(run_id = %entry.run_id, job_name, "launching run");
        for observer in &self.observers {
            observer.on_run_start(&entry);
        }

        let ctx = RunContext {
            entry: &entry,
            ledger: self.ledger.clone(),
            observers: &self.observers,
        };
        let result = job.execute(&ctx).await;

        let finalized = match result {
            Ok(outcome) if outcome.stopped => {
                self.ledger
                    .finalize(entry.run_id, RunStatus::Stopped, None)
                    .await?
            },
            Ok(outcome) => {
                self.settle_counts(job.as_ref(), &entry, &outcome).await?
            },
            Err(err) => {
                error!(run_id = %entry.run_id, %err, "run failed");
                self.ledger
                    .finalize(entry.run_id, RunStatus::Failed, Some(&err.to_string()))
                    .await?
            },
        };

        for observer in &self.observers {
            observer.on_run_end(&finalized);
        }
        Ok(finalized)
    }

    /// Check the footer's declared count against the run's counters. A
    /// mismatch fails the run even though every chunk committed, after a
    /// best-effort purge of the rows this run wrote.
    async fn settle_counts(
        &self,
        job: &dyn BatchJob,
        entry: &LedgerEntry,
        outcome: &EngineOutcome,
    ) -> Result<LedgerEntry, BatchlineError> {
        if let Some(footer) = &outcome.footer {
            let actual = job.count_policy().actual(outcome);
            if footer.declared_count != actual {
                let cause = RunError::CountMismatch {
                    declared: footer.declared_count,
                    actual,
                };
                error!(run_id = %entry.run_id, %cause, "declared count validation failed");
                match job.compensate(entry.run_id).await {
                    Ok(removed) => {
                        info!(run_id = %entry.run_id, removed, "compensated business rows")
                    },
                    Err(purge_err) => {
                        warn!(run_id = %entry.run_id, %purge_err, "compensation failed")
                    },
                }
                return Ok(self
                    .ledger
                    .finalize(entry.run_id, RunStatus::Failed, Some(&cause.to_string()))
                    .await?);
            }
        }
        Ok(self
            .ledger
            .finalize(entry.run_id, RunStatus::Completed, None)
            .await?)
    }
}
