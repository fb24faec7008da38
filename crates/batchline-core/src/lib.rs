//! Batchline Core Engine
//!
//! File-to-database batch import engine: a framed single-pass line reader
//! with deferred line classification, a chunk-oriented transactional commit
//! engine with bounded skip/retry fault tolerance, and a durable execution
//! ledger whose transactions are independent of business-data writes.
//!
//! # Pipeline
//!
//! ```text
//! FramedLineSource -> RecordDecoder -> ChunkCommitEngine -> ChunkWriter
//!        |                                    |
//!        +---------- ExecutionLedger <--------+
//! ```
//!
//! Runs are launched through a [`launcher::Launcher`] holding an explicit
//! [`launcher::JobRegistry`]; failed or stopped runs can be relaunched with
//! their original parameters through [`restart::RestartCoordinator`].

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod chunk;
pub mod decode;
pub mod error;
pub mod launcher;
pub mod ledger;
pub mod partition;
pub mod reader;
pub mod restart;
pub mod writer;

// Re-export the types most callers wire together
pub use chunk::{ChunkCommitEngine, ChunkConfig, EngineOutcome, RunObserver, StepCounters};
pub use decode::{ColumnSpec, FieldSet, LineTokenizer, MappedDecoder, RecordDecoder, RecordProcessor};
pub use error::{ErrorClass, RecordError, RunError};
pub use launcher::{BatchJob, CountPolicy, FileImportJob, JobRegistry, Launcher};
pub use ledger::{
    ExecutionLedger, LedgerEntry, LedgerError, MemoryLedger, PgLedger, RunFilter, RunParams,
    RunStatus,
};
pub use reader::{FooterDetector, FooterInfo, FooterSpec, FramedLineSource, HeaderInfo, HeaderSpec, Line};
pub use partition::{plan_line_partitions, LinePartition, PartitionedImport};
pub use restart::{RestartCoordinator, RestartOutcome, RestartRequest};
pub use writer::{ChunkWriter, MemoryWriter, PgChunkWriter};
