//! Chunk-oriented sinks for decoded records

mod memory;
mod postgres;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::RecordError;

pub use memory::MemoryWriter;
pub use postgres::{BindRow, PgChunkWriter};

/// Transactional sink for one chunk of records.
///
/// A call to `write` is all-or-nothing: either every record in the chunk is
/// durably stored or none is. On failure the returned [`RecordError`] class
/// tells the chunk engine whether to retry, rescan record by record, or
/// abort the run.
#[async_trait]
pub trait ChunkWriter<T>: Send + Sync {
    async fn write(&self, run_id: Uuid, chunk: &[T]) -> Result<(), RecordError>;

    /// Best-effort removal of everything this run wrote. Returns the number
    /// of records removed. The default sink keeps nothing attributable per
    /// run and removes zero.
    async fn purge(&self, _run_id: Uuid) -> Result<u64, RecordError> {
        Ok(0)
    }
}
