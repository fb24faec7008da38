//! In-memory sink with fault injection for engine tests

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::RecordError;

use super::ChunkWriter;

type FaultFn<T> = Arc<dyn Fn(u64, &[T]) -> Option<RecordError> + Send + Sync>;

/// Sink backed by a vector, tagging each stored record with its run.
///
/// An optional fault hook sees the 1-based write-call number and the chunk
/// about to be written, and can fail the call with any error class. Faults
/// fire before anything is stored, so a failed call stores nothing, which
/// mirrors the all-or-nothing contract of the durable sink.
pub struct MemoryWriter<T> {
    rows: Mutex<Vec<(Uuid, T)>>,
    write_calls: AtomicU64,
    fault: Option<FaultFn<T>>,
}

impl<T> Default for MemoryWriter<T> {
    fn default() -> Self {
        Self {
            rows: Mutex::new(Vec::new()),
            write_calls: AtomicU64::new(0),
            fault: None,
        }
    }
}

impl<T> MemoryWriter<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_fault(fault: FaultFn<T>) -> Self {
        Self {
            rows: Mutex::new(Vec::new()),
            write_calls: AtomicU64::new(0),
            fault: Some(fault),
        }
    }

    /// Total write calls attempted, including failed ones.
    pub fn write_calls(&self) -> u64 {
        self.write_calls.load(Ordering::SeqCst)
    }

    pub async fn stored(&self, run_id: Uuid) -> usize {
        self.rows
            .lock()
            .await
            .iter()
            .filter(|(id, _)| *id == run_id)
            .count()
    }
}

impl<T: Clone> MemoryWriter<T> {
    pub async fn records(&self, run_id: Uuid) -> Vec<T> {
        self.rows
            .lock()
            .await
            .iter()
            .filter(|(id, _)| *id == run_id)
            .map(|(_, record)| record.clone())
            .collect()
    }
}

#[async_trait]
impl<T: Clone + Send + Sync> ChunkWriter<T> for MemoryWriter<T> {
    async fn write(&self, run_id: Uuid, chunk: &[T]) -> Result<(), RecordError> {
        let call = self.write_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(fault) = &self.fault {
            if let Some(err) = fault(call, chunk) {
                return Err(err);
            }
        }
        let mut rows = self.rows.lock().await;
        rows.extend(chunk.iter().map(|record| (run_id, record.clone())));
        Ok(())
    }

    async fn purge(&self, run_id: Uuid) -> Result<u64, RecordError> {
        let mut rows = self.rows.lock().await;
        let before = rows.len();
        rows.retain(|(id, _)| *id != run_id);
        Ok((before - rows.len()) as u64)
    }
}
