//! Postgres chunk sink
//!
//! One database transaction per chunk on the business pool. Statement
//! failures are classified by SQLSTATE so the chunk engine can tell a bad
//! record (constraint violation) from a transient fault (deadlock, lost
//! connection) from a broken pipeline (everything else).

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::postgres::{PgArguments, Postgres};
use sqlx::query::Query;
use sqlx::PgPool;
use tracing::debug;
use uuid::Uuid;

use crate::error::RecordError;

use super::ChunkWriter;

/// Binds one record's fields onto a prepared insert statement.
pub trait BindRow<T>: Send + Sync {
    fn bind<'q>(
        &self,
        query: Query<'q, Postgres, PgArguments>,
        run_id: Uuid,
        record: &'q T,
    ) -> Query<'q, Postgres, PgArguments>;
}

impl<T, F> BindRow<T> for F
where
    F: for<'q> Fn(
            Query<'q, Postgres, PgArguments>,
            Uuid,
            &'q T,
        ) -> Query<'q, Postgres, PgArguments>
        + Send
        + Sync,
{
    fn bind<'q>(
        &self,
        query: Query<'q, Postgres, PgArguments>,
        run_id: Uuid,
        record: &'q T,
    ) -> Query<'q, Postgres, PgArguments> {
        self(query, run_id, record)
    }
}

/// Sink that inserts each chunk inside a single transaction.
pub struct PgChunkWriter<T> {
    pool: PgPool,
    insert_sql: String,
    binder: Arc<dyn BindRow<T>>,
    purge_sql: Option<String>,
}

impl<T> PgChunkWriter<T> {
    /// `insert_sql` is executed once per record with the binder supplying
    /// the arguments. The statement should reference the run id so that
    /// rows stay attributable for purging.
    pub fn new(pool: PgPool, insert_sql: impl Into<String>, binder: Arc<dyn BindRow<T>>) -> Self {
        Self {
            pool,
            insert_sql: insert_sql.into(),
            binder,
            purge_sql: None,
        }
    }

    /// Statement run by [`ChunkWriter::purge`], with `$1` bound to the run id.
    pub fn with_purge_sql(mut self, purge_sql: impl Into<String>) -> Self {
        self.purge_sql = Some(purge_sql.into());
        self
    }
}

fn classify_db_error(err: sqlx::Error) -> RecordError {
    match &err {
        sqlx::Error::Database(db) => {
            let code = db.code().unwrap_or_default();
            // 23xxx: integrity constraint violation, attributable to the record
            if code.starts_with("23") {
                RecordError::skippable(db.to_string())
            // 40001 serialization failure, 40P01 deadlock
            } else if code == "40001" || code == "40P01" {
                RecordError::retryable(db.to_string())
            } else {
                RecordError::fatal(db.to_string())
            }
        },
        sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => RecordError::retryable(err.to_string()),
        _ => RecordError::fatal(err.to_string()),
    }
}

#[async_trait]
impl<T: Send + Sync> ChunkWriter<T> for PgChunkWriter<T> {
    async fn write(&self, run_id: Uuid, chunk: &[T]) -> Result<(), RecordError> {
        let mut tx = self.pool.begin().await.map_err(classify_db_error)?;
        for record in chunk {
            let query = self
                .binder
                .bind(sqlx::query(&self.insert_sql), run_id, record);
            query.execute(&mut *tx).await.map_err(classify_db_error)?;
        }
        tx.commit().await.map_err(classify_db_error)?;
        debug!(%run_id, records = chunk.len(), "chunk committed");
        Ok(())
    }

    async fn purge(&self, run_id: Uuid) -> Result<u64, RecordError> {
        let Some(purge_sql) = &self.purge_sql else {
            return Ok(0);
        };
        let result = sqlx::query(purge_sql)
            .bind(run_id)
            .execute(&self.pool)
            .await
            .map_err(classify_db_error)?;
        debug!(%run_id, removed = result.rows_affected(), "purged run rows");
        Ok(result.rows_affected())
    }
}
