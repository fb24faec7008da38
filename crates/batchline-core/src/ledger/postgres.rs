//! Postgres-backed ledger
//!
//! Uses its own connection pool, never the business-data pool. Every method
//! is a single auto-committed statement, so ledger state survives any
//! rollback on the business side.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value;
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::{PgPool, QueryBuilder, Row};
use tracing::{debug, info};
use uuid::Uuid;

use crate::chunk::StepCounters;

use super::{ExecutionLedger, LedgerEntry, LedgerError, RunFilter, RunParams, RunStatus};

const SELECT_RUN: &str = r#"
    SELECT run_id, job_name, params, resumes_from, status, stop_requested,
           read_count, write_count, skip_count, filtered_count, declared_count,
           business_date, header_metadata, footer_metadata, failure_cause,
           started_at, ended_at
    FROM batch_runs
"#;

#[derive(sqlx::FromRow)]
struct RunRow {
    run_id: Uuid,
    job_name: String,
    params: Json<RunParams>,
    resumes_from: Option<Uuid>,
    status: String,
    stop_requested: bool,
    read_count: i64,
    write_count: i64,
    skip_count: i64,
    filtered_count: i64,
    declared_count: Option<i64>,
    business_date: Option<NaiveDate>,
    header_metadata: Option<Value>,
    footer_metadata: Option<Value>,
    failure_cause: Option<String>,
    started_at: DateTime<Utc>,
    ended_at: Option<DateTime<Utc>>,
}

impl TryFrom<RunRow> for LedgerEntry {
    type Error = LedgerError;

    fn try_from(row: RunRow) -> Result<Self, Self::Error> {
        Ok(LedgerEntry {
            run_id: row.run_id,
            job_name: row.job_name,
            params: row.params.0,
            resumes_from: row.resumes_from,
            status: row.status.parse()?,
            stop_requested: row.stop_requested,
            read_count: row.read_count as u64,
            write_count: row.write_count as u64,
            skip_count: row.skip_count as u64,
            filtered_count: row.filtered_count as u64,
            declared_count: row.declared_count.map(|c| c as u64),
            business_date: row.business_date,
            header_metadata: row.header_metadata,
            footer_metadata: row.footer_metadata,
            failure_cause: row.failure_cause,
            started_at: row.started_at,
            ended_at: row.ended_at,
        })
    }
}

/// Ledger stored in a `batch_runs` table.
#[derive(Debug, Clone)]
pub struct PgLedger {
    pool: PgPool,
}

impl PgLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open a dedicated pool against the ledger database.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, LedgerError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;
        info!(max_connections, "connected ledger pool");
        Ok(Self { pool })
    }

    /// Create the `batch_runs` table if it does not exist.
    pub async fn ensure_schema(&self) -> Result<(), LedgerError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS batch_runs (
                run_id          UUID PRIMARY KEY,
                job_name        TEXT NOT NULL,
                params          JSONB NOT NULL DEFAULT '{}'::jsonb,
                resumes_from    UUID,
                status          TEXT NOT NULL,
                stop_requested  BOOLEAN NOT NULL DEFAULT FALSE,
                read_count      BIGINT NOT NULL DEFAULT 0,
                write_count     BIGINT NOT NULL DEFAULT 0,
                skip_count      BIGINT NOT NULL DEFAULT 0,
                filtered_count  BIGINT NOT NULL DEFAULT 0,
                declared_count  BIGINT,
                business_date   DATE,
                header_metadata JSONB,
                footer_metadata JSONB,
                failure_cause   TEXT,
                started_at      TIMESTAMPTZ NOT NULL DEFAULT now(),
                ended_at        TIMESTAMPTZ
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_batch_runs_job_status
             ON batch_runs (job_name, status, started_at DESC)",
        )
        .execute(&self.pool)
        .await?;

        debug!("ledger schema ready");
        Ok(())
    }

    async fn fetch_run(&self, run_id: Uuid) -> Result<LedgerEntry, LedgerError> {
        let row = sqlx::query_as::<_, RunRow>(&format!("{SELECT_RUN} WHERE run_id = $1"))
            .bind(run_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(LedgerError::NotFound(run_id))?;
        row.try_into()
    }
}

#[async_trait]
impl ExecutionLedger for PgLedger {
    async fn create_run(
        &self,
        job_name: &str,
        params: &RunParams,
        resumes_from: Option<Uuid>,
    ) -> Result<LedgerEntry, LedgerError> {
        let run_id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO batch_runs (run_id, job_name, params, resumes_from, status)
             VALUES ($1, $2, $3, $4, 'running')",
        )
        .bind(run_id)
        .bind(job_name)
        .bind(Json(params))
        .bind(resumes_from)
        .execute(&self.pool)
        .await?;
        info!(%run_id, job_name, ?resumes_from, "created run");
        self.fetch_run(run_id).await
    }

    async fn update_progress(
        &self,
        run_id: Uuid,
        counters: &StepCounters,
    ) -> Result<(), LedgerError> {
        let result = sqlx::query(
            "UPDATE batch_runs
             SET read_count = $2, write_count = $3, skip_count = $4, filtered_count = $5
             WHERE run_id = $1",
        )
        .bind(run_id)
        .bind(counters.read as i64)
        .bind(counters.write as i64)
        .bind(counters.skip as i64)
        .bind(counters.filtered as i64)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(LedgerError::NotFound(run_id));
        }
        Ok(())
    }

    async fn attach_header(
        &self,
        run_id: Uuid,
        business_date: Option<NaiveDate>,
        metadata: Option<Value>,
    ) -> Result<(), LedgerError> {
        let result = sqlx::query(
            "UPDATE batch_runs SET business_date = $2, header_metadata = $3 WHERE run_id = $1",
        )
        .bind(run_id)
        .bind(business_date)
        .bind(metadata)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(LedgerError::NotFound(run_id));
        }
        Ok(())
    }

    async fn attach_footer(
        &self,
        run_id: Uuid,
        declared_count: u64,
        metadata: Option<Value>,
    ) -> Result<(), LedgerError> {
        let result = sqlx::query(
            "UPDATE batch_runs SET declared_count = $2, footer_metadata = $3 WHERE run_id = $1",
        )
        .bind(run_id)
        .bind(declared_count as i64)
        .bind(metadata)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(LedgerError::NotFound(run_id));
        }
        Ok(())
    }

    async fn request_stop(&self, run_id: Uuid) -> Result<(), LedgerError> {
        let result = sqlx::query(
            "UPDATE batch_runs SET stop_requested = TRUE
             WHERE run_id = $1 AND status = 'running'",
        )
        .bind(run_id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            // Distinguish a missing run from an already terminal one.
            let entry = self.fetch_run(run_id).await?;
            return Err(LedgerError::InvalidTransition {
                run_id,
                from: entry.status,
                to: RunStatus::Stopped,
            });
        }
        info!(%run_id, "stop requested");
        Ok(())
    }

    async fn is_stop_requested(&self, run_id: Uuid) -> Result<bool, LedgerError> {
        let row = sqlx::query("SELECT stop_requested FROM batch_runs WHERE run_id = $1")
            .bind(run_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(LedgerError::NotFound(run_id))?;
        Ok(row.try_get("stop_requested")?)
    }

    async fn finalize(
        &self,
        run_id: Uuid,
        status: RunStatus,
        failure_cause: Option<&str>,
    ) -> Result<LedgerEntry, LedgerError> {
        if !status.is_terminal() {
            let entry = self.fetch_run(run_id).await?;
            return Err(LedgerError::InvalidTransition {
                run_id,
                from: entry.status,
                to: status,
            });
        }
        // The status guard in the WHERE clause makes finalize idempotence
        // violations visible instead of silently rewriting history.
        let result = sqlx::query(
            "UPDATE batch_runs
             SET status = $2, failure_cause = $3, ended_at = now()
             WHERE run_id = $1 AND status = 'running'",
        )
        .bind(run_id)
        .bind(status.as_str())
        .bind(failure_cause)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            let entry = self.fetch_run(run_id).await?;
            return Err(LedgerError::InvalidTransition {
                run_id,
                from: entry.status,
                to: status,
            });
        }
        info!(%run_id, %status, "finalized run");
        self.fetch_run(run_id).await
    }

    async fn get_run(&self, run_id: Uuid) -> Result<LedgerEntry, LedgerError> {
        self.fetch_run(run_id).await
    }

    async fn list_runs(&self, filter: &RunFilter) -> Result<Vec<LedgerEntry>, LedgerError> {
        let mut builder = QueryBuilder::new(SELECT_RUN);
        let mut has_where = false;
        if let Some(job_name) = &filter.job_name {
            builder.push(" WHERE job_name = ").push_bind(job_name);
            has_where = true;
        }
        if let Some(status) = filter.status {
            builder.push(if has_where { " AND " } else { " WHERE " });
            builder.push("status = ").push_bind(status.as_str());
        }
        builder.push(" ORDER BY started_at DESC");
        if let Some(limit) = filter.limit {
            builder.push(" LIMIT ").push_bind(limit as i64);
        }

        let rows: Vec<RunRow> = builder.build_query_as().fetch_all(&self.pool).await?;
        rows.into_iter().map(LedgerEntry::try_from).collect()
    }
}
