//! Built-in job definitions
//!
//! Jobs are wired into the registry here, explicitly by name. Each job owns
//! its decoder column table, its frame specs and its target table.

use std::sync::Arc;

use sqlx::postgres::{PgArguments, Postgres};
use sqlx::query::Query;
use sqlx::PgPool;
use uuid::Uuid;

use batchline_core::{
    ColumnSpec, FileImportJob, FooterSpec, HeaderSpec, JobRegistry, LineTokenizer, MappedDecoder,
    PgChunkWriter,
};

use crate::error::Result;

/// One row of the `users` import feed.
///
/// Feed format: pipe-delimited `external_id|name|email|status`, preceded by
/// a `YYYYMMDD` business-date header and closed by a record-count footer.
#[derive(Debug, Clone)]
pub struct UserRecord {
    pub external_id: i64,
    pub name: String,
    pub email: String,
    pub status: String,
}

fn users_decoder() -> MappedDecoder<UserRecord> {
    MappedDecoder::new(
        LineTokenizer::delimited('|'),
        vec![
            ColumnSpec::new(0, "external_id"),
            ColumnSpec::new(1, "name"),
            ColumnSpec::new(2, "email").lowercase(),
            ColumnSpec::new(3, "status").uppercase().default_value("ACTIVE"),
        ],
        Arc::new(|fields| {
            Ok(UserRecord {
                external_id: fields.i64(0)?,
                name: fields.string(1)?,
                email: fields.string(2)?,
                status: fields.string(3)?,
            })
        }),
    )
}

fn bind_user<'q>(
    query: Query<'q, Postgres, PgArguments>,
    run_id: Uuid,
    record: &'q UserRecord,
) -> Query<'q, Postgres, PgArguments> {
    query
        .bind(run_id)
        .bind(record.external_id)
        .bind(&record.name)
        .bind(&record.email)
        .bind(&record.status)
}

/// The `users-import` job: framed read of the users feed into
/// `import_users`, one transaction per chunk.
pub fn users_import_job(pool: PgPool) -> FileImportJob<UserRecord> {
    let writer = PgChunkWriter::new(
        pool,
        "INSERT INTO import_users (run_id, external_id, name, email, status)
         VALUES ($1, $2, $3, $4, $5)",
        Arc::new(bind_user),
    )
    .with_purge_sql("DELETE FROM import_users WHERE run_id = $1");

    FileImportJob::new("users-import", Arc::new(users_decoder()), Arc::new(writer))
        .header(HeaderSpec::date("%Y%m%d"))
        .footer(FooterSpec::count())
}

/// All jobs this binary knows how to run.
pub fn build_registry(business_pool: PgPool) -> JobRegistry {
    let mut registry = JobRegistry::new();
    registry.register(Arc::new(users_import_job(business_pool)));
    registry
}

/// Create the business tables the built-in jobs write to.
pub async fn ensure_business_schema(pool: &PgPool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS import_users (
            id          BIGSERIAL PRIMARY KEY,
            run_id      UUID NOT NULL,
            external_id BIGINT NOT NULL UNIQUE,
            name        TEXT NOT NULL,
            email       TEXT NOT NULL,
            status      TEXT NOT NULL,
            imported_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_import_users_run ON import_users (run_id)")
        .execute(pool)
        .await?;

    Ok(())
}
