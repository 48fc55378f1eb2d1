//! Database schema creation.
//!
//! All statements are idempotent, so running the migration on every open
//! is safe. The schema:
//!
//! | Table | Purpose |
//! |-------|---------|
//! | `documents` | Document text and metadata JSON |
//! | `documents_vec` | One embedding BLOB per document |
//! | `jobs` | Persistent ingestion job records |
//! | `index_meta` | Embedding dimension recorded at creation time |
//!
//! Databases created before hierarchical jobs existed lack the
//! `jobs.parent_id` column; an `ALTER TABLE` adds it, and the resulting
//! error on newer databases is ignored.

use sqlx::SqlitePool;
use tracing::debug;

use crate::error::{Error, Result};

/// Create all tables and indexes, and verify the embedding dimension.
///
/// The dimension the database was created with is recorded in
/// `index_meta`; reopening with a different configured dimension is
/// reported as an error rather than silently corrupting the vector table.
pub async fn run_migrations(pool: &SqlitePool, dimensions: usize) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            id TEXT PRIMARY KEY,
            content TEXT NOT NULL,
            metadata TEXT NOT NULL DEFAULT '{}',
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS documents_vec (
            id TEXT PRIMARY KEY,
            embedding BLOB NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS jobs (
            id TEXT PRIMARY KEY,
            type TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'queued',
            params TEXT NOT NULL,
            result TEXT,
            error TEXT,
            progress INTEGER NOT NULL DEFAULT 0,
            total INTEGER NOT NULL DEFAULT 0,
            parent_id TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS index_meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Migration for databases that predate hierarchical jobs; fails
    // harmlessly when the column already exists.
    if let Err(err) = sqlx::query("ALTER TABLE jobs ADD COLUMN parent_id TEXT")
        .execute(pool)
        .await
    {
        debug!("parent_id migration skipped: {err}");
    }

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_jobs_status_created ON jobs(status, created_at)",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_jobs_parent_id ON jobs(parent_id)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_documents_created_at ON documents(created_at DESC)",
    )
    .execute(pool)
    .await?;

    check_dimensions(pool, dimensions).await
}

/// Record the embedding dimension on first open; reject mismatches later.
async fn check_dimensions(pool: &SqlitePool, dimensions: usize) -> Result<()> {
    let recorded: Option<String> =
        sqlx::query_scalar("SELECT value FROM index_meta WHERE key = 'dimensions'")
            .fetch_optional(pool)
            .await?;

    match recorded {
        Some(value) => {
            let stored: usize = value.parse().unwrap_or(0);
            if stored != dimensions {
                return Err(Error::Internal(format!(
                    "database was created with embedding dimension {stored}, \
                     but the configured dimension is {dimensions}"
                )));
            }
        }
        None => {
            sqlx::query("INSERT INTO index_meta (key, value) VALUES ('dimensions', ?)")
                .bind(dimensions.to_string())
                .execute(pool)
                .await?;
        }
    }

    Ok(())
}
