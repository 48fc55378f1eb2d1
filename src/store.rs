//! Durable store for documents, embeddings, and jobs.
//!
//! Three logical tables back the store: `documents` holds text and
//! metadata JSON, `documents_vec` holds one embedding BLOB per document,
//! and `jobs` holds the persistent job queue. Writes that span the
//! document/vector pair run in a transaction; read paths tolerate
//! corrupted metadata by substituting an empty map.
//!
//! Search is exact cosine distance over the stored vectors, sorted
//! ascending and truncated to `k`.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::debug;

use crate::db;
use crate::embedding::{blob_to_vec, cosine_distance, vec_to_blob};
use crate::error::{Error, Result};
use crate::migrate;
use crate::models::{job_status, ChildJobStats, Document, Job, SearchResult};

/// Poll interval used by [`Store::wait_for_job`].
const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Document, vector, and job storage over a single SQLite file.
#[derive(Debug)]
pub struct Store {
    pool: SqlitePool,
    dimensions: usize,
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

fn millis_to_datetime(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

/// Parse stored metadata JSON, quietly substituting an empty map when the
/// stored value is corrupt. Corrupted metadata must never fail a read.
fn parse_metadata(raw: &str) -> HashMap<String, String> {
    if raw.is_empty() {
        return HashMap::new();
    }
    match serde_json::from_str(raw) {
        Ok(map) => map,
        Err(err) => {
            debug!("ignoring malformed document metadata: {err}");
            HashMap::new()
        }
    }
}

fn document_from_row(row: &SqliteRow) -> Document {
    let metadata: String = row.get("metadata");
    Document {
        id: row.get("id"),
        content: row.get("content"),
        metadata: parse_metadata(&metadata),
        created_at: millis_to_datetime(row.get("created_at")),
    }
}

fn job_from_row(row: &SqliteRow) -> Job {
    Job {
        id: row.get("id"),
        job_type: row.get("type"),
        status: row.get("status"),
        params: row.get("params"),
        result: row.get("result"),
        error: row.get("error"),
        progress: row.get("progress"),
        total: row.get("total"),
        parent_id: row.get("parent_id"),
        created_at: millis_to_datetime(row.get("created_at")),
        updated_at: millis_to_datetime(row.get("updated_at")),
    }
}

const JOB_COLUMNS: &str =
    "id, type, status, params, result, error, progress, total, parent_id, created_at, updated_at";

impl Store {
    /// Open (or create) the store at `path` with the given embedding
    /// dimension, running migrations and the dimension guard.
    pub async fn open(path: &Path, dimensions: usize) -> Result<Self> {
        let pool = db::connect(path).await?;
        migrate::run_migrations(&pool, dimensions).await?;
        Ok(Self { pool, dimensions })
    }

    /// The embedding dimension this store was opened with.
    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Access to the underlying pool, for tests and maintenance.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close the connection pool.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    // ── Documents ────────────────────────────────────────────────────────

    /// Upsert a document and its embedding in one transaction.
    ///
    /// Replaces content, metadata, embedding, and `created_at` for an
    /// existing id. Fails before writing anything when the embedding
    /// dimension does not match the store's.
    pub async fn add_document(
        &self,
        id: &str,
        content: &str,
        metadata: &HashMap<String, String>,
        embedding: &[f32],
    ) -> Result<()> {
        if embedding.len() != self.dimensions {
            return Err(Error::Embedding(format!(
                "embedding dimension {} does not match store dimension {}",
                embedding.len(),
                self.dimensions
            )));
        }

        let metadata_json = serde_json::to_string(metadata)?;
        let blob = vec_to_blob(embedding);
        let now = now_millis();

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT OR REPLACE INTO documents (id, content, metadata, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(id)
        .bind(content)
        .bind(&metadata_json)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        sqlx::query("INSERT OR REPLACE INTO documents_vec (id, embedding) VALUES (?, ?)")
            .bind(id)
            .bind(&blob)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Fetch a document by id, without its embedding.
    pub async fn get_document(&self, id: &str) -> Result<Option<Document>> {
        let row = sqlx::query("SELECT id, content, metadata, created_at FROM documents WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|r| document_from_row(&r)))
    }

    /// All documents, newest first, without embeddings.
    pub async fn list_documents(&self) -> Result<Vec<Document>> {
        let rows = sqlx::query(
            "SELECT id, content, metadata, created_at FROM documents ORDER BY created_at DESC",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(document_from_row).collect())
    }

    /// Delete a document and its embedding in one transaction.
    ///
    /// Returns whether a document row existed; a missing id is not an
    /// error.
    pub async fn delete_document(&self, id: &str) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let res = sqlx::query("DELETE FROM documents WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        sqlx::query("DELETE FROM documents_vec WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(res.rows_affected() > 0)
    }

    /// Number of document rows.
    pub async fn count(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Nearest-neighbor search by cosine distance.
    ///
    /// Returns up to `limit` results ordered by ascending distance;
    /// non-positive limits default to 5.
    pub async fn search(&self, embedding: &[f32], limit: i64) -> Result<Vec<SearchResult>> {
        let limit = if limit <= 0 { 5 } else { limit };

        let rows = sqlx::query(
            r#"
            SELECT d.id, d.content, d.metadata, d.created_at, v.embedding
            FROM documents_vec v
            JOIN documents d ON d.id = v.id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut results: Vec<SearchResult> = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                let stored = blob_to_vec(&blob);
                let distance = cosine_distance(embedding, &stored);
                SearchResult {
                    document: document_from_row(row),
                    distance,
                    score: 1.0 - distance,
                }
            })
            .collect();

        results.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        results.truncate(limit as usize);

        Ok(results)
    }

    // ── Jobs ─────────────────────────────────────────────────────────────

    /// Insert a job with status `queued`.
    pub async fn create_job(&self, id: &str, job_type: &str, params: &str) -> Result<()> {
        let now = now_millis();
        sqlx::query(
            "INSERT INTO jobs (id, type, status, params, created_at, updated_at) VALUES (?, ?, 'queued', ?, ?, ?)",
        )
        .bind(id)
        .bind(job_type)
        .bind(params)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Insert a child job with status `queued` and the given parent.
    pub async fn create_job_with_parent(
        &self,
        id: &str,
        job_type: &str,
        params: &str,
        parent_id: &str,
    ) -> Result<()> {
        let now = now_millis();
        sqlx::query(
            "INSERT INTO jobs (id, type, status, params, parent_id, created_at, updated_at) VALUES (?, ?, 'queued', ?, ?, ?, ?)",
        )
        .bind(id)
        .bind(job_type)
        .bind(params)
        .bind(parent_id)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Fetch a job by id.
    pub async fn get_job(&self, id: &str) -> Result<Option<Job>> {
        let row = sqlx::query(&format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|r| job_from_row(&r)))
    }

    /// List jobs, optionally filtered by status, newest first.
    pub async fn list_jobs(&self, status: Option<&str>) -> Result<Vec<Job>> {
        let rows = match status {
            None => {
                sqlx::query(&format!(
                    "SELECT {JOB_COLUMNS} FROM jobs ORDER BY created_at DESC, rowid DESC"
                ))
                .fetch_all(&self.pool)
                .await?
            }
            Some(status) => {
                sqlx::query(&format!(
                    "SELECT {JOB_COLUMNS} FROM jobs WHERE status = ? ORDER BY created_at DESC, rowid DESC"
                ))
                .bind(status)
                .fetch_all(&self.pool)
                .await?
            }
        };

        Ok(rows.iter().map(job_from_row).collect())
    }

    /// Update a job's status. Terminal statuses are sticky: a completed or
    /// failed job is never transitioned again.
    pub async fn update_job_status(&self, id: &str, status: &str) -> Result<()> {
        sqlx::query(
            "UPDATE jobs SET status = ?, updated_at = ? WHERE id = ? AND status NOT IN ('completed', 'failed')",
        )
        .bind(status)
        .bind(now_millis())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Update a job's progress counters.
    pub async fn update_job_progress(&self, id: &str, progress: i64, total: i64) -> Result<()> {
        sqlx::query("UPDATE jobs SET progress = ?, total = ?, updated_at = ? WHERE id = ?")
            .bind(progress)
            .bind(total)
            .bind(now_millis())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Record a job's result and mark it `completed`.
    pub async fn update_job_result(&self, id: &str, result: &str) -> Result<()> {
        sqlx::query(
            "UPDATE jobs SET result = ?, status = 'completed', updated_at = ? WHERE id = ? AND status NOT IN ('completed', 'failed')",
        )
        .bind(result)
        .bind(now_millis())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Record a job's error and mark it `failed`.
    pub async fn update_job_error(&self, id: &str, error: &str) -> Result<()> {
        sqlx::query(
            "UPDATE jobs SET error = ?, status = 'failed', updated_at = ? WHERE id = ? AND status NOT IN ('completed', 'failed')",
        )
        .bind(error)
        .bind(now_millis())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Atomically claim the oldest queued job, marking it `processing`.
    ///
    /// The claim is a single UPDATE with a subquery, so SQLite serializes
    /// it: two callers can never receive the same job.
    pub async fn next_pending_job(&self) -> Result<Option<Job>> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE jobs SET status = 'processing', updated_at = ?
            WHERE id = (
                SELECT id FROM jobs WHERE status = 'queued'
                ORDER BY created_at ASC, rowid ASC LIMIT 1
            )
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(now_millis())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| job_from_row(&r)))
    }

    /// Aggregate child-job counts by status for a parent job.
    ///
    /// Unknown parents simply yield zeroes.
    pub async fn child_job_stats(&self, parent_id: &str) -> Result<ChildJobStats> {
        let rows = sqlx::query(
            "SELECT status, COUNT(*) AS count FROM jobs WHERE parent_id = ? GROUP BY status",
        )
        .bind(parent_id)
        .fetch_all(&self.pool)
        .await?;

        let mut stats = ChildJobStats::default();
        for row in &rows {
            let status: String = row.get("status");
            let count: i64 = row.get("count");
            stats.total += count;
            match status.as_str() {
                job_status::QUEUED => stats.queued = count,
                job_status::PROCESSING => stats.processing = count,
                job_status::COMPLETED => stats.completed = count,
                job_status::FAILED => stats.failed = count,
                _ => {}
            }
        }

        Ok(stats)
    }

    /// Poll a job until it reaches a terminal state or the deadline
    /// passes, returning the last observed state either way.
    pub async fn wait_for_job(&self, id: &str, timeout: Duration) -> Result<Job> {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            let job = self
                .get_job(id)
                .await?
                .ok_or_else(|| Error::NotFound(format!("job {id}")))?;

            if job.is_terminal() || tokio::time::Instant::now() >= deadline {
                return Ok(job);
            }

            tokio::time::sleep(WAIT_POLL_INTERVAL).await;
        }
    }

    /// Delete jobs by status, or every job for the literal `"all"`.
    /// Returns the number of rows removed.
    pub async fn delete_jobs(&self, status: &str) -> Result<i64> {
        let res = if status == "all" {
            sqlx::query("DELETE FROM jobs").execute(&self.pool).await?
        } else {
            sqlx::query("DELETE FROM jobs WHERE status = ?")
                .bind(status)
                .execute(&self.pool)
                .await?
        };

        Ok(res.rows_affected() as i64)
    }
}
