//! Core data types for the store, queue, and tool surface.
//!
//! The data lifecycle is:
//!
//! ```text
//! input text ──▶ chunk() ──▶ Document (+ embedding) ──▶ store
//!                                                         │
//!                         query embed ──▶ search() ──▶ SearchResult
//! ```
//!
//! Jobs describe requested ingestion work and its lifecycle state; they are
//! persisted in the same database so the worker is stateless across
//! restarts.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Job lifecycle states. `completed` and `failed` are terminal and sticky.
pub mod job_status {
    pub const QUEUED: &str = "queued";
    pub const PROCESSING: &str = "processing";
    pub const COMPLETED: &str = "completed";
    pub const FAILED: &str = "failed";
}

/// Job types understood by the queue worker.
pub mod job_type {
    pub const INDEX_FILE: &str = "index_file";
    pub const INDEX_DIRECTORY: &str = "index_directory";
}

/// A stored document: the unit of storage and search.
///
/// Every document row is paired with exactly one embedding row of the
/// configured dimension; the embedding is never returned on read paths.
///
/// Chunks are ordinary documents whose id is `"<parent>_chunk_<i>"` and
/// whose metadata carries the reserved keys `parent_id`, `chunk_index`,
/// and `total_chunks`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    /// Opaque identifier (UUID for inline content, basename for files).
    pub id: String,
    /// UTF-8 text content, non-empty.
    pub content: String,
    /// String-to-string metadata; empty when none was supplied.
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    /// Set at insert; an upsert of an existing id replaces it.
    pub created_at: DateTime<Utc>,
}

/// A search hit: document plus its distance and derived score.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub document: Document,
    /// Cosine distance reported by the store (lower is closer).
    pub distance: f32,
    /// Similarity in `[0, 1]`, computed as `1 - distance`.
    pub score: f32,
}

/// A persistent ingestion job.
#[derive(Debug, Clone, Serialize)]
pub struct Job {
    pub id: String,
    #[serde(rename = "type")]
    pub job_type: String,
    pub status: String,
    /// JSON-serialized parameter struct ([`IndexFileParams`] or
    /// [`IndexDirParams`]).
    pub params: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub progress: i64,
    pub total: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Whether the job has reached a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.status == job_status::COMPLETED || self.status == job_status::FAILED
    }
}

/// Aggregated counts for the children of a directory job.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ChildJobStats {
    pub total: i64,
    pub queued: i64,
    pub processing: i64,
    pub completed: i64,
    pub failed: i64,
}

/// Parameters for an `index_file` job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexFileParams {
    pub path: String,
}

/// Parameters for an `index_directory` job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexDirParams {
    pub directory: String,
    #[serde(default)]
    pub pattern: String,
    #[serde(default)]
    pub recursive: bool,
}
