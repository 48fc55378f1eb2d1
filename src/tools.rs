//! Tool surface exposed over the stdio protocol.
//!
//! Each tool implements the [`Tool`] trait; the [`ToolRegistry`] holds the
//! built-in set and the protocol loop dispatches by name. Tools receive a
//! [`ToolContext`] bridging to the store, indexer, and queue; there is no
//! global state.
//!
//! Responses follow the tool table: empty results come back as plain text
//! strings, everything else as a JSON object.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::error::{Error, Result};
use crate::index::Indexer;
use crate::models::job_type;
use crate::queue::Queue;
use crate::store::Store;

/// Maximum number of sources a `recall` may consult.
const MAX_RECALL_DEPTH: i64 = 20;
/// Excerpt length cap (in characters) for `recall` summaries.
const RECALL_EXCERPT_CHARS: usize = 500;

/// Services handed to every tool invocation.
#[derive(Clone)]
pub struct ToolContext {
    pub store: Arc<Store>,
    pub indexer: Arc<Indexer>,
    pub queue: Arc<Queue>,
}

impl ToolContext {
    pub fn new(store: Arc<Store>, indexer: Arc<Indexer>, queue: Arc<Queue>) -> Self {
        Self {
            store,
            indexer,
            queue,
        }
    }
}

/// A callable tool with a JSON-schema description of its parameters.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn parameters_schema(&self) -> Value;
    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value>;
}

/// Registry of tools, dispatched by name.
pub struct ToolRegistry {
    tools: Vec<Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: Vec::new() }
    }

    /// The full built-in tool set.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(IndexContentTool));
        registry.register(Box::new(IndexFileTool));
        registry.register(Box::new(IndexDirectoryTool));
        registry.register(Box::new(SearchIndexTool));
        registry.register(Box::new(RecallTool));
        registry.register(Box::new(ListFilesTool));
        registry.register(Box::new(DeleteDocumentTool));
        registry.register(Box::new(CountDocumentsTool));
        registry.register(Box::new(JobStatusTool));
        registry.register(Box::new(ListJobsTool));
        registry.register(Box::new(ClearQueueTool));
        registry
    }

    pub fn register(&mut self, tool: Box<dyn Tool>) {
        self.tools.push(tool);
    }

    pub fn find(&self, name: &str) -> Option<&dyn Tool> {
        self.tools
            .iter()
            .find(|t| t.name() == name)
            .map(|t| t.as_ref())
    }

    pub fn tools(&self) -> &[Box<dyn Tool>] {
        &self.tools
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ── Parameter helpers ────────────────────────────────────────────────────

fn require_str<'a>(params: &'a Value, key: &str) -> Result<&'a str> {
    match params.get(key).and_then(Value::as_str) {
        Some(s) if !s.is_empty() => Ok(s),
        _ => Err(Error::invalid_input(format!("{key} is required"))),
    }
}

fn optional_str<'a>(params: &'a Value, key: &str) -> Option<&'a str> {
    params
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
}

fn optional_i64(params: &Value, key: &str) -> Option<i64> {
    let value = params.get(key)?;
    value.as_i64().or_else(|| value.as_f64().map(|f| f as i64))
}

fn optional_bool(params: &Value, key: &str) -> bool {
    params
        .get(key)
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

/// Truncate to a character count without splitting a code point.
fn truncate_excerpt(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

// ── index_content ────────────────────────────────────────────────────────

/// Index inline text content with an auto-generated id.
pub struct IndexContentTool;

#[async_trait]
impl Tool for IndexContentTool {
    fn name(&self) -> &str {
        "index_content"
    }

    fn description(&self) -> &str {
        "Index text content for semantic search. Use for web pages, API responses, \
         notes, or any text that doesn't come from a local file."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "content": { "type": "string", "description": "The text content to index" },
                "metadata": { "type": "string", "description": "Optional JSON object with metadata" }
            },
            "required": ["content"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let content = require_str(&params, "content")?;

        let metadata: HashMap<String, String> = match optional_str(&params, "metadata") {
            Some(raw) => serde_json::from_str(raw)
                .map_err(|e| Error::invalid_input(format!("invalid metadata JSON: {e}")))?,
            None => HashMap::new(),
        };

        let outcome = ctx.indexer.index(content, &metadata, "").await?;

        Ok(json!({
            "success": true,
            "id": outcome.id,
            "chunk_count": outcome.chunk_count,
        }))
    }
}

// ── index_file ───────────────────────────────────────────────────────────

/// Enqueue a background job to index one file.
pub struct IndexFileTool;

#[async_trait]
impl Tool for IndexFileTool {
    fn name(&self) -> &str {
        "index_file"
    }

    fn description(&self) -> &str {
        "Index a file from the filesystem for semantic search"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "The file path to read and index" }
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let path = require_str(&params, "path")?;
        let job_id = ctx.queue.enqueue_index_file(path).await?;

        Ok(json!({
            "success": true,
            "job_id": job_id,
            "status": "queued",
            "path": path,
        }))
    }
}

// ── index_directory ──────────────────────────────────────────────────────

/// Enqueue a background job to index a directory tree.
pub struct IndexDirectoryTool;

#[async_trait]
impl Tool for IndexDirectoryTool {
    fn name(&self) -> &str {
        "index_directory"
    }

    fn description(&self) -> &str {
        "Index all files matching a pattern in a directory"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "directory": { "type": "string", "description": "The directory path to index" },
                "pattern": { "type": "string", "description": "File pattern to match (e.g. '*.md'). Default: '*'" },
                "recursive": { "type": "boolean", "description": "Whether to descend into subdirectories. Default: false" }
            },
            "required": ["directory"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let directory = require_str(&params, "directory")?;
        let pattern = optional_str(&params, "pattern").unwrap_or("*");
        let recursive = optional_bool(&params, "recursive");

        let job_id = ctx
            .queue
            .enqueue_index_directory(directory, pattern, recursive)
            .await?;

        Ok(json!({
            "success": true,
            "job_id": job_id,
            "status": "queued",
            "directory": directory,
            "pattern": pattern,
            "recursive": recursive,
        }))
    }
}

// ── search_index ─────────────────────────────────────────────────────────

/// Semantic-similarity search over the index.
pub struct SearchIndexTool;

#[async_trait]
impl Tool for SearchIndexTool {
    fn name(&self) -> &str {
        "search_index"
    }

    fn description(&self) -> &str {
        "Search for documents using semantic similarity. Returns document metadata and content."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "The search query text" },
                "limit": { "type": "integer", "description": "Maximum number of results (default: 5)" }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let query = require_str(&params, "query")?;
        let limit = optional_i64(&params, "limit").unwrap_or(5);

        let results = ctx.indexer.query(query, limit).await?;

        if results.is_empty() {
            return Ok(Value::String(format!("No results found for '{query}'")));
        }

        let formatted: Vec<Value> = results
            .iter()
            .map(|r| {
                json!({
                    "id": r.document.id,
                    "content": r.document.content,
                    "metadata": r.document.metadata,
                    "score": r.score,
                })
            })
            .collect();

        Ok(json!({
            "query": query,
            "count": formatted.len(),
            "results": formatted,
        }))
    }
}

// ── recall ───────────────────────────────────────────────────────────────

/// Plain-text knowledge recall, grouped by source.
pub struct RecallTool;

#[async_trait]
impl Tool for RecallTool {
    fn name(&self) -> &str {
        "recall"
    }

    fn description(&self) -> &str {
        "Recall knowledge from indexed documents about a topic. Returns consolidated \
         content suitable for direct use."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "topic": { "type": "string", "description": "The topic to recall information about" },
                "depth": { "type": "integer", "description": "How many sources to consult (default: 5, max: 20)" }
            },
            "required": ["topic"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let topic = require_str(&params, "topic")?;
        let depth = optional_i64(&params, "depth")
            .unwrap_or(5)
            .clamp(1, MAX_RECALL_DEPTH);

        let results = ctx.indexer.query(topic, depth).await?;

        if results.is_empty() {
            return Ok(Value::String(format!("No knowledge found about '{topic}'")));
        }

        // Group excerpts by source, preserving result order.
        let mut order: Vec<String> = Vec::new();
        let mut excerpts: HashMap<String, Vec<String>> = HashMap::new();

        for result in &results {
            let source = result
                .document
                .metadata
                .get("source")
                .cloned()
                .unwrap_or_else(|| result.document.id.clone());

            if !excerpts.contains_key(&source) {
                order.push(source.clone());
            }
            excerpts
                .entry(source)
                .or_default()
                .push(truncate_excerpt(&result.document.content, RECALL_EXCERPT_CHARS));
        }

        let mut summary = format!("Knowledge about '{topic}':\n\n");
        for source in &order {
            for excerpt in &excerpts[source] {
                summary.push_str(excerpt);
                summary.push_str("\n\n");
            }
        }

        Ok(Value::String(summary))
    }
}

// ── list_files ───────────────────────────────────────────────────────────

/// List unique indexed source files with per-file chunk counts.
pub struct ListFilesTool;

#[async_trait]
impl Tool for ListFilesTool {
    fn name(&self) -> &str {
        "list_files"
    }

    fn description(&self) -> &str {
        "List unique indexed source files (not chunks)"
    }

    fn parameters_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn execute(&self, _params: Value, ctx: &ToolContext) -> Result<Value> {
        let docs = ctx.store.list_documents().await?;

        if docs.is_empty() {
            return Ok(Value::String("No files indexed".to_string()));
        }

        struct FileEntry {
            filename: String,
            chunk_count: usize,
        }

        use std::collections::hash_map::Entry;

        let mut order: Vec<String> = Vec::new();
        let mut files: HashMap<String, FileEntry> = HashMap::new();

        for doc in &docs {
            let source = doc
                .metadata
                .get("source")
                .filter(|s| !s.is_empty())
                .cloned()
                .unwrap_or_else(|| doc.id.clone());
            let filename = doc
                .metadata
                .get("filename")
                .filter(|f| !f.is_empty())
                .cloned()
                .unwrap_or_else(|| doc.id.clone());

            match files.entry(source.clone()) {
                Entry::Occupied(mut entry) => entry.get_mut().chunk_count += 1,
                Entry::Vacant(entry) => {
                    order.push(source);
                    entry.insert(FileEntry {
                        filename,
                        chunk_count: 1,
                    });
                }
            }
        }

        let listed: Vec<Value> = order
            .iter()
            .map(|source| {
                let entry = &files[source];
                json!({
                    "source": source,
                    "filename": entry.filename,
                    "chunk_count": entry.chunk_count,
                })
            })
            .collect();

        Ok(json!({
            "count": listed.len(),
            "files": listed,
        }))
    }
}

// ── delete_document ──────────────────────────────────────────────────────

/// Delete a document and all of its chunks.
pub struct DeleteDocumentTool;

#[async_trait]
impl Tool for DeleteDocumentTool {
    fn name(&self) -> &str {
        "delete_document"
    }

    fn description(&self) -> &str {
        "Delete a document from the index"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "id": { "type": "string", "description": "The document ID to delete" }
            },
            "required": ["id"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let id = require_str(&params, "id")?;

        let deleted = ctx.indexer.delete_document_and_chunks(id).await?;
        if deleted == 0 {
            return Err(Error::NotFound(format!("document {id}")));
        }

        Ok(json!({
            "success": true,
            "id": id,
            "deleted_count": deleted,
        }))
    }
}

// ── count_documents ──────────────────────────────────────────────────────

/// Total number of indexed document rows.
pub struct CountDocumentsTool;

#[async_trait]
impl Tool for CountDocumentsTool {
    fn name(&self) -> &str {
        "count_documents"
    }

    fn description(&self) -> &str {
        "Get the total number of indexed documents"
    }

    fn parameters_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn execute(&self, _params: Value, ctx: &ToolContext) -> Result<Value> {
        let count = ctx.store.count().await?;
        Ok(json!({ "count": count }))
    }
}

// ── job_status ───────────────────────────────────────────────────────────

/// Inspect one job, optionally blocking until it settles.
pub struct JobStatusTool;

#[async_trait]
impl Tool for JobStatusTool {
    fn name(&self) -> &str {
        "job_status"
    }

    fn description(&self) -> &str {
        "Get the status of an indexing job"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "id": { "type": "string", "description": "The job ID to check" },
                "block": { "type": "boolean", "description": "If true, wait for the job to settle (default: false)" },
                "timeout": { "type": "integer", "description": "Timeout in seconds when blocking (default: 30)" }
            },
            "required": ["id"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let id = require_str(&params, "id")?;
        let block = optional_bool(&params, "block");
        let timeout_secs = optional_i64(&params, "timeout").filter(|t| *t > 0).unwrap_or(30);

        let job = if block {
            ctx.store
                .wait_for_job(id, Duration::from_secs(timeout_secs as u64))
                .await?
        } else {
            ctx.store
                .get_job(id)
                .await?
                .ok_or_else(|| Error::NotFound(format!("job {id}")))?
        };

        let mut response = serde_json::to_value(&job)?;

        // Directory jobs complete at fan-out time; rewrite progress to
        // reflect aggregate child completion instead.
        if job.job_type == job_type::INDEX_DIRECTORY {
            let stats = ctx.store.child_job_stats(&job.id).await?;
            if stats.total > 0 {
                let obj = response
                    .as_object_mut()
                    .ok_or_else(|| Error::Internal("job did not serialize to an object".into()))?;
                obj.insert("child_jobs".to_string(), serde_json::to_value(&stats)?);
                obj.insert("progress".to_string(), json!(stats.completed + stats.failed));
                obj.insert("total".to_string(), json!(stats.total));
            }
        }

        Ok(response)
    }
}

// ── list_jobs ────────────────────────────────────────────────────────────

/// List jobs, optionally filtered by status.
pub struct ListJobsTool;

#[async_trait]
impl Tool for ListJobsTool {
    fn name(&self) -> &str {
        "list_jobs"
    }

    fn description(&self) -> &str {
        "List indexing jobs"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "status": { "type": "string", "description": "Filter by status: queued, processing, completed, failed" }
            }
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let status = optional_str(&params, "status");
        let jobs = ctx.store.list_jobs(status).await?;

        if jobs.is_empty() {
            return Ok(Value::String(match status {
                Some(status) => format!("No jobs with status '{status}'"),
                None => "No jobs found".to_string(),
            }));
        }

        Ok(json!({
            "count": jobs.len(),
            "jobs": jobs,
        }))
    }
}

// ── clear_queue ──────────────────────────────────────────────────────────

/// Delete jobs by status, or every job.
pub struct ClearQueueTool;

#[async_trait]
impl Tool for ClearQueueTool {
    fn name(&self) -> &str {
        "clear_queue"
    }

    fn description(&self) -> &str {
        "Clear jobs from the queue"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "status": { "type": "string", "enum": ["queued", "completed", "failed", "all"] }
            },
            "required": ["status"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let status = require_str(&params, "status")?;

        match status {
            "queued" | "completed" | "failed" | "all" => {}
            other => {
                return Err(Error::invalid_input(format!(
                    "invalid status '{other}': must be queued, completed, failed, or all"
                )))
            }
        }

        let deleted = ctx.store.delete_jobs(status).await?;

        Ok(json!({
            "success": true,
            "deleted": deleted,
            "status": status,
        }))
    }
}
