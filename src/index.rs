//! Indexer: turns external inputs into stored, embedded documents.
//!
//! Three entry points exist: inline content ([`Indexer::index`]), a single
//! file ([`Indexer::index_file`]), and a directory scan
//! ([`Indexer::scan_directory`] / [`Indexer::index_directory`]).
//!
//! File ingestion is content-addressed: the hex SHA-256 of the raw bytes
//! is stored as `checksum` metadata, and re-indexing an unchanged file is
//! suppressed. A chunk count of 0 is the canonical "skipped" signal.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use globset::GlobBuilder;
use sha2::{Digest, Sha256};
use tracing::{debug, info};
use uuid::Uuid;
use walkdir::WalkDir;

use crate::chunk::chunk_text;
use crate::embedding::Embedder;
use crate::error::{Error, Result};
use crate::models::{Document, SearchResult};
use crate::skiplist::SkipList;
use crate::store::Store;

/// Ceiling for the chunk-deletion probe.
const DELETE_PROBE_LIMIT: usize = 10_000;

/// Outcome of indexing one input.
#[derive(Debug, Clone, serde::Serialize)]
pub struct IndexOutcome {
    pub id: String,
    /// Number of chunks stored; 0 means "unchanged, skipped".
    pub chunk_count: usize,
}

/// Outcome of the synchronous directory variant.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct DirectoryOutcome {
    pub indexed: Vec<String>,
    pub skipped: Vec<String>,
    pub failed: Vec<String>,
    pub total_chunks: usize,
}

/// Drives the embedder and persists documents through the store.
pub struct Indexer {
    store: Arc<Store>,
    embedder: Arc<dyn Embedder>,
    chunk_size: usize,
    chunk_overlap: usize,
}

impl Indexer {
    pub fn new(
        store: Arc<Store>,
        embedder: Arc<dyn Embedder>,
        chunk_size: usize,
        chunk_overlap: usize,
    ) -> Self {
        Self {
            store,
            embedder,
            chunk_size,
            chunk_overlap,
        }
    }

    /// Index text content, chunking when it exceeds the chunk size.
    ///
    /// An empty `id` gets a fresh UUID. Chunks are stored as
    /// `"<id>_chunk_<i>"` with the caller's metadata plus the reserved
    /// `parent_id`, `chunk_index`, and `total_chunks` keys. On an embedder
    /// failure mid-way, already stored chunks are left in place; callers
    /// needing atomicity delete and retry.
    pub async fn index(
        &self,
        content: &str,
        metadata: &HashMap<String, String>,
        id: &str,
    ) -> Result<IndexOutcome> {
        if content.is_empty() {
            return Err(Error::invalid_input("empty content"));
        }

        let id = if id.is_empty() {
            Uuid::new_v4().to_string()
        } else {
            id.to_string()
        };

        if content.len() <= self.chunk_size {
            let embedding = self.embedder.embed(content).await?;
            self.store
                .add_document(&id, content, metadata, &embedding)
                .await?;
            return Ok(IndexOutcome { id, chunk_count: 1 });
        }

        let chunks = chunk_text(content, self.chunk_size, self.chunk_overlap);
        debug!("split {id} into {} chunks", chunks.len());

        for (i, chunk) in chunks.iter().enumerate() {
            let chunk_id = format!("{id}_chunk_{i}");

            let mut chunk_meta = metadata.clone();
            chunk_meta.insert("parent_id".to_string(), id.clone());
            chunk_meta.insert("chunk_index".to_string(), i.to_string());
            chunk_meta.insert("total_chunks".to_string(), chunks.len().to_string());

            let embedding = self.embedder.embed(chunk).await.map_err(|e| match e {
                Error::Embedding(msg) => Error::Embedding(format!("chunk {i}: {msg}")),
                other => other,
            })?;

            self.store
                .add_document(&chunk_id, chunk, &chunk_meta, &embedding)
                .await?;
        }

        Ok(IndexOutcome {
            id,
            chunk_count: chunks.len(),
        })
    }

    /// Index a file, skipping when its checksum has not changed.
    ///
    /// The document id is the path's basename; metadata carries `source`,
    /// `filename`, and `checksum`. A changed file first has its previous
    /// rows removed, so no stale chunks survive a re-index.
    pub async fn index_file(&self, path: &Path) -> Result<IndexOutcome> {
        let id = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| Error::invalid_input(format!("not a file path: {}", path.display())))?;

        let bytes = tokio::fs::read(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::invalid_input(format!("no such file: {}", path.display()))
            } else {
                Error::Io(e)
            }
        })?;

        let checksum = format!("{:x}", Sha256::digest(&bytes));

        // The file may have been stored whole or chunked; check both forms.
        let existing = self.store.get_document(&id).await?;
        let existing_chunk = self.store.get_document(&format!("{id}_chunk_0")).await?;

        if checksum_matches(existing.as_ref(), &checksum)
            || checksum_matches(existing_chunk.as_ref(), &checksum)
        {
            debug!("{} unchanged (checksum match), skipping", path.display());
            return Ok(IndexOutcome { id, chunk_count: 0 });
        }

        if existing.is_some() || existing_chunk.is_some() {
            info!("{} changed, re-indexing", path.display());
            self.delete_document_and_chunks(&id).await?;
        }

        let mut metadata = HashMap::new();
        metadata.insert("source".to_string(), path.display().to_string());
        metadata.insert("filename".to_string(), id.clone());
        metadata.insert("checksum".to_string(), checksum);

        let content = String::from_utf8_lossy(&bytes);
        self.index(&content, &metadata, &id).await
    }

    /// Delete a document and every chunk derived from it.
    ///
    /// Chunks are enumerated by probing `"<id>_chunk_<i>"` for increasing
    /// `i` until the first miss; a hard ceiling keeps the probe finite.
    /// Returns the number of rows removed.
    pub async fn delete_document_and_chunks(&self, id: &str) -> Result<usize> {
        let mut deleted = 0;

        if self.store.delete_document(id).await? {
            deleted += 1;
        }

        for i in 0..DELETE_PROBE_LIMIT {
            let chunk_id = format!("{id}_chunk_{i}");
            if !self.store.delete_document(&chunk_id).await? {
                break;
            }
            deleted += 1;
        }

        Ok(deleted)
    }

    /// Enumerate regular files under `dir` whose basename matches the
    /// shell glob `pattern` (empty means `*`), applying skip patterns to
    /// files and directory subtrees. Does not index.
    pub async fn scan_directory(
        &self,
        dir: &Path,
        pattern: &str,
        recursive: bool,
    ) -> Result<Vec<PathBuf>> {
        let pattern = if pattern.is_empty() { "*" } else { pattern };

        if !dir.is_dir() {
            return Err(Error::invalid_input(format!(
                "no such directory: {}",
                dir.display()
            )));
        }

        let matcher = GlobBuilder::new(pattern)
            .literal_separator(true)
            .build()
            .map_err(|e| Error::invalid_input(format!("invalid pattern {pattern:?}: {e}")))?
            .compile_matcher();

        let skip = SkipList::load(dir);
        let mut files = Vec::new();

        if recursive {
            let walker = WalkDir::new(dir).into_iter().filter_entry(|entry| {
                if entry.depth() == 0 {
                    return true;
                }
                let rel = entry
                    .path()
                    .strip_prefix(dir)
                    .unwrap_or(entry.path())
                    .to_string_lossy()
                    .replace('\\', "/");
                !skip.should_skip(&rel, entry.file_type().is_dir())
            });

            for entry in walker {
                // Unreadable entries are skipped, not fatal.
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(err) => {
                        debug!("skipping unreadable entry: {err}");
                        continue;
                    }
                };
                if !entry.file_type().is_file() {
                    continue;
                }
                let name = entry.file_name().to_string_lossy();
                if matcher.is_match(name.as_ref()) {
                    files.push(entry.path().to_path_buf());
                }
            }
        } else {
            let mut read_dir = tokio::fs::read_dir(dir).await?;
            while let Some(entry) = read_dir.next_entry().await? {
                let file_type = entry.file_type().await?;
                if !file_type.is_file() {
                    continue;
                }
                let name = entry.file_name().to_string_lossy().to_string();
                if skip.should_skip(&name, false) {
                    continue;
                }
                if matcher.is_match(&name) {
                    files.push(entry.path());
                }
            }
        }

        files.sort();
        debug!("scan of {} found {} files", dir.display(), files.len());
        Ok(files)
    }

    /// Synchronous directory indexing: scan, then index each file,
    /// partitioning results by outcome. Used by the test surface; the
    /// queue fans directories out into child jobs instead.
    pub async fn index_directory(
        &self,
        dir: &Path,
        pattern: &str,
        recursive: bool,
    ) -> Result<DirectoryOutcome> {
        let files = self.scan_directory(dir, pattern, recursive).await?;
        let mut outcome = DirectoryOutcome::default();

        for file in files {
            let file_display = file.display().to_string();
            match self.index_file(&file).await {
                Ok(res) if res.chunk_count == 0 => outcome.skipped.push(file_display),
                Ok(res) => {
                    outcome.indexed.push(file_display);
                    outcome.total_chunks += res.chunk_count;
                }
                Err(err) => {
                    debug!("indexing {} failed: {}", file_display, err);
                    outcome.failed.push(file_display);
                }
            }
        }

        Ok(outcome)
    }

    /// Embed a query once and search the store.
    pub async fn query(&self, query: &str, limit: i64) -> Result<Vec<SearchResult>> {
        if query.is_empty() {
            return Err(Error::invalid_input("empty query"));
        }

        let limit = if limit <= 0 { 5 } else { limit };
        let embedding = self.embedder.embed(query).await?;
        self.store.search(&embedding, limit).await
    }

    /// The store this indexer writes to.
    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }
}

fn checksum_matches(doc: Option<&Document>, checksum: &str) -> bool {
    doc.map(|d| d.metadata.get("checksum").map(String::as_str) == Some(checksum))
        .unwrap_or(false)
}
