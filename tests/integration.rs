//! End-to-end scenarios driven through the tool surface.
//!
//! These tests run the real store, indexer, and queue against a scratch
//! database, with a deterministic mock embedder standing in for the model
//! backend: identical texts always produce identical vectors, so a query
//! for a document's exact content must return that document first.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tempfile::TempDir;

use goldie::chunk::chunk_text;
use goldie::embedding::Embedder;
use goldie::error::{Error, Result};
use goldie::tools::{ToolContext, ToolRegistry};
use goldie::{Indexer, Queue, Store};

const DIMS: usize = 16;
const CHUNK_SIZE: usize = 1000;
const CHUNK_OVERLAP: usize = 200;

/// Deterministic embedder: hash the text into a seed, expand it into a
/// pseudo-random vector.
struct MockEmbedder;

#[async_trait]
impl Embedder for MockEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if text.is_empty() {
            return Err(Error::invalid_input("empty text"));
        }

        let mut hasher = DefaultHasher::new();
        text.hash(&mut hasher);
        let mut seed = hasher.finish();

        Ok((0..DIMS)
            .map(|_| {
                seed = seed
                    .wrapping_mul(6364136223846793005)
                    .wrapping_add(1442695040888963407);
                (seed % 1000) as f32 / 1000.0
            })
            .collect())
    }

    fn dimensions(&self) -> usize {
        DIMS
    }
}

struct TestSetup {
    tmp: TempDir,
    store: Arc<Store>,
    indexer: Arc<Indexer>,
    queue: Arc<Queue>,
    registry: ToolRegistry,
}

impl TestSetup {
    async fn new() -> Self {
        let tmp = TempDir::new().unwrap();
        let store = Arc::new(
            Store::open(&tmp.path().join("index.db"), DIMS)
                .await
                .unwrap(),
        );
        let indexer = Arc::new(Indexer::new(
            store.clone(),
            Arc::new(MockEmbedder),
            CHUNK_SIZE,
            CHUNK_OVERLAP,
        ));
        let queue = Arc::new(Queue::with_poll_interval(
            store.clone(),
            indexer.clone(),
            Duration::from_millis(20),
        ));
        Self {
            tmp,
            store,
            indexer,
            queue,
            registry: ToolRegistry::with_builtins(),
        }
    }

    fn ctx(&self) -> ToolContext {
        ToolContext::new(self.store.clone(), self.indexer.clone(), self.queue.clone())
    }

    async fn call(&self, tool: &str, params: Value) -> Result<Value> {
        self.registry
            .find(tool)
            .unwrap_or_else(|| panic!("unknown tool {tool}"))
            .execute(params, &self.ctx())
            .await
    }

    fn write_file(&self, name: &str, content: &str) -> PathBuf {
        let path = self.tmp.path().join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(&path, content).unwrap();
        path
    }

    /// Poll child stats until no child is queued or processing.
    async fn settle_children(&self, parent_id: &str) -> goldie::models::ChildJobStats {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        loop {
            let stats = self.store.child_job_stats(parent_id).await.unwrap();
            if (stats.queued == 0 && stats.processing == 0)
                || tokio::time::Instant::now() >= deadline
            {
                return stats;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    }
}

#[tokio::test]
async fn file_index_then_search() {
    let setup = TestSetup::new().await;
    let content = "Go is a programming language";
    let path = setup.write_file("a.txt", content);

    let out = setup
        .call("index_file", json!({ "path": path.display().to_string() }))
        .await
        .unwrap();
    assert_eq!(out["success"], true);
    assert_eq!(out["status"], "queued");
    let job_id = out["job_id"].as_str().unwrap().to_string();

    setup.queue.start();
    let job = setup
        .call("job_status", json!({ "id": job_id, "block": true, "timeout": 10 }))
        .await
        .unwrap();
    setup.queue.stop().await;
    assert_eq!(job["status"], "completed");

    let out = setup
        .call("search_index", json!({ "query": content, "limit": 5 }))
        .await
        .unwrap();
    assert!(out["count"].as_i64().unwrap() >= 1);

    let hit = &out["results"][0];
    assert_eq!(hit["id"], "a.txt");
    assert_eq!(hit["metadata"]["source"], path.display().to_string());
    assert_eq!(hit["metadata"]["filename"], "a.txt");
    let checksum = hit["metadata"]["checksum"].as_str().unwrap();
    assert_eq!(checksum.len(), 64);
    assert!(hit["score"].as_f64().unwrap() >= 1.0 - 1e-6);
}

#[tokio::test]
async fn directory_fan_out() {
    let setup = TestSetup::new().await;
    setup.write_file("d/a.md", "alpha notes");
    setup.write_file("d/b.md", "beta notes");
    setup.write_file("d/c.txt", "gamma notes");
    let dir = setup.tmp.path().join("d");

    let out = setup
        .call(
            "index_directory",
            json!({ "directory": dir.display().to_string(), "pattern": "*.md" }),
        )
        .await
        .unwrap();
    let parent_id = out["job_id"].as_str().unwrap().to_string();
    assert_eq!(out["pattern"], "*.md");
    assert_eq!(out["recursive"], false);

    setup.queue.start();
    let parent = setup
        .call(
            "job_status",
            json!({ "id": parent_id, "block": true, "timeout": 10 }),
        )
        .await
        .unwrap();
    assert_eq!(parent["status"], "completed");

    let result: Value =
        serde_json::from_str(parent["result"].as_str().unwrap()).unwrap();
    assert_eq!(result["file_count"], 2);
    assert_eq!(result["child_job_ids"].as_array().unwrap().len(), 2);

    let stats = setup.settle_children(&parent_id).await;
    setup.queue.stop().await;

    assert_eq!(stats.total, 2);
    assert_eq!(stats.queued, 0);
    assert_eq!(stats.processing, 0);
    assert_eq!(stats.completed, 2);
    assert_eq!(stats.failed, 0);

    // Aggregate progress is surfaced on the parent after the fact.
    let parent = setup
        .call("job_status", json!({ "id": parent_id }))
        .await
        .unwrap();
    assert_eq!(parent["child_jobs"]["completed"], 2);
    assert_eq!(parent["progress"], 2);
    assert_eq!(parent["total"], 2);

    let count = setup.call("count_documents", json!({})).await.unwrap();
    assert_eq!(count["count"], 2);
}

#[tokio::test]
async fn checksum_skip_on_reindex() {
    let setup = TestSetup::new().await;
    let path = setup.write_file("a.txt", "unchanging bytes");
    let path_str = path.display().to_string();

    setup.queue.start();

    let out = setup
        .call("index_file", json!({ "path": path_str.clone() }))
        .await
        .unwrap();
    let first = setup
        .call(
            "job_status",
            json!({ "id": out["job_id"], "block": true, "timeout": 10 }),
        )
        .await
        .unwrap();
    let first_result: Value = serde_json::from_str(first["result"].as_str().unwrap()).unwrap();
    assert_eq!(first_result["chunk_count"], 1);

    let count_before = setup.call("count_documents", json!({})).await.unwrap()["count"]
        .as_i64()
        .unwrap();

    let out = setup
        .call("index_file", json!({ "path": path_str }))
        .await
        .unwrap();
    let second = setup
        .call(
            "job_status",
            json!({ "id": out["job_id"], "block": true, "timeout": 10 }),
        )
        .await
        .unwrap();
    setup.queue.stop().await;

    assert_eq!(second["status"], "completed");
    let second_result: Value = serde_json::from_str(second["result"].as_str().unwrap()).unwrap();
    assert_eq!(second_result["chunk_count"], 0);

    let count_after = setup.call("count_documents", json!({})).await.unwrap()["count"]
        .as_i64()
        .unwrap();
    assert_eq!(count_before, count_after);
}

#[tokio::test]
async fn chunked_content_carries_parent_metadata() {
    let setup = TestSetup::new().await;
    let content = "x".repeat(2500);

    let outcome = setup
        .indexer
        .index(&content, &HashMap::new(), "doc")
        .await
        .unwrap();
    let n = outcome.chunk_count;
    assert!(n >= 3, "expected >= 3 chunks, got {n}");

    for i in 0..n {
        let chunk = setup
            .store
            .get_document(&format!("doc_chunk_{i}"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(chunk.metadata.get("parent_id").unwrap(), "doc");
        assert_eq!(chunk.metadata.get("total_chunks").unwrap(), &n.to_string());
    }
    assert!(setup
        .store
        .get_document(&format!("doc_chunk_{n}"))
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn clear_queue_removes_queued_jobs() {
    let setup = TestSetup::new().await;

    for i in 0..3 {
        setup
            .call("index_file", json!({ "path": format!("/tmp/goldie-{i}.txt") }))
            .await
            .unwrap();
    }

    let out = setup.call("list_jobs", json!({})).await.unwrap();
    assert_eq!(out["count"], 3);

    let out = setup
        .call("clear_queue", json!({ "status": "queued" }))
        .await
        .unwrap();
    assert_eq!(out["deleted"], 3);
    assert_eq!(out["status"], "queued");

    let out = setup.call("list_jobs", json!({})).await.unwrap();
    assert_eq!(out, Value::String("No jobs found".into()));
}

#[tokio::test]
async fn delete_cascade_removes_every_chunk() {
    let setup = TestSetup::new().await;
    let content = "term ".repeat(600); // 3000 bytes, chunks at size 1000

    let outcome = setup
        .indexer
        .index(&content, &HashMap::new(), "doc")
        .await
        .unwrap();
    assert!(outcome.chunk_count > 1);

    let out = setup
        .call("delete_document", json!({ "id": "doc" }))
        .await
        .unwrap();
    // The base id was stored chunked, so the cascade count is the chunks.
    assert_eq!(
        out["deleted_count"].as_u64().unwrap(),
        outcome.chunk_count as u64
    );

    let out = setup
        .call("search_index", json!({ "query": "term term term", "limit": 20 }))
        .await
        .unwrap();
    match out {
        Value::String(text) => assert!(text.starts_with("No results")),
        Value::Object(ref obj) => {
            for hit in obj["results"].as_array().unwrap() {
                let id = hit["id"].as_str().unwrap();
                assert!(!id.starts_with("doc_chunk_"), "stale chunk {id} survived");
                assert_ne!(id, "doc");
            }
        }
        other => panic!("unexpected response: {other}"),
    }
}

#[tokio::test]
async fn chunk_round_trip_matches_chunker_output() {
    let setup = TestSetup::new().await;
    let content: String = (0..400).map(|i| format!("token{i} ")).collect();
    assert!(content.len() > CHUNK_SIZE);

    let outcome = setup
        .indexer
        .index(&content, &HashMap::new(), "doc")
        .await
        .unwrap();

    let expected = chunk_text(&content, CHUNK_SIZE, CHUNK_OVERLAP);
    assert_eq!(outcome.chunk_count, expected.len());

    for (i, expected_chunk) in expected.iter().enumerate() {
        let stored = setup
            .store
            .get_document(&format!("doc_chunk_{i}"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&stored.content, expected_chunk);
    }
}

#[tokio::test]
async fn single_document_search_scores_near_one() {
    let setup = TestSetup::new().await;
    let content = "the only document in the store";

    let out = setup
        .call("index_content", json!({ "content": content }))
        .await
        .unwrap();
    let id = out["id"].as_str().unwrap().to_string();

    let hits = setup.indexer.query(content, 1).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].document.id, id);
    assert!(hits[0].score >= 1.0 - 1e-6);
    assert!(hits[0].distance <= 1e-6);
}

#[tokio::test]
async fn recall_depth_bounds_and_grouping() {
    let setup = TestSetup::new().await;
    let path = setup.write_file("facts.txt", "water boils at one hundred degrees");

    setup.queue.start();
    let out = setup
        .call("index_file", json!({ "path": path.display().to_string() }))
        .await
        .unwrap();
    setup
        .call(
            "job_status",
            json!({ "id": out["job_id"], "block": true, "timeout": 10 }),
        )
        .await
        .unwrap();
    setup.queue.stop().await;

    let out = setup
        .call(
            "recall",
            json!({ "topic": "water boils at one hundred degrees", "depth": -3 }),
        )
        .await
        .unwrap();
    let text = out.as_str().unwrap();
    assert!(text.contains("water boils at one hundred degrees"));
}
