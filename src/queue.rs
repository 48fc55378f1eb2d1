//! Single-worker asynchronous job queue.
//!
//! Enqueueing is synchronous and returns a job id immediately; a single
//! background worker claims jobs from the store in creation order and
//! runs them exactly once. Directory jobs fan out into one child
//! `index_file` job per discovered path and complete as soon as the
//! children are enqueued; aggregate completion is observed through
//! [`Store::child_job_stats`].
//!
//! The worker runs under a supervisor that restarts it after a panic, so
//! one bad input cannot permanently disable ingestion. A job that was
//! mid-flight when the worker died stays in `processing`; operators clear
//! it through the job-management tools.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::Result;
use crate::index::Indexer;
use crate::models::{job_type, IndexDirParams, IndexFileParams, Job};
use crate::store::Store;

/// How often the worker polls for queued jobs.
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Background job runner over the store's `jobs` table.
pub struct Queue {
    store: Arc<Store>,
    indexer: Arc<Indexer>,
    poll_interval: Duration,
    shutdown: watch::Sender<bool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Queue {
    pub fn new(store: Arc<Store>, indexer: Arc<Indexer>) -> Self {
        Self::with_poll_interval(store, indexer, DEFAULT_POLL_INTERVAL)
    }

    pub fn with_poll_interval(
        store: Arc<Store>,
        indexer: Arc<Indexer>,
        poll_interval: Duration,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            store,
            indexer,
            poll_interval,
            shutdown,
            worker: Mutex::new(None),
        }
    }

    /// Spawn the background worker. Calling again while a worker is
    /// running is a no-op.
    pub fn start(&self) {
        let mut guard = self.worker.lock().expect("queue worker lock poisoned");
        if guard.is_some() {
            return;
        }

        let store = self.store.clone();
        let indexer = self.indexer.clone();
        let poll_interval = self.poll_interval;
        let shutdown = self.shutdown.subscribe();

        // Supervisor: restart the worker if it panics; exit cleanly when
        // it returns.
        let handle = tokio::spawn(async move {
            loop {
                let worker = tokio::spawn(worker_loop(
                    store.clone(),
                    indexer.clone(),
                    shutdown.clone(),
                    poll_interval,
                ));
                match worker.await {
                    Ok(()) => break,
                    Err(err) if err.is_panic() => {
                        error!("queue worker panicked, restarting: {err}");
                    }
                    Err(_) => break,
                }
            }
        });

        *guard = Some(handle);
    }

    /// Signal the worker to stop and wait for the current job to drain.
    /// Jobs still queued remain queued.
    pub async fn stop(&self) {
        let _ = self.shutdown.send(true);
        let handle = {
            let mut guard = self.worker.lock().expect("queue worker lock poisoned");
            guard.take()
        };
        if let Some(handle) = handle {
            if let Err(err) = handle.await {
                warn!("queue worker join failed: {err}");
            }
        }
    }

    /// Enqueue a job to index one file; returns the job id.
    pub async fn enqueue_index_file(&self, path: &str) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        let params = serde_json::to_string(&IndexFileParams {
            path: path.to_string(),
        })?;
        self.store
            .create_job(&id, job_type::INDEX_FILE, &params)
            .await?;
        Ok(id)
    }

    /// Enqueue a file job as the child of a directory job.
    pub async fn enqueue_index_file_with_parent(
        &self,
        path: &str,
        parent_id: &str,
    ) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        let params = serde_json::to_string(&IndexFileParams {
            path: path.to_string(),
        })?;
        self.store
            .create_job_with_parent(&id, job_type::INDEX_FILE, &params, parent_id)
            .await?;
        Ok(id)
    }

    /// Enqueue a job to scan a directory and fan out file jobs.
    pub async fn enqueue_index_directory(
        &self,
        directory: &str,
        pattern: &str,
        recursive: bool,
    ) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        let params = serde_json::to_string(&IndexDirParams {
            directory: directory.to_string(),
            pattern: pattern.to_string(),
            recursive,
        })?;
        self.store
            .create_job(&id, job_type::INDEX_DIRECTORY, &params)
            .await?;
        Ok(id)
    }
}

async fn worker_loop(
    store: Arc<Store>,
    indexer: Arc<Indexer>,
    mut shutdown: watch::Receiver<bool>,
    poll_interval: Duration,
) {
    let mut ticker = tokio::time::interval(poll_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        if *shutdown.borrow() {
            return;
        }

        tokio::select! {
            _ = shutdown.changed() => return,
            _ = ticker.tick() => {}
        }

        // Not cancellable: an in-flight job drains before shutdown is
        // observed on the next iteration.
        process_next_job(&store, &indexer).await;
    }
}

/// Claim and run at most one job. Errors are recorded on the job, never
/// propagated; a failure here must not kill the worker.
async fn process_next_job(store: &Arc<Store>, indexer: &Arc<Indexer>) {
    let job = match store.next_pending_job().await {
        Ok(Some(job)) => job,
        Ok(None) => return,
        Err(err) => {
            error!("failed to claim next job: {err}");
            return;
        }
    };

    info!("processing job {} (type: {})", job.id, job.job_type);

    match job.job_type.as_str() {
        job_type::INDEX_FILE => process_index_file(store, indexer, &job).await,
        job_type::INDEX_DIRECTORY => process_index_directory(store, indexer, &job).await,
        other => {
            warn!("job {} has unknown type {other:?}", job.id);
            let _ = store
                .update_job_error(&job.id, &format!("unknown job type: {other}"))
                .await;
        }
    }
}

async fn process_index_file(store: &Arc<Store>, indexer: &Arc<Indexer>, job: &Job) {
    let params: IndexFileParams = match serde_json::from_str(&job.params) {
        Ok(params) => params,
        Err(err) => {
            let _ = store
                .update_job_error(&job.id, &format!("invalid params: {err}"))
                .await;
            return;
        }
    };

    if let Err(err) = store.update_job_progress(&job.id, 0, 1).await {
        warn!("job {}: failed to update progress: {err}", job.id);
    }

    let outcome = match indexer.index_file(Path::new(&params.path)).await {
        Ok(outcome) => outcome,
        Err(err) => {
            warn!("job {}: indexing {} failed: {err}", job.id, params.path);
            let _ = store
                .update_job_error(&job.id, &format!("indexing failed: {err}"))
                .await;
            return;
        }
    };

    let result = serde_json::json!({
        "id": outcome.id,
        "chunk_count": outcome.chunk_count,
        "path": params.path,
    });

    let _ = store.update_job_progress(&job.id, 1, 1).await;
    if let Err(err) = store.update_job_result(&job.id, &result.to_string()).await {
        warn!("job {}: failed to record result: {err}", job.id);
    }

    info!(
        "job {}: indexed {} ({} chunks)",
        job.id, params.path, outcome.chunk_count
    );
}

async fn process_index_directory(store: &Arc<Store>, indexer: &Arc<Indexer>, job: &Job) {
    let params: IndexDirParams = match serde_json::from_str(&job.params) {
        Ok(params) => params,
        Err(err) => {
            let _ = store
                .update_job_error(&job.id, &format!("invalid params: {err}"))
                .await;
            return;
        }
    };

    let files = match indexer
        .scan_directory(Path::new(&params.directory), &params.pattern, params.recursive)
        .await
    {
        Ok(files) => files,
        Err(err) => {
            let _ = store
                .update_job_error(&job.id, &format!("scanning failed: {err}"))
                .await;
            return;
        }
    };

    let file_count = files.len();
    debug!("job {}: found {file_count} files, creating child jobs", job.id);
    let _ = store.update_job_progress(&job.id, 0, file_count as i64).await;

    let mut child_job_ids = Vec::with_capacity(file_count);
    for file in &files {
        let path = file.display().to_string();
        let child_id = Uuid::new_v4().to_string();
        let child_params = match serde_json::to_string(&IndexFileParams { path: path.clone() }) {
            Ok(p) => p,
            Err(err) => {
                warn!("job {}: failed to serialize child params: {err}", job.id);
                continue;
            }
        };
        match store
            .create_job_with_parent(&child_id, job_type::INDEX_FILE, &child_params, &job.id)
            .await
        {
            Ok(()) => child_job_ids.push(child_id),
            Err(err) => warn!("job {}: failed to create child job for {path}: {err}", job.id),
        }
    }

    // The parent completes once children are enqueued; callers observe
    // aggregate completion via child job stats.
    let result = serde_json::json!({
        "file_count": file_count,
        "child_job_ids": child_job_ids,
        "directory": params.directory,
        "pattern": params.pattern,
        "recursive": params.recursive,
    });

    if let Err(err) = store.update_job_result(&job.id, &result.to_string()).await {
        warn!("job {}: failed to record result: {err}", job.id);
    }

    info!(
        "job {}: created {} child jobs for {}",
        job.id,
        child_job_ids.len(),
        params.directory
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::testing::MockEmbedder;
    use crate::models::job_status;
    use tempfile::TempDir;

    const DIMS: usize = 8;

    async fn test_queue() -> (TempDir, Arc<Store>, Queue) {
        let tmp = TempDir::new().unwrap();
        let store = Arc::new(Store::open(&tmp.path().join("test.db"), DIMS).await.unwrap());
        let indexer = Arc::new(Indexer::new(
            store.clone(),
            Arc::new(MockEmbedder::new(DIMS)),
            1000,
            200,
        ));
        let queue = Queue::with_poll_interval(store.clone(), indexer, Duration::from_millis(20));
        (tmp, store, queue)
    }

    #[tokio::test]
    async fn file_job_completes_with_result() {
        let (tmp, store, queue) = test_queue().await;
        let file = tmp.path().join("a.txt");
        std::fs::write(&file, "hello queue").unwrap();

        let job_id = queue
            .enqueue_index_file(&file.display().to_string())
            .await
            .unwrap();
        assert_eq!(
            store.get_job(&job_id).await.unwrap().unwrap().status,
            job_status::QUEUED
        );

        queue.start();
        let job = store
            .wait_for_job(&job_id, Duration::from_secs(5))
            .await
            .unwrap();
        queue.stop().await;

        assert_eq!(job.status, job_status::COMPLETED);
        assert_eq!(job.progress, 1);
        assert_eq!(job.total, 1);

        let result: serde_json::Value = serde_json::from_str(job.result.as_deref().unwrap()).unwrap();
        assert_eq!(result["id"], "a.txt");
        assert_eq!(result["chunk_count"], 1);
        assert_eq!(result["path"], file.display().to_string());

        assert!(store.get_document("a.txt").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn missing_file_job_fails() {
        let (tmp, store, queue) = test_queue().await;

        let job_id = queue
            .enqueue_index_file(&tmp.path().join("missing.txt").display().to_string())
            .await
            .unwrap();

        queue.start();
        let job = store
            .wait_for_job(&job_id, Duration::from_secs(5))
            .await
            .unwrap();
        queue.stop().await;

        assert_eq!(job.status, job_status::FAILED);
        assert!(job.error.as_deref().unwrap().contains("indexing failed"));
    }

    #[tokio::test]
    async fn directory_job_fans_out_children() {
        let (tmp, store, queue) = test_queue().await;
        let dir = tmp.path().join("docs");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("a.md"), "alpha document").unwrap();
        std::fs::write(dir.join("b.md"), "beta document").unwrap();
        std::fs::write(dir.join("c.txt"), "gamma document").unwrap();

        let parent_id = queue
            .enqueue_index_directory(&dir.display().to_string(), "*.md", false)
            .await
            .unwrap();

        queue.start();
        let parent = store
            .wait_for_job(&parent_id, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(parent.status, job_status::COMPLETED);

        let result: serde_json::Value =
            serde_json::from_str(parent.result.as_deref().unwrap()).unwrap();
        assert_eq!(result["file_count"], 2);
        let child_ids = result["child_job_ids"].as_array().unwrap();
        assert_eq!(child_ids.len(), 2);

        // Children are interleaved with other queued work; wait for each.
        for child_id in child_ids {
            let child = store
                .wait_for_job(child_id.as_str().unwrap(), Duration::from_secs(5))
                .await
                .unwrap();
            assert_eq!(child.status, job_status::COMPLETED);
            assert_eq!(child.parent_id.as_deref(), Some(parent_id.as_str()));
        }
        queue.stop().await;

        let stats = store.child_job_stats(&parent_id).await.unwrap();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.completed, 2);
        assert_eq!(stats.queued, 0);
        assert_eq!(stats.processing, 0);
        assert_eq!(stats.failed, 0);

        assert_eq!(store.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn unknown_job_type_is_failed() {
        let (_tmp, store, queue) = test_queue().await;

        store.create_job("weird", "reticulate", "{}").await.unwrap();
        queue.start();
        let job = store
            .wait_for_job("weird", Duration::from_secs(5))
            .await
            .unwrap();
        queue.stop().await;

        assert_eq!(job.status, job_status::FAILED);
        assert!(job.error.as_deref().unwrap().contains("unknown job type"));
    }

    #[tokio::test]
    async fn invalid_params_fail_the_job() {
        let (_tmp, store, queue) = test_queue().await;

        store
            .create_job("bad", job_type::INDEX_FILE, "not json")
            .await
            .unwrap();
        queue.start();
        let job = store.wait_for_job("bad", Duration::from_secs(5)).await.unwrap();
        queue.stop().await;

        assert_eq!(job.status, job_status::FAILED);
        assert!(job.error.as_deref().unwrap().contains("invalid params"));
    }

    #[tokio::test]
    async fn start_is_idempotent_and_jobs_run_once() {
        let (tmp, store, queue) = test_queue().await;
        let file = tmp.path().join("a.txt");
        std::fs::write(&file, "only once").unwrap();

        queue.start();
        queue.start();

        let job_id = queue
            .enqueue_index_file(&file.display().to_string())
            .await
            .unwrap();
        let job = store
            .wait_for_job(&job_id, Duration::from_secs(5))
            .await
            .unwrap();
        queue.stop().await;

        assert_eq!(job.status, job_status::COMPLETED);
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn stopped_queue_leaves_jobs_queued() {
        let (tmp, store, queue) = test_queue().await;
        let file = tmp.path().join("a.txt");
        std::fs::write(&file, "never processed").unwrap();

        let job_id = queue
            .enqueue_index_file(&file.display().to_string())
            .await
            .unwrap();

        // Worker never started; the job stays queued.
        tokio::time::sleep(Duration::from_millis(100)).await;
        let job = store.get_job(&job_id).await.unwrap().unwrap();
        assert_eq!(job.status, job_status::QUEUED);
    }
}
