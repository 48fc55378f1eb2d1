//! Embedding capability and backends.
//!
//! The core consumes embeddings through the [`Embedder`] trait and treats
//! the backing model as a single-consumer resource: [`SharedEmbedder`]
//! serializes all calls behind one mutex, which is the seam shared by the
//! queue worker and synchronous query handlers.
//!
//! One remote backend is built in: [`OllamaEmbedder`], which calls the
//! Ollama embeddings API with a timeout and exponential-backoff retry.
//!
//! Vector utilities for BLOB storage live here as well:
//! [`vec_to_blob`] / [`blob_to_vec`] encode embeddings as little-endian
//! `f32` bytes, and [`cosine_distance`] is the store's search metric.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::warn;

use crate::config::EmbeddingConfig;
use crate::error::{Error, Result};

/// Maps text to fixed-dimension float vectors.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a single text. Empty text is `invalid_input`.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed several texts, preserving input order. The default
    /// implementation is sequential.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }

    /// The vector dimension, constant for the embedder's lifetime.
    fn dimensions(&self) -> usize;

    /// Run a throwaway embedding to amortize first-call cost.
    async fn warmup(&self) -> Result<()> {
        self.embed("warmup").await.map(|_| ())
    }

    /// Release backing resources.
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Serializes access to a non-thread-safe embedder.
///
/// Both the queue worker and query handlers call the embedder; wrapping it
/// here guarantees at most one in-flight model call.
pub struct SharedEmbedder {
    inner: Mutex<Box<dyn Embedder>>,
    dimensions: usize,
}

impl SharedEmbedder {
    pub fn new(inner: Box<dyn Embedder>) -> Arc<Self> {
        let dimensions = inner.dimensions();
        Arc::new(Self {
            inner: Mutex::new(inner),
            dimensions,
        })
    }
}

#[async_trait]
impl Embedder for SharedEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let guard = self.inner.lock().await;
        guard.embed(text).await
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let guard = self.inner.lock().await;
        guard.embed_batch(texts).await
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn warmup(&self) -> Result<()> {
        let guard = self.inner.lock().await;
        guard.warmup().await
    }

    async fn close(&self) -> Result<()> {
        let guard = self.inner.lock().await;
        guard.close().await
    }
}

/// Embedding backend using the Ollama HTTP API.
///
/// Calls `POST {base_url}/api/embeddings` with `{model, prompt}`.
/// Transient failures (HTTP 429, 5xx, network errors) retry with
/// exponential backoff; other client errors fail immediately.
pub struct OllamaEmbedder {
    client: reqwest::Client,
    base_url: String,
    model: String,
    dimensions: usize,
    max_retries: u32,
}

#[derive(serde::Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(serde::Deserialize)]
struct EmbedResponse {
    #[serde(default)]
    embedding: Vec<f32>,
}

impl OllamaEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::BackendUnavailable(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            dimensions: config.resolved_dimensions(),
            max_retries: config.max_retries,
        })
    }

    async fn request_embedding(&self, text: &str) -> Result<Vec<f32>> {
        let url = format!("{}/api/embeddings", self.base_url);
        let body = EmbedRequest {
            model: &self.model,
            prompt: text,
        };

        let mut last_err: Option<Error> = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                warn!("ollama request retry {attempt} after {delay:?}");
                tokio::time::sleep(delay).await;
            }

            let resp = self.client.post(&url).json(&body).send().await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let parsed: EmbedResponse = response
                            .json()
                            .await
                            .map_err(|e| Error::BackendUnavailable(e.to_string()))?;
                        if parsed.embedding.is_empty() {
                            return Err(Error::Embedding(
                                "ollama returned an empty embedding".to_string(),
                            ));
                        }
                        return Ok(parsed.embedding);
                    }

                    if status.as_u16() == 429 || status.is_server_error() {
                        last_err = Some(Error::BackendUnavailable(format!(
                            "ollama returned status {status}"
                        )));
                        continue;
                    }

                    return Err(Error::BackendUnavailable(format!(
                        "ollama returned status {status}"
                    )));
                }
                Err(e) => {
                    last_err = Some(Error::BackendUnavailable(e.to_string()));
                    continue;
                }
            }
        }

        Err(last_err
            .unwrap_or_else(|| Error::BackendUnavailable("embedding failed after retries".into())))
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if text.is_empty() {
            return Err(Error::invalid_input("empty text"));
        }

        let embedding = self.request_embedding(text).await?;
        if embedding.len() != self.dimensions {
            return Err(Error::Embedding(format!(
                "model '{}' returned dimension {}, expected {}",
                self.model,
                embedding.len(),
                self.dimensions
            )));
        }
        Ok(embedding)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

/// Instantiate the configured embedding backend.
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Box<dyn Embedder>> {
    match config.backend.as_str() {
        "ollama" => Ok(Box::new(OllamaEmbedder::new(config)?)),
        other => Err(Error::invalid_input(format!(
            "unknown embedding backend: {other}"
        ))),
    }
}

/// Encode a float vector as little-endian `f32` bytes for BLOB storage.
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB produced by [`vec_to_blob`] back into a float vector.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Cosine similarity between two vectors; 0.0 for mismatched or empty input.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

/// Cosine distance, the store's native search metric.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    1.0 - cosine_similarity(a, b)
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    /// Deterministic embedder for tests: hashes the text into a seed and
    /// expands it into a pseudo-random vector, so identical texts always
    /// embed identically.
    pub struct MockEmbedder {
        pub dimensions: usize,
    }

    impl MockEmbedder {
        pub fn new(dimensions: usize) -> Self {
            Self { dimensions }
        }

        pub fn vector_for(&self, text: &str) -> Vec<f32> {
            let mut hasher = DefaultHasher::new();
            text.hash(&mut hasher);
            let mut seed = hasher.finish();

            (0..self.dimensions)
                .map(|_| {
                    seed = seed
                        .wrapping_mul(6364136223846793005)
                        .wrapping_add(1442695040888963407);
                    (seed % 1000) as f32 / 1000.0
                })
                .collect()
        }
    }

    #[async_trait]
    impl Embedder for MockEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            if text.is_empty() {
                return Err(Error::invalid_input("empty text"));
            }
            Ok(self.vector_for(text))
        }

        fn dimensions(&self) -> usize {
            self.dimensions
        }
    }
}
